//! Workspace token library.
//!
//! Issues and validates bearer tokens for per-user workspaces. The envelope
//! signer gives every token its own data key, minted by an external key
//! provider and cached in memory after first use.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod factory;
pub mod jwt;
pub mod kms;
pub mod metrics;
pub mod observability;
pub mod refresh;
pub mod storage;

// Re-exports for convenience
pub use config::{Config, SigningType};
pub use error::TokenError;
pub use factory::{build_token_manager, AccessStrategy, SignerFactory};
pub use jwt::{Claims, TokenGrant, TokenSigner, TokenType};
pub use kms::{EnvelopeConfig, EnvelopeTokenService, KeyProvider};
pub use metrics::TokenMetrics;
pub use refresh::{RefreshPolicy, TokenManager};
