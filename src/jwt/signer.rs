//! Signer capability shared by the envelope and standard token services.

use crate::error::TokenError;
use crate::jwt::claims::{Claims, TokenGrant};
use async_trait::async_trait;

/// Issues and validates tokens. Callers hold an `Arc<dyn TokenSigner>` and
/// never inspect which implementation sits behind it.
#[async_trait]
pub trait TokenSigner: Send + Sync {
    /// Issue a token for `grant` with a fresh validity window.
    async fn generate_token(&self, grant: &TokenGrant) -> Result<String, TokenError>;

    /// Verify `token` and return its claims.
    async fn validate_token(&self, token: &str) -> Result<Claims, TokenError>;

    /// Algorithm identifier placed in the token header.
    fn algorithm(&self) -> &str;
}
