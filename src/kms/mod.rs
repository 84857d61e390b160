//! Key provider capability and the envelope token service built on it.

pub mod envelope;
pub mod local;
pub mod mock;
pub mod provider;

pub use envelope::{EnvelopeConfig, EnvelopeTokenService, CACHE_TTL_BUFFER};
pub use local::LocalKeyProvider;
pub use mock::MockKeyProvider;
pub use provider::{DataKey, EncryptionContext, KeyProvider};
