pub mod claims;
pub mod serializer;
pub mod signer;
pub mod standard;

pub use claims::{Claims, TokenGrant, TokenType};
pub use serializer::{EnvelopeHeader, ENVELOPE_ALGORITHM};
pub use signer::TokenSigner;
pub use standard::StandardSigner;
