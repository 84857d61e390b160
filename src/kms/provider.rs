//! Key provider capability consumed by the envelope token service.

use crate::error::TokenError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// Provider-side encryption context. Ordered so its canonical form is stable.
pub type EncryptionContext = BTreeMap<String, String>;

/// A freshly generated data key: the plaintext for signing and the
/// provider-encrypted form that travels inside the token.
pub struct DataKey {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("plaintext", &"<redacted>")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Generate and decrypt data keys through an external key-management service.
///
/// Implementations hold no cache and perform no retries; every failure is a
/// `TokenError::KeyProvider`.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Mint a new data key under `key_id`.
    async fn generate_data_key(
        &self,
        key_id: &str,
        context: Option<&EncryptionContext>,
    ) -> Result<DataKey, TokenError>;

    /// Recover the plaintext of a data key produced by `generate_data_key`.
    ///
    /// `context` must equal the context the key was generated with.
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<Zeroizing<Vec<u8>>, TokenError>;
}
