//! In-process key provider backed by an AES-256-GCM master key.
//!
//! Mirrors the external provider's contract closely enough for development
//! and tests: 256-bit data keys, an opaque ciphertext blob that names its
//! key id, and encryption context bound as associated data.

use crate::error::TokenError;
use crate::kms::provider::{DataKey, EncryptionContext, KeyProvider};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

const BLOB_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
/// Data key length in bytes (AES-256).
pub const DATA_KEY_LEN: usize = 32;

/// Local envelope provider.
pub struct LocalKeyProvider {
    master_key: Zeroizing<[u8; 32]>,
}

impl LocalKeyProvider {
    #[must_use]
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            master_key: Zeroizing::new(master_key),
        }
    }

    /// Provider with a random master key; blobs do not survive a restart.
    #[must_use]
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(key)
    }

    fn cipher(&self) -> Result<Aes256Gcm, TokenError> {
        Aes256Gcm::new_from_slice(&self.master_key[..])
            .map_err(|e| TokenError::key_provider(format!("invalid master key: {}", e)))
    }

    fn seal(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<Vec<u8>, TokenError> {
        let key_id_len = u16::try_from(key_id.len())
            .map_err(|_| TokenError::key_provider("key id too long"))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let aad = associated_data(key_id, context)?;
        let sealed = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| TokenError::key_provider("data key encryption failed"))?;

        let mut blob = Vec::with_capacity(3 + key_id.len() + NONCE_LEN + sealed.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&key_id_len.to_be_bytes());
        blob.extend_from_slice(key_id.as_bytes());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    fn open(
        &self,
        blob: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<Zeroizing<Vec<u8>>, TokenError> {
        let malformed = || TokenError::key_provider("malformed ciphertext blob");

        let (&version, rest) = blob.split_first().ok_or_else(malformed)?;
        if version != BLOB_VERSION {
            return Err(TokenError::key_provider(format!(
                "unsupported ciphertext version {}",
                version
            )));
        }
        if rest.len() < 2 {
            return Err(malformed());
        }
        let (len_bytes, rest) = rest.split_at(2);
        let key_id_len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
        if rest.len() < key_id_len + NONCE_LEN {
            return Err(malformed());
        }
        let (key_id, rest) = rest.split_at(key_id_len);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        let key_id = std::str::from_utf8(key_id).map_err(|_| malformed())?;

        let aad = associated_data(key_id, context)?;
        let plaintext = self
            .cipher()?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                TokenError::key_provider("data key decryption failed: wrong key or encryption context")
            })?;

        Ok(Zeroizing::new(plaintext))
    }
}

/// Key id and canonical context, bound to the ciphertext.
fn associated_data(key_id: &str, context: Option<&EncryptionContext>) -> Result<Vec<u8>, TokenError> {
    let mut aad = key_id.as_bytes().to_vec();
    aad.push(0);
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        let canonical = serde_json::to_vec(context)
            .map_err(|e| TokenError::key_provider(format!("invalid encryption context: {}", e)))?;
        aad.extend_from_slice(&canonical);
    }
    Ok(aad)
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    #[instrument(skip(self, context))]
    async fn generate_data_key(
        &self,
        key_id: &str,
        context: Option<&EncryptionContext>,
    ) -> Result<DataKey, TokenError> {
        if key_id.is_empty() {
            return Err(TokenError::key_provider("key id is required"));
        }

        let mut plaintext = Zeroizing::new(vec![0u8; DATA_KEY_LEN]);
        rand::thread_rng().fill_bytes(plaintext.as_mut_slice());
        let ciphertext = self.seal(key_id, &plaintext, context)?;

        debug!(ciphertext_len = ciphertext.len(), "Generated data key");
        Ok(DataKey {
            plaintext,
            ciphertext,
        })
    }

    #[instrument(skip(self, ciphertext, context), fields(ciphertext_len = ciphertext.len()))]
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<Zeroizing<Vec<u8>>, TokenError> {
        self.open(ciphertext, context)
    }
}
