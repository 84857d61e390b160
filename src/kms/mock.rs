use crate::error::TokenError;
use crate::kms::local::LocalKeyProvider;
use crate::kms::provider::{DataKey, EncryptionContext, KeyProvider};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use zeroize::Zeroizing;

/// Counting key provider for tests.
///
/// Delegates to a [`LocalKeyProvider`], counts calls, and can be told to fail
/// or to stall so callers can exercise error and timeout paths.
pub struct MockKeyProvider {
    inner: LocalKeyProvider,
    generate_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
    fail_generate: AtomicBool,
    fail_decrypt: AtomicBool,
    delay_millis: AtomicU64,
}

impl MockKeyProvider {
    pub fn new() -> Self {
        MockKeyProvider {
            inner: LocalKeyProvider::ephemeral(),
            generate_calls: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
            fail_generate: AtomicBool::new(false),
            fail_decrypt: AtomicBool::new(false),
            delay_millis: AtomicU64::new(0),
        }
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_generate(&self, fail: bool) {
        self.fail_generate.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_decrypt(&self, fail: bool) {
        self.fail_decrypt.store(fail, Ordering::SeqCst);
    }

    /// Stall every call by `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_millis.store(millis, Ordering::SeqCst);
    }

    async fn stall(&self) {
        let millis = self.delay_millis.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

impl Default for MockKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyProvider for MockKeyProvider {
    async fn generate_data_key(
        &self,
        key_id: &str,
        context: Option<&EncryptionContext>,
    ) -> Result<DataKey, TokenError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(TokenError::key_provider("mock: generate data key throttled"));
        }
        self.inner.generate_data_key(key_id, context).await
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<Zeroizing<Vec<u8>>, TokenError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        if self.fail_decrypt.load(Ordering::SeqCst) {
            return Err(TokenError::key_provider("mock: access denied"));
        }
        self.inner.decrypt(ciphertext, context).await
    }
}
