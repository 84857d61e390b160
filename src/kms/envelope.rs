//! Envelope-encrypted token service.
//!
//! Every token is signed with its own data key. Only the provider-encrypted
//! form of that key travels in the token header; the plaintext lives in the
//! bounded [`KeyCache`] and nowhere else.
//!
//! Validation runs as a fixed sequence and stops at the first failure:
//! parse, check algorithm, resolve key (cache hit or provider decrypt),
//! verify signature, check claims.

use crate::error::TokenError;
use crate::jwt::claims::{Claims, TokenGrant};
use crate::jwt::serializer::{self, ENVELOPE_ALGORITHM};
use crate::jwt::signer::TokenSigner;
use crate::kms::provider::{EncryptionContext, KeyProvider};
use crate::metrics::TokenMetrics;
use crate::storage::cache::{fingerprint, KeyCache, KeyCacheConfig};
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Added to the token lifetime when caching a data key. Larger than any
/// expected clock skew and than the sweep interval.
pub const CACHE_TTL_BUFFER: Duration = Duration::from_secs(15 * 60);

/// Default bound on a single key provider call.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Security parameters of one signing identity.
#[derive(Debug, Clone)]
pub struct EnvelopeConfig {
    /// Provider key the data keys are generated under.
    pub key_id: String,
    pub issuer: String,
    pub audience: String,
    /// Token lifetime.
    pub expiration: Duration,
    /// Provider encryption context, passed on generate and decrypt.
    pub encryption_context: Option<EncryptionContext>,
    pub cache: KeyCacheConfig,
    /// Deadline for each provider call.
    pub provider_timeout: Duration,
}

impl EnvelopeConfig {
    #[must_use]
    pub fn new(key_id: impl Into<String>, expiration: Duration) -> Self {
        Self {
            key_id: key_id.into(),
            issuer: "jupyter-k8s".to_string(),
            audience: "workspace-ui".to_string(),
            expiration,
            encryption_context: None,
            cache: KeyCacheConfig::default(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    #[must_use]
    pub fn with_encryption_context(mut self, context: Option<EncryptionContext>) -> Self {
        self.encryption_context = context;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: KeyCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub const fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Config` if the key id is empty or the expiration is zero.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.key_id.is_empty() {
            return Err(TokenError::config("key id is required for envelope signing"));
        }
        if self.expiration.is_zero() {
            return Err(TokenError::config("token expiration must be greater than zero"));
        }
        Ok(())
    }
}

/// Issues and validates HS384 tokens signed with per-token data keys.
///
/// One instance per signing identity, shared behind an `Arc` by all request
/// handlers. Two instances never share a cache.
pub struct EnvelopeTokenService {
    provider: Arc<dyn KeyProvider>,
    config: EnvelopeConfig,
    cache: KeyCache,
    metrics: Arc<TokenMetrics>,
}

impl EnvelopeTokenService {
    /// Create a service for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        provider: Arc<dyn KeyProvider>,
        config: EnvelopeConfig,
        metrics: Arc<TokenMetrics>,
    ) -> Result<Self, TokenError> {
        config.validate()?;
        let cache = KeyCache::new(config.cache.clone());
        Ok(Self {
            provider,
            config,
            cache,
            metrics,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    /// The data key cache owned by this service.
    #[must_use]
    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }

    fn cache_ttl(&self) -> Duration {
        self.config.expiration.saturating_add(CACHE_TTL_BUFFER)
    }

    fn context(&self) -> Option<&EncryptionContext> {
        self.config.encryption_context.as_ref()
    }

    /// Run one provider call under the configured deadline.
    ///
    /// The deadline is enforced before any cache write, so a timed-out call
    /// leaves nothing behind.
    async fn call_provider<T, F>(&self, operation: &'static str, call: F) -> Result<T, TokenError>
    where
        F: Future<Output = Result<T, TokenError>> + Send,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.config.provider_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(TokenError::KeyProvider(msg))) => Err(TokenError::KeyProvider(msg)),
            Ok(Err(other)) => Err(TokenError::key_provider(other.to_string())),
            Err(_) => Err(TokenError::key_provider(format!(
                "{} timed out after {:?}",
                operation, self.config.provider_timeout
            ))),
        };

        self.metrics
            .record_provider_operation(operation, result.is_ok(), start.elapsed());
        if let Err(e) = &result {
            error!(error = %e, operation, key_id = %self.config.key_id, "Key provider call failed");
        }
        result
    }

    /// Find the plaintext for `encrypted_key`, decrypting through the provider on a miss.
    async fn resolve_key(&self, encrypted_key: &[u8]) -> Result<Zeroizing<Vec<u8>>, TokenError> {
        let fingerprint = fingerprint(encrypted_key);

        if let Some(key) = self.cache.lookup(&fingerprint).await {
            self.metrics.record_cache_hit();
            return Ok(key);
        }
        self.metrics.record_cache_miss();

        let swept = self.cache.sweep_expired().await;
        self.metrics.record_evictions("expired", swept);

        let plaintext = self
            .call_provider("decrypt", self.provider.decrypt(encrypted_key, self.context()))
            .await?;

        let evicted = self
            .cache
            .insert(fingerprint, plaintext.clone(), self.cache_ttl())
            .await;
        self.metrics.record_evictions("capacity", evicted);

        debug!("Data key resolved through provider");
        Ok(plaintext)
    }

    async fn validate_inner(&self, token: &str) -> Result<Claims, TokenError> {
        let unverified = serializer::decode_unverified(token)?;

        let declared = unverified.header().alg.as_str();
        if declared != ENVELOPE_ALGORITHM {
            warn!(algorithm = %declared, "Rejected token with unexpected signing algorithm");
            return Err(TokenError::UnexpectedAlgorithm(format!(
                "{}, expected {}",
                declared, ENVELOPE_ALGORITHM
            )));
        }

        let encrypted_key = unverified.header().encrypted_data_key()?;
        let key = self.resolve_key(&encrypted_key).await?;
        let claims = unverified.verify(&key)?;

        // Checked here regardless of how the payload was decoded
        let now = Utc::now();
        if claims.is_not_yet_valid_at(now) {
            return Err(TokenError::invalid_claims("token not valid yet"));
        }
        if claims.is_expired_at(now) {
            return Err(TokenError::TokenExpired);
        }

        Ok(claims)
    }
}

#[async_trait]
impl TokenSigner for EnvelopeTokenService {
    #[instrument(skip(self, grant), fields(key_id = %self.config.key_id, token_type = grant.token_type_label()))]
    async fn generate_token(&self, grant: &TokenGrant) -> Result<String, TokenError> {
        let data_key = self
            .call_provider(
                "generate_data_key",
                self.provider
                    .generate_data_key(&self.config.key_id, self.context()),
            )
            .await?;

        let claims = Claims::issue(
            grant,
            &self.config.issuer,
            &self.config.audience,
            self.config.expiration,
            Utc::now(),
        );
        let token = serializer::encode(&data_key.ciphertext, &claims, &data_key.plaintext)?;

        let evicted = self
            .cache
            .insert(
                fingerprint(&data_key.ciphertext),
                data_key.plaintext,
                self.cache_ttl(),
            )
            .await;
        self.metrics.record_evictions("capacity", evicted);
        self.metrics
            .record_issued(grant.token_type_label(), ENVELOPE_ALGORITHM);

        debug!(user = %grant.user, "Issued envelope token");
        Ok(token)
    }

    #[instrument(skip(self, token), fields(key_id = %self.config.key_id, request_id = %Uuid::new_v4()))]
    async fn validate_token(&self, token: &str) -> Result<Claims, TokenError> {
        let result = self.validate_inner(token).await;
        match &result {
            Ok(_) => self.metrics.record_validation("accepted"),
            Err(e) => {
                debug!(error = %e, "Envelope token rejected");
                self.metrics.record_validation(e.code());
            }
        }
        result
    }

    fn algorithm(&self) -> &str {
        ENVELOPE_ALGORITHM
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::claims::TokenType;
    use crate::kms::mock::MockKeyProvider;

    fn service(kms: Arc<MockKeyProvider>, expiration: Duration) -> EnvelopeTokenService {
        EnvelopeTokenService::new(
            kms,
            EnvelopeConfig::new("alias/workspace-jwt", expiration),
            Arc::new(TokenMetrics::new().unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(EnvelopeConfig::new("", Duration::from_secs(60)).validate().is_err());
        assert!(EnvelopeConfig::new("k", Duration::ZERO).validate().is_err());
        assert!(EnvelopeConfig::new("k", Duration::from_secs(60)).validate().is_ok());
    }

    #[tokio::test]
    async fn test_generate_caches_key() {
        let kms = Arc::new(MockKeyProvider::new());
        let service = service(kms.clone(), Duration::from_secs(1800));

        let token = service
            .generate_token(&TokenGrant::new("alice", TokenType::Session))
            .await
            .unwrap();

        assert_eq!(kms.generate_calls(), 1);
        assert_eq!(service.cache().len().await, 1);

        let claims = service.validate_token(&token).await.unwrap();
        assert_eq!(claims.user, "alice");
        assert_eq!(kms.decrypt_calls(), 0);
        assert_eq!(service.metrics.cache_lookups("hit"), 1);
    }

    #[tokio::test]
    async fn test_generate_failure_is_key_provider_error() {
        let kms = Arc::new(MockKeyProvider::new());
        kms.set_fail_generate(true);
        let service = service(kms.clone(), Duration::from_secs(60));

        let result = service
            .generate_token(&TokenGrant::new("alice", TokenType::Session))
            .await;

        assert!(matches!(result, Err(TokenError::KeyProvider(_))));
        assert!(service.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_decrypt_failure_is_key_provider_error() {
        let kms = Arc::new(MockKeyProvider::new());
        let service = service(kms.clone(), Duration::from_secs(60));
        let token = service
            .generate_token(&TokenGrant::new("alice", TokenType::Session))
            .await
            .unwrap();

        service.cache().clear().await;
        kms.set_fail_decrypt(true);

        let result = service.validate_token(&token).await;
        assert!(matches!(result, Err(TokenError::KeyProvider(_))));
        assert!(service.cache().is_empty().await);
        assert_eq!(service.metrics.validations(crate::error::TOKEN_KEY_PROVIDER_ERROR), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_leaves_cache_untouched() {
        let kms = Arc::new(MockKeyProvider::new());
        let service = EnvelopeTokenService::new(
            kms.clone(),
            EnvelopeConfig::new("k", Duration::from_secs(60))
                .with_provider_timeout(Duration::from_millis(100)),
            Arc::new(TokenMetrics::new().unwrap()),
        )
        .unwrap();

        kms.set_delay(Duration::from_secs(1));
        let result = service
            .generate_token(&TokenGrant::new("alice", TokenType::Session))
            .await;

        assert!(matches!(result, Err(TokenError::KeyProvider(msg)) if msg.contains("timed out")));
        assert!(service.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_two_services_do_not_share_cache() {
        let kms = Arc::new(MockKeyProvider::new());
        let a = service(kms.clone(), Duration::from_secs(60));
        let b = service(kms.clone(), Duration::from_secs(60));

        let token = a
            .generate_token(&TokenGrant::new("alice", TokenType::Session))
            .await
            .unwrap();
        b.validate_token(&token).await.unwrap();

        assert_eq!(kms.decrypt_calls(), 1);
        assert_eq!(b.cache().len().await, 1);
    }
}
