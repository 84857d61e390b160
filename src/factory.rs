//! Signer construction from process configuration and per-workspace access strategies.

use crate::config::{Config, SigningType};
use crate::error::TokenError;
use crate::jwt::signer::TokenSigner;
use crate::jwt::standard::StandardSigner;
use crate::kms::envelope::{EnvelopeConfig, EnvelopeTokenService};
use crate::kms::provider::{EncryptionContext, KeyProvider};
use crate::metrics::TokenMetrics;
use crate::refresh::TokenManager;
use crate::storage::cache::KeyCacheConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Connection context key naming the provider key for the `aws` handler.
pub const KMS_KEY_ID_KEY: &str = "kmsKeyId";
/// Connection context key holding a JSON encryption context.
pub const ENCRYPTION_CONTEXT_KEY: &str = "encryptionContext";

pub const AWS_HANDLER: &str = "aws";
pub const WORKSPACE_ISSUER: &str = "jupyter-k8s";
pub const WORKSPACE_AUDIENCE: &str = "workspace-ui";

/// How connections to a workspace are created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessStrategy {
    pub create_connection_handler: String,
    pub create_connection_context: HashMap<String, String>,
}

/// Builds envelope signers for workspace access strategies.
///
/// All signers built by one factory share a provider and metrics but each
/// gets its own key cache.
pub struct SignerFactory {
    provider: Arc<dyn KeyProvider>,
    default_key_id: String,
    expiration: Duration,
    cache: KeyCacheConfig,
    provider_timeout: Duration,
    metrics: Arc<TokenMetrics>,
}

impl SignerFactory {
    pub fn new(
        provider: Arc<dyn KeyProvider>,
        default_key_id: impl Into<String>,
        expiration: Duration,
        metrics: Arc<TokenMetrics>,
    ) -> Self {
        Self {
            provider,
            default_key_id: default_key_id.into(),
            expiration,
            cache: KeyCacheConfig::default(),
            provider_timeout: crate::kms::envelope::DEFAULT_PROVIDER_TIMEOUT,
            metrics,
        }
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

    /// Signer for `strategy`; the default signer when there is none.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Config` for an unknown handler, a missing key id
    /// or an unparsable encryption context.
    pub fn create_signer(
        &self,
        strategy: Option<&AccessStrategy>,
    ) -> Result<Arc<dyn TokenSigner>, TokenError> {
        let handler = strategy.map_or("", |s| s.create_connection_handler.as_str());

        let (key_id, context) = match handler {
            "" => (self.default_key_id.clone(), None),
            AWS_HANDLER => {
                let ctx = strategy.map(|s| &s.create_connection_context);
                let key_id = ctx
                    .and_then(|c| c.get(KMS_KEY_ID_KEY))
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        TokenError::config(format!(
                            "{} is required in the connection context for the {} handler",
                            KMS_KEY_ID_KEY, AWS_HANDLER
                        ))
                    })?;
                let context = ctx
                    .and_then(|c| c.get(ENCRYPTION_CONTEXT_KEY))
                    .map(|raw| parse_encryption_context(raw))
                    .transpose()?;
                (key_id.clone(), context)
            }
            other => {
                return Err(TokenError::config(format!(
                    "unsupported connection handler: {}",
                    other
                )))
            }
        };

        let config = EnvelopeConfig::new(key_id, self.expiration)
            .with_issuer(WORKSPACE_ISSUER)
            .with_audience(WORKSPACE_AUDIENCE)
            .with_encryption_context(context)
            .with_cache(self.cache.clone())
            .with_provider_timeout(self.provider_timeout);

        info!(handler = %handler, key_id = %config.key_id, "Created envelope signer");
        let service = EnvelopeTokenService::new(self.provider.clone(), config, self.metrics.clone())?;
        Ok(Arc::new(service))
    }
}

/// Parse a JSON object of string pairs.
///
/// # Errors
///
/// Returns `TokenError::Config` if `raw` is not such an object.
pub fn parse_encryption_context(raw: &str) -> Result<EncryptionContext, TokenError> {
    serde_json::from_str(raw)
        .map_err(|e| TokenError::config(format!("invalid encryption context: {}", e)))
}

/// Build the token manager selected by `config`.
///
/// # Errors
///
/// Returns an error if the configuration does not describe a usable signer.
pub fn build_token_manager(
    config: &Config,
    provider: Arc<dyn KeyProvider>,
    metrics: Arc<TokenMetrics>,
) -> Result<TokenManager, TokenError> {
    config.validate()?;

    let signer: Arc<dyn TokenSigner> = match config.signing_type {
        SigningType::Standard => {
            let key = config
                .signing_key
                .as_deref()
                .ok_or_else(|| TokenError::config("JWT_SIGNING_KEY is required"))?;
            Arc::new(StandardSigner::new(
                key.as_bytes(),
                config.issuer.clone(),
                config.audience.clone(),
                config.expiration,
            ))
        }
        SigningType::Kms => {
            let context = config
                .encryption_context
                .as_deref()
                .map(parse_encryption_context)
                .transpose()?;
            let cache = KeyCacheConfig::default()
                .with_max_size(config.cache_max_size)
                .with_evict_batch_size(config.cache_evict_batch_size);
            let envelope = EnvelopeConfig::new(config.kms_key_id.clone(), config.expiration)
                .with_issuer(config.issuer.clone())
                .with_audience(config.audience.clone())
                .with_encryption_context(context)
                .with_cache(cache)
                .with_provider_timeout(config.provider_timeout);
            Arc::new(EnvelopeTokenService::new(provider, envelope, metrics)?)
        }
    };

    info!(
        signing_type = config.signing_type.as_str(),
        algorithm = signer.algorithm(),
        refresh_enabled = config.refresh.enabled,
        "Token manager ready"
    );
    Ok(TokenManager::new(signer, config.refresh))
}
