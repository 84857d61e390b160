//! Process configuration for the token service.
//!
//! Loaded from environment variables (and a `.env` file when present) and
//! validated at startup.

use crate::error::TokenError;
use crate::observability::TracingConfig;
use crate::refresh::RefreshPolicy;
use crate::storage::cache::{DEFAULT_EVICT_BATCH_SIZE, DEFAULT_MAX_CACHE_SIZE};
use base64::Engine as _;
use std::env;
use std::time::Duration;

/// Which signer backs the token manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningType {
    /// HS256 with a shared secret
    Standard,
    /// HS384 with per-token data keys from the key provider
    Kms,
}

impl SigningType {
    /// Parse signing type from string.
    pub fn parse(s: &str) -> Result<Self, TokenError> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "kms" => Ok(Self::Kms),
            _ => Err(TokenError::config(format!("Invalid JWT_SIGNING_TYPE: {}", s))),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Kms => "kms",
        }
    }
}

/// Token service configuration.
#[derive(Clone)]
pub struct Config {
    // JWT settings
    pub signing_type: SigningType,
    /// Shared secret for the standard signer
    pub signing_key: Option<String>,
    pub issuer: String,
    pub audience: String,
    /// Token lifetime
    pub expiration: Duration,
    pub refresh: RefreshPolicy,

    // KMS settings
    pub kms_key_id: String,
    /// Raw JSON object of string pairs
    pub encryption_context: Option<String>,
    pub cache_max_size: usize,
    pub cache_evict_batch_size: usize,
    pub provider_timeout: Duration,
    /// Master key for the local key provider
    pub master_key: [u8; 32],

    pub tracing: TracingConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("signing_type", &self.signing_type)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiration", &self.expiration)
            .field("refresh", &self.refresh)
            .field("kms_key_id", &self.kms_key_id)
            .field("encryption_context", &self.encryption_context)
            .field("cache_max_size", &self.cache_max_size)
            .field("cache_evict_batch_size", &self.cache_evict_batch_size)
            .field("provider_timeout", &self.provider_timeout)
            .field("master_key", &"<redacted>")
            .field("tracing", &self.tracing)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, TokenError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a variable if set.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TokenError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let signing_type =
            SigningType::parse(&var("JWT_SIGNING_TYPE").unwrap_or_else(|| "kms".to_string()))?;
        let signing_key = var("JWT_SIGNING_KEY");
        let issuer = var("JWT_ISSUER").unwrap_or_else(|| "workspaces-auth".to_string());
        let audience = var("JWT_AUDIENCE").unwrap_or_else(|| "workspace-users".to_string());
        let expiration = Duration::from_secs(parse_var(&var, "JWT_EXPIRATION", 3600)?);

        let refresh = RefreshPolicy {
            enabled: parse_var(&var, "JWT_REFRESH_ENABLE", true)?,
            window: Duration::from_secs(parse_var(&var, "JWT_REFRESH_WINDOW", 900)?),
            horizon: Duration::from_secs(parse_var(&var, "JWT_REFRESH_HORIZON", 43200)?),
        };

        let kms_key_id = var("KMS_KEY_ID").unwrap_or_default();
        let encryption_context = var("KMS_ENCRYPTION_CONTEXT");
        let cache_max_size = parse_var(&var, "KMS_CACHE_MAX_SIZE", DEFAULT_MAX_CACHE_SIZE)?;
        let cache_evict_batch_size =
            parse_var(&var, "KMS_CACHE_EVICT_BATCH_SIZE", DEFAULT_EVICT_BATCH_SIZE)?;
        let provider_timeout = Duration::from_secs(parse_var(&var, "KMS_PROVIDER_TIMEOUT", 5)?);
        let master_key = parse_master_key(var("KMS_MASTER_KEY").as_deref())?;

        let tracing = TracingConfig::default()
            .with_log_level(var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()))
            .with_json_output(parse_var(&var, "LOG_JSON", false)?);

        let config = Self {
            signing_type,
            signing_key,
            issuer,
            audience,
            expiration,
            refresh,
            kms_key_id,
            encryption_context,
            cache_max_size,
            cache_evict_batch_size,
            provider_timeout,
            master_key,
            tracing,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.expiration.is_zero() {
            return Err(TokenError::config("JWT_EXPIRATION must be greater than zero"));
        }
        if self.refresh.window > self.expiration {
            return Err(TokenError::config(format!(
                "JWT_REFRESH_WINDOW ({}s) must not exceed JWT_EXPIRATION ({}s)",
                self.refresh.window.as_secs(),
                self.expiration.as_secs()
            )));
        }
        if self.expiration > self.refresh.horizon {
            return Err(TokenError::config(format!(
                "JWT_EXPIRATION ({}s) must not exceed JWT_REFRESH_HORIZON ({}s)",
                self.expiration.as_secs(),
                self.refresh.horizon.as_secs()
            )));
        }
        if self.provider_timeout.is_zero() {
            return Err(TokenError::config("KMS_PROVIDER_TIMEOUT must be greater than zero"));
        }

        match self.signing_type {
            SigningType::Kms if self.kms_key_id.is_empty() => Err(TokenError::config(
                "KMS_KEY_ID is required when JWT_SIGNING_TYPE is kms",
            )),
            SigningType::Standard if self.signing_key.is_none() => Err(TokenError::config(
                "JWT_SIGNING_KEY is required when JWT_SIGNING_TYPE is standard",
            )),
            _ => Ok(()),
        }
    }
}

/// Parse variable with default value.
fn parse_var<T, F>(var: &F, name: &str, default: T) -> Result<T, TokenError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| TokenError::config(format!("Invalid {}: {}", name, e))),
        None => Ok(default),
    }
}

/// Decode the local provider master key, or generate one for development.
fn parse_master_key(value: Option<&str>) -> Result<[u8; 32], TokenError> {
    match value {
        Some(key) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(key.trim())
                .map_err(|e| TokenError::config(format!("Invalid KMS_MASTER_KEY: {}", e)))?;

            <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
                TokenError::config(format!("KMS_MASTER_KEY must be 32 bytes, got {}", bytes.len()))
            })
        }
        None => {
            use rand::RngCore;
            let mut key = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            Ok(key)
        }
    }
}
