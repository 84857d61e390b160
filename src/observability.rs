//! Tracing subscriber setup for the token service binary.

use crate::error::TokenError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const SERVICE_NAME: &str = "workspace-token";

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit one JSON object per event
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_output: false,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    #[must_use]
    pub const fn with_json_output(mut self, json_output: bool) -> Self {
        self.json_output = json_output;
        self
    }

    /// Filter for this config. `RUST_LOG` takes precedence.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Config` if the configured level is not a valid directive.
    pub fn env_filter(&self) -> Result<EnvFilter, TokenError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.log_level)
                .map_err(|e| TokenError::config(format!("Invalid LOG_LEVEL {}: {}", self.log_level, e))),
        }
    }
}

/// Install the global subscriber. Call once at startup.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<(), TokenError> {
    let filter = config.env_filter()?;

    let installed = if config.json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };

    installed.map_err(|e| TokenError::internal(format!("tracing already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.json_output);
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::default()
            .with_log_level("workspace_token=debug")
            .with_json_output(true);

        assert_eq!(config.log_level, "workspace_token=debug");
        assert!(config.json_output);
    }
}
