//! Prometheus metrics for token issuance and validation.
//!
//! Metrics live in a registry owned by each `TokenMetrics` value, so two
//! services built in one process (or in one test binary) never collide on
//! registration.

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::time::Duration;

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Metrics collector for token services.
pub struct TokenMetrics {
    registry: Registry,
    tokens_issued: CounterVec,
    validations: CounterVec,
    cache_lookups: CounterVec,
    cache_evictions: CounterVec,
    provider_operations: CounterVec,
    provider_latency: HistogramVec,
}

impl TokenMetrics {
    /// Create a collector with its own registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric definition is rejected by prometheus.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tokens_issued = CounterVec::new(
            Opts::new("workspace_token_tokens_issued_total", "Total tokens issued"),
            &["token_type", "algorithm"],
        )?;
        let validations = CounterVec::new(
            Opts::new("workspace_token_validations_total", "Token validations by outcome"),
            &["outcome"],
        )?;
        let cache_lookups = CounterVec::new(
            Opts::new("workspace_token_key_cache_lookups_total", "Data key cache lookups"),
            &["result"],
        )?;
        let cache_evictions = CounterVec::new(
            Opts::new("workspace_token_key_cache_evictions_total", "Data keys removed from cache"),
            &["reason"],
        )?;
        let provider_operations = CounterVec::new(
            Opts::new("workspace_token_key_provider_operations_total", "Key provider operations"),
            &["operation", "status"],
        )?;
        let provider_latency = HistogramVec::new(
            HistogramOpts::new(
                "workspace_token_key_provider_latency_seconds",
                "Key provider operation latency",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["operation"],
        )?;

        registry.register(Box::new(tokens_issued.clone()))?;
        registry.register(Box::new(validations.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(cache_evictions.clone()))?;
        registry.register(Box::new(provider_operations.clone()))?;
        registry.register(Box::new(provider_latency.clone()))?;

        Ok(Self {
            registry,
            tokens_issued,
            validations,
            cache_lookups,
            cache_evictions,
            provider_operations,
            provider_latency,
        })
    }

    /// Registry to expose on a scrape endpoint.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_issued(&self, token_type: &str, algorithm: &str) {
        self.tokens_issued
            .with_label_values(&[token_type, algorithm])
            .inc();
    }

    /// Record a validation outcome: `accepted` or an error code.
    pub fn record_validation(&self, outcome: &str) {
        self.validations.with_label_values(&[outcome]).inc();
    }

    pub fn record_cache_hit(&self) {
        self.cache_lookups.with_label_values(&["hit"]).inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_lookups.with_label_values(&["miss"]).inc();
    }

    pub fn record_evictions(&self, reason: &str, count: usize) {
        if count > 0 {
            self.cache_evictions
                .with_label_values(&[reason])
                .inc_by(count as f64);
        }
    }

    pub fn record_provider_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "failure" };
        self.provider_operations
            .with_label_values(&[operation, status])
            .inc();
        self.provider_latency
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Current count for a cache lookup result (`hit` or `miss`).
    #[must_use]
    pub fn cache_lookups(&self, result: &str) -> u64 {
        self.cache_lookups.with_label_values(&[result]).get() as u64
    }

    /// Current count for a validation outcome.
    #[must_use]
    pub fn validations(&self, outcome: &str) -> u64 {
        self.validations.with_label_values(&[outcome]).get() as u64
    }
}
