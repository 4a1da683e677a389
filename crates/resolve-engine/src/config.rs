//! Engine configuration
//!
//! Loaded from TOML; every field has a default so partial files work.
//!
//! ```toml
//! [resilience]
//! max_concurrent_resolutions = 10
//! circuit_breaker_threshold = 5
//! timeout_ms = 5000
//!
//! [resilience.retry_policy]
//! max_retries = 3
//! backoff_multiplier = 2.0
//!
//! [cache.ttl]
//! short_ms = 300000
//!
//! [fallback.default_values]
//! "METRICS" = 0
//! ```

use crate::error::ConfigError;
use resolve_cache::TtlClasses;
use resolve_core::{FailureMode, FailurePolicy};
use resolve_resilience::{CircuitBreakerConfig, DefaultValueTable, RecoverySettings, RetryConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Resilience settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Admission ceiling for in-flight resolver calls
    pub max_concurrent_resolutions: usize,
    /// Consecutive failures that open a breaker
    pub circuit_breaker_threshold: u32,
    /// Open-breaker cooldown in milliseconds
    pub circuit_breaker_cooldown_ms: u64,
    /// Resolver timeout in milliseconds
    pub timeout_ms: u64,
    /// Inactivity after which breakers are swept closed, in milliseconds
    pub maintenance_window_ms: u64,
    /// Retry backoff
    pub retry_policy: RetryConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_resolutions: 10,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_ms: 60_000,
            timeout_ms: 5_000,
            maintenance_window_ms: 300_000,
            retry_policy: RetryConfig::default(),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry capacity of the default store
    pub max_capacity: u64,
    /// Oldest stale entry that may be served, and retention of the default store
    pub stale_ceiling_ms: u64,
    /// TTL classes
    pub ttl: TtlClasses,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            stale_ceiling_ms: 24 * 60 * 60 * 1_000,
            ttl: TtlClasses::default(),
        }
    }
}

/// Fallback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Per-strategy timeout in milliseconds
    pub timeout_ms: u64,
    /// Minimum similarity score
    pub similarity_threshold: f64,
    /// Value for the `bare-default` strategy; strategy omitted when unset
    pub bare_default: Option<Value>,
    /// `static-lookup` table keyed by placeholder text or namespace
    pub static_table: HashMap<String, Value>,
    /// Graceful-degradation defaults keyed by `TYPE:namespace` or `TYPE`
    pub default_values: HashMap<String, Value>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1_000,
            similarity_threshold: 0.7,
            bare_default: None,
            static_table: HashMap::new(),
            default_values: HashMap::new(),
        }
    }
}

/// Analytics settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Sessions kept in the rolling buffer
    pub buffer_capacity: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1_000,
        }
    }
}

/// Engine limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Largest accepted input
    pub max_text_bytes: usize,
    /// Event channel capacity
    pub event_capacity: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_text_bytes: 1024 * 1024,
            event_capacity: 256,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Resilience
    pub resilience: ResilienceConfig,
    /// Cache
    pub cache: CacheConfig,
    /// Fallbacks
    pub fallback: FallbackConfig,
    /// Policy used when a call supplies none
    pub default_failure_policy: Option<FailurePolicy>,
    /// Analytics
    pub analytics: AnalyticsConfig,
    /// Limits
    pub engine: EngineLimits,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns error if the TOML is malformed or a value is out of range
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or its content is invalid
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.to_string()))
        }

        let r = &self.resilience;
        if r.max_concurrent_resolutions == 0 {
            return invalid("resilience.max_concurrent_resolutions must be >= 1");
        }
        if r.circuit_breaker_threshold == 0 {
            return invalid("resilience.circuit_breaker_threshold must be >= 1");
        }
        if r.timeout_ms == 0 {
            return invalid("resilience.timeout_ms must be > 0");
        }
        let retry = &r.retry_policy;
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return invalid("resilience.retry_policy.backoff_multiplier must be >= 1.0");
        }
        if retry.base_delay_ms > retry.max_backoff_ms {
            return invalid("resilience.retry_policy.base_delay_ms must not exceed max_backoff_ms");
        }
        if !(0.0..=1.0).contains(&self.fallback.similarity_threshold) {
            return invalid("fallback.similarity_threshold must be within 0.0..=1.0");
        }
        if self.fallback.timeout_ms == 0 {
            return invalid("fallback.timeout_ms must be > 0");
        }
        if self.analytics.buffer_capacity == 0 {
            return invalid("analytics.buffer_capacity must be >= 1");
        }
        if self.engine.max_text_bytes == 0 || self.engine.event_capacity == 0 {
            return invalid("engine.max_text_bytes and engine.event_capacity must be >= 1");
        }
        if let Some(policy) = &self.default_failure_policy {
            policy
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("default_failure_policy: {e}")))?;
        }
        Ok(())
    }

    /// Policy for calls that supply none
    #[must_use]
    pub fn default_policy(&self) -> FailurePolicy {
        self.default_failure_policy.clone().unwrap_or_else(|| {
            FailurePolicy::with_mode(FailureMode::ErrorPropagation)
                .max_retries(self.resilience.retry_policy.max_retries)
                .backoff_multiplier(self.resilience.retry_policy.backoff_multiplier)
                .timeout(Duration::from_millis(self.resilience.timeout_ms))
        })
    }

    /// Default policy with its mode swapped
    #[must_use]
    pub fn policy(&self, mode: FailureMode) -> FailurePolicy {
        FailurePolicy {
            mode,
            ..self.default_policy()
        }
    }

    /// Breaker settings
    #[must_use]
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(self.resilience.circuit_breaker_threshold)
            .with_cooldown(Duration::from_millis(self.resilience.circuit_breaker_cooldown_ms))
            .with_maintenance_window(Duration::from_millis(self.resilience.maintenance_window_ms))
    }

    /// Recovery settings for the error handler
    #[must_use]
    pub fn recovery_settings(&self) -> RecoverySettings {
        RecoverySettings {
            stale_ceiling: self.stale_ceiling(),
            default_values: DefaultValueTable::new(self.fallback.default_values.clone()),
            retry: self.resilience.retry_policy,
        }
    }

    /// Stale ceiling
    #[inline]
    #[must_use]
    pub fn stale_ceiling(&self) -> Duration {
        Duration::from_millis(self.cache.stale_ceiling_ms)
    }

    /// With admission ceiling
    #[inline]
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.resilience.max_concurrent_resolutions = max;
        self
    }

    /// With breaker threshold
    #[inline]
    #[must_use]
    pub fn with_circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.resilience.circuit_breaker_threshold = threshold;
        self
    }

    /// With breaker cooldown
    #[inline]
    #[must_use]
    pub fn with_circuit_breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.resilience.circuit_breaker_cooldown_ms = duration_ms(cooldown);
        self
    }

    /// With resolver timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.resilience.timeout_ms = duration_ms(timeout);
        self
    }

    /// With retry backoff
    #[inline]
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryConfig) -> Self {
        self.resilience.retry_policy = retry;
        self
    }

    /// With default failure policy
    #[inline]
    #[must_use]
    pub fn with_default_policy(mut self, policy: FailurePolicy) -> Self {
        self.default_failure_policy = Some(policy);
        self
    }

    /// With a graceful-degradation default (`TYPE:namespace` or `TYPE`)
    #[must_use]
    pub fn with_default_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fallback.default_values.insert(key.into(), value.into());
        self
    }

    /// With a static fallback (placeholder text or namespace)
    #[must_use]
    pub fn with_static_fallback(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fallback.static_table.insert(key.into(), value.into());
        self
    }

    /// With bare default fallback
    #[inline]
    #[must_use]
    pub fn with_bare_default(mut self, value: impl Into<Value>) -> Self {
        self.fallback.bare_default = Some(value.into());
        self
    }

    /// With input size limit
    #[inline]
    #[must_use]
    pub fn with_max_text_bytes(mut self, max: usize) -> Self {
        self.engine.max_text_bytes = max;
        self
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.resilience.max_concurrent_resolutions, 10);
        assert_eq!(config.resilience.circuit_breaker_threshold, 5);
        assert_eq!(config.resilience.retry_policy.max_backoff_ms, 5_000);
        assert_eq!(config.cache.ttl.medium_ms, 3_600_000);
        assert!((config.fallback.similarity_threshold - 0.7).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [resilience]
            circuit_breaker_threshold = 3

            [resilience.retry_policy]
            max_retries = 1

            [fallback.default_values]
            "DATA:artifact" = "n/a"
            "#,
        )
        .unwrap();

        assert_eq!(config.resilience.circuit_breaker_threshold, 3);
        assert_eq!(config.resilience.timeout_ms, 5_000);
        assert_eq!(config.resilience.retry_policy.max_retries, 1);
        assert_eq!(
            config.fallback.default_values.get("DATA:artifact"),
            Some(&Value::from("n/a"))
        );
    }

    #[test]
    fn default_policy_derives_from_resilience() {
        let config = EngineConfig::default().with_timeout(Duration::from_millis(250));
        let policy = config.default_policy();
        assert_eq!(policy.mode, FailureMode::ErrorPropagation);
        assert_eq!(policy.timeout_ms, 250);
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    fn policy_for_mode_keeps_resilience_knobs() {
        let mut config = EngineConfig::default().with_timeout(Duration::from_millis(750));
        config.resilience.retry_policy.max_retries = 1;
        config.resilience.retry_policy.backoff_multiplier = 1.5;

        let policy = config.policy(FailureMode::GracefulDegradation);
        assert_eq!(policy.mode, FailureMode::GracefulDegradation);
        assert_eq!(policy.timeout_ms, 750);
        assert_eq!(policy.max_retries, 1);
        assert!((policy.backoff_multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_timeout_default_policy_is_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [default_failure_policy]
            mode = "error-propagation"
            timeout_ms = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("default_failure_policy"));
    }

    #[test]
    fn explicit_default_policy_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [default_failure_policy]
            mode = "graceful-degradation"
            allow_stale_cache = true
            "#,
        )
        .unwrap();
        let policy = config.default_policy();
        assert_eq!(policy.mode, FailureMode::GracefulDegradation);
        assert!(policy.allow_stale_cache);
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    fn rejects_out_of_range() {
        let err = EngineConfig::from_toml_str("[resilience]\nmax_concurrent_resolutions = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_toml_str("[fallback]\nsimilarity_threshold = 1.5\n")
            .unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));

        assert!(matches!(
            EngineConfig::from_toml_str("resilience = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[analytics]\nbuffer_capacity = 5").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.analytics.buffer_capacity, 5);

        let missing = EngineConfig::from_file("/nonexistent/resolve.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
