//! Failure policies
//!
//! A [`FailurePolicy`] is chosen per processing call (or taken from the
//! engine default) and stays immutable for the duration of that call.
//! Knobs left at their defaults are not merged with engine settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How unresolved tokens are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Stale cache, then default values, then the literal placeholder
    GracefulDegradation,
    /// Priority-ordered fallback chain, then retries of the resolver
    FallbackResolver,
    /// Any cached value regardless of age, else graceful degradation
    CacheStaleOk,
    /// Mark the token skipped so dependents proceed
    DependencySkip,
    /// Retry with backoff, then propagate
    #[default]
    ErrorPropagation,
}

impl FailureMode {
    /// Kebab-case name
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FailureMode::GracefulDegradation => "graceful-degradation",
            FailureMode::FallbackResolver => "fallback-resolver",
            FailureMode::CacheStaleOk => "cache-stale-ok",
            FailureMode::DependencySkip => "dependency-skip",
            FailureMode::ErrorPropagation => "error-propagation",
        }
    }
}

/// Policy rejected before any token is resolved
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum PolicyError {
    /// Every attempt would time out immediately
    #[error("timeout_ms must be > 0")]
    ZeroTimeout,

    /// Backoff would shrink or is not a number
    #[error("backoff_multiplier must be a finite value >= 1.0, got {0}")]
    InvalidBackoff(f64),
}

/// Caller-selected failure policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailurePolicy {
    /// Failure mode
    pub mode: FailureMode,
    /// Re-invocations after the first failed attempt
    pub max_retries: u32,
    /// Backoff growth factor
    pub backoff_multiplier: f64,
    /// Per-attempt resolver timeout in milliseconds
    pub timeout_ms: u64,
    /// Restricts the fallback chain to these strategy names when non-empty
    pub fallback_resolvers: Vec<String>,
    /// Whether graceful degradation may serve stale cache entries
    pub allow_stale_cache: bool,
}

impl FailurePolicy {
    /// Default policy
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy with the given mode and default knobs
    ///
    /// The knobs are the crate defaults, not an engine's retry settings.
    #[inline]
    #[must_use]
    pub fn with_mode(mode: FailureMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// With max retries
    #[inline]
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// With backoff multiplier
    #[inline]
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// With resolver timeout
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With allowed fallback strategy names
    #[inline]
    #[must_use]
    pub fn fallback_resolvers(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fallback_resolvers = names.into_iter().map(Into::into).collect();
        self
    }

    /// Allow stale cache entries during graceful degradation
    #[inline]
    #[must_use]
    pub fn allow_stale_cache(mut self, allow: bool) -> Self {
        self.allow_stale_cache = allow;
        self
    }

    /// Resolver timeout as a duration
    #[inline]
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Total attempts allowed (first call plus retries)
    #[inline]
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Check the numeric knobs
    ///
    /// # Errors
    /// Returns [`PolicyError`] for a zero timeout or a backoff multiplier
    /// below 1.0
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.timeout_ms == 0 {
            return Err(PolicyError::ZeroTimeout);
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidBackoff(self.backoff_multiplier));
        }
        Ok(())
    }

    /// Whether a fallback strategy name is allowed by this policy
    #[must_use]
    pub fn allows_fallback(&self, name: &str) -> bool {
        self.fallback_resolvers.is_empty() || self.fallback_resolvers.iter().any(|n| n == name)
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            mode: FailureMode::ErrorPropagation,
            max_retries: 3,
            backoff_multiplier: 2.0,
            timeout_ms: 5_000,
            fallback_resolvers: Vec::new(),
            allow_stale_cache: false,
        }
    }
}
