//! Error taxonomy for token resolution
//!
//! Token-level failures are values, not panics: every failure carries a
//! stable [`ErrorCode`], a category, and the two flags the failure policy
//! dispatches on (`retryable`, `fallback_available`).

use crate::token::{ResolverKey, TokenId};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No resolver registered for `TYPE:namespace`
    NoResolver,
    /// Resolver rejected the token during validation
    ValidationFailed,
    /// Circuit breaker rejected the call
    CircuitBreakerOpen,
    /// Resolver exceeded its time budget
    Timeout,
    /// Resolver failed or panicked
    ResolutionError,
    /// Token participates in, or sits behind, a dependency cycle
    CyclicDependency,
    /// A dependency ended unresolved
    DependencyFailed,
    /// Retry budget exhausted
    MaxRetriesExceeded,
    /// Fallback chain and retries exhausted
    AllFallbacksFailed,
}

impl ErrorCode {
    /// Wire representation
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoResolver => "NO_RESOLVER",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ResolutionError => "RESOLUTION_ERROR",
            ErrorCode::CyclicDependency => "CYCLIC_DEPENDENCY",
            ErrorCode::DependencyFailed => "DEPENDENCY_FAILED",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorCode::AllFallbacksFailed => "ALL_FALLBACKS_FAILED",
        }
    }

    /// Whether this code ends all recovery
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            ErrorCode::MaxRetriesExceeded | ErrorCode::AllFallbacksFailed
        )
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error category classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Extraction / validation
    Validation,
    /// Resolver invocation
    Resolution,
    /// Gate rejections and timeouts
    Resilience,
    /// Dependency planning
    Planning,
    /// Recovery exhausted
    Recovery,
}

/// A token-level resolution failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ResolutionError {
    /// Error code
    pub code: ErrorCode,
    /// Category
    pub category: ErrorCategory,
    /// Human-readable detail
    pub message: String,
    /// Whether a retry may succeed
    pub retryable: bool,
    /// Whether fallback strategies may be applied
    pub fallback_available: bool,
    /// Token the failure belongs to
    pub token_id: Option<TokenId>,
}

impl ResolutionError {
    /// Create error with explicit flags
    #[must_use]
    pub fn new(
        code: ErrorCode,
        category: ErrorCategory,
        message: impl Into<String>,
        retryable: bool,
        fallback_available: bool,
    ) -> Self {
        Self {
            code,
            category,
            message: message.into(),
            retryable,
            fallback_available,
            token_id: None,
        }
    }

    /// No resolver registered
    #[must_use]
    pub fn no_resolver(key: &ResolverKey) -> Self {
        Self::new(
            ErrorCode::NoResolver,
            ErrorCategory::Validation,
            format!("no resolver registered for {key}"),
            false,
            true,
        )
    }

    /// Resolver rejected the token
    #[must_use]
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ValidationFailed,
            ErrorCategory::Validation,
            message,
            false,
            true,
        )
    }

    /// Circuit breaker rejection
    #[must_use]
    pub fn circuit_open(key: &ResolverKey, retry_in: Duration) -> Self {
        Self::new(
            ErrorCode::CircuitBreakerOpen,
            ErrorCategory::Resilience,
            format!(
                "circuit breaker open for {key}, retry in {}ms",
                retry_in.as_millis()
            ),
            true,
            true,
        )
    }

    /// Resolver timed out
    #[must_use]
    pub fn timeout(key: &ResolverKey, after: Duration) -> Self {
        Self::new(
            ErrorCode::Timeout,
            ErrorCategory::Resilience,
            format!("resolver {key} timed out after {}ms", after.as_millis()),
            true,
            true,
        )
    }

    /// Resolver failed
    #[must_use]
    pub fn resolver_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ResolutionError,
            ErrorCategory::Resolution,
            message,
            true,
            true,
        )
    }

    /// Dependency cycle
    #[must_use]
    pub fn cyclic(path: &[TokenId]) -> Self {
        let rendered: Vec<&str> = path.iter().map(TokenId::as_str).collect();
        Self::new(
            ErrorCode::CyclicDependency,
            ErrorCategory::Planning,
            format!("cyclic dependency: {}", rendered.join(" -> ")),
            false,
            false,
        )
    }

    /// Blocked behind a cycle without being part of it
    #[must_use]
    pub fn blocked_by_cycle(blocker: &TokenId) -> Self {
        Self::new(
            ErrorCode::CyclicDependency,
            ErrorCategory::Planning,
            format!("blocked by cyclic dependency at {blocker}"),
            false,
            false,
        )
    }

    /// Dependency ended unresolved
    #[must_use]
    pub fn dependency_failed(dependency: &TokenId) -> Self {
        Self::new(
            ErrorCode::DependencyFailed,
            ErrorCategory::Planning,
            format!("dependency {dependency} did not resolve"),
            false,
            true,
        )
    }

    /// Retries exhausted
    #[must_use]
    pub fn max_retries_exceeded(attempts: u32, last: &ResolutionError) -> Self {
        Self::new(
            ErrorCode::MaxRetriesExceeded,
            ErrorCategory::Recovery,
            format!("gave up after {attempts} attempts: {last}"),
            false,
            false,
        )
    }

    /// Fallback chain and retries exhausted
    #[must_use]
    pub fn all_fallbacks_failed(last: &ResolutionError) -> Self {
        Self::new(
            ErrorCode::AllFallbacksFailed,
            ErrorCategory::Recovery,
            format!("all fallbacks failed: {last}"),
            false,
            false,
        )
    }

    /// Attach token id
    #[inline]
    #[must_use]
    pub fn for_token(mut self, id: &TokenId) -> Self {
        self.token_id = Some(id.clone());
        self
    }
}
