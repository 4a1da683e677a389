//! Resolve Resilience
//!
//! Protection and recovery around resolver calls:
//!
//! - [`CircuitBreakerRegistry`]: per-resolver-key breakers
//! - [`retry_with_backoff`]: exponential backoff with jitter
//! - [`FallbackChain`]: priority-ordered alternative strategies
//! - [`SimilarityIndex`]: search over past resolutions for the similarity fallback
//! - [`ErrorHandler`]: failure-policy state machine producing a
//!   [`TokenOutcome`](resolve_core::TokenOutcome) per failed token

#![warn(unreachable_pub)]

pub mod circuit_breaker;
pub mod context;
pub mod fallback;
pub mod handler;
pub mod retry;
pub mod similarity;

pub use circuit_breaker::{
    allowed_transitions, validate_transition, Admission, CircuitBreakerConfig,
    CircuitBreakerRegistry, CircuitBreakerStatus, CircuitError, CircuitState,
};
pub use context::ErrorContext;
pub use fallback::{
    BareDefaultFallback, DefaultValueTable, FallbackChain, FallbackStrategy, FallbackSuccess,
    PatternDefaultFallback, SimilarityFallback, StaticLookupFallback,
};
pub use handler::{ErrorHandler, FailureContext, RecoverySettings, RetryOperation};
pub use retry::{retry_after_failure, retry_with_backoff, should_retry, RetryConfig, RetryFailure};
pub use similarity::{LexicalSimilarityIndex, SimilarMatch, SimilarityIndex};
