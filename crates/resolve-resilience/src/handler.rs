//! Failure-policy state machine
//!
//! Every token that does not resolve through its primary path ends here and
//! leaves with exactly one [`TokenOutcome`]. Retries and fallbacks are kept
//! apart: retries re-invoke the primary resolver only, fallbacks never retry.

use crate::context::ErrorContext;
use crate::fallback::{DefaultValueTable, FallbackChain};
use crate::retry::{retry_after_failure, should_retry, RetryConfig};
use chrono::Utc;
use futures::future::BoxFuture;
use resolve_cache::ResolutionCache;
use resolve_core::{
    skipped_marker, FailureMode, FailurePolicy, ResolutionError, ResolverContext, ResolverResult,
    Token, TokenOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Re-invocation of the primary resolver; receives the 1-based attempt number
pub type RetryOperation<'a> =
    dyn Fn(u32) -> BoxFuture<'a, Result<ResolverResult, ResolutionError>> + Send + Sync + 'a;

/// Everything the handler needs about one failure
///
/// `'a` bounds the borrowed inputs, `'r` the futures the retry operation returns.
pub struct FailureContext<'a, 'r> {
    /// Failing token
    pub token: &'a Token,
    /// Error of the failed attempt
    pub error: ResolutionError,
    /// Caller context
    pub resolver_context: &'a ResolverContext,
    /// Active policy
    pub policy: &'a FailurePolicy,
    /// Primary resolver re-invocation, when one exists
    pub retry: Option<&'a RetryOperation<'r>>,
}

impl std::fmt::Debug for FailureContext<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureContext")
            .field("token", &self.token.id)
            .field("error", &self.error)
            .field("mode", &self.policy.mode)
            .field("retry", &self.retry.is_some())
            .finish()
    }
}

/// Recovery settings shared by every call
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    /// Oldest stale entry graceful degradation may serve
    pub stale_ceiling: Duration,
    /// Graceful-degradation defaults
    pub default_values: DefaultValueTable,
    /// Backoff settings; count and multiplier come from the policy
    pub retry: RetryConfig,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            stale_ceiling: Duration::from_secs(24 * 60 * 60),
            default_values: DefaultValueTable::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Failure-mode dispatcher
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    cache: Arc<dyn ResolutionCache>,
    fallbacks: FallbackChain,
    settings: RecoverySettings,
}

impl ErrorHandler {
    /// Create handler
    #[must_use]
    pub fn new(
        cache: Arc<dyn ResolutionCache>,
        fallbacks: FallbackChain,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            cache,
            fallbacks,
            settings,
        }
    }

    /// Fallback chain
    #[inline]
    #[must_use]
    pub fn fallbacks(&self) -> &FallbackChain {
        &self.fallbacks
    }

    /// Recovery settings
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    /// Route a failure through the policy's mode
    pub async fn handle(&self, failure: FailureContext<'_, '_>) -> TokenOutcome {
        let FailureContext {
            token,
            error,
            resolver_context,
            policy,
            retry,
        } = failure;
        let error = error.for_token(&token.id);
        debug!(
            token_id = %token.id,
            code = %error.code,
            mode = policy.mode.as_str(),
            "handling resolution failure"
        );
        metrics::counter!("resolve.failures.handled.total", "mode" => policy.mode.as_str())
            .increment(1);

        let outcome = match policy.mode {
            FailureMode::GracefulDegradation => {
                self.degrade(token, error, policy.allow_stale_cache).await
            }
            FailureMode::CacheStaleOk => match self.any_cached(token).await {
                Some(result) => TokenOutcome::Resolved(result),
                None => self.degrade(token, error, false).await,
            },
            FailureMode::DependencySkip => {
                info!(token_id = %token.id, "skipping failed token");
                TokenOutcome::Skipped {
                    marker: skipped_marker(&token.id),
                    error,
                }
            }
            FailureMode::ErrorPropagation => {
                let mut context =
                    ErrorContext::new(token.id.clone(), error, policy.total_attempts(), resolver_context);
                match self.retry(policy, retry, &mut context).await {
                    Some(result) => TokenOutcome::Resolved(result),
                    None => TokenOutcome::Failed(self.propagated(&context, false)),
                }
            }
            FailureMode::FallbackResolver => {
                self.fallback_then_retry(token, error, resolver_context, policy, retry)
                    .await
            }
        };

        if let Some(err) = outcome.error() {
            warn!(token_id = %token.id, code = %err.code, kind = ?outcome.kind(), "token unresolved");
        }
        outcome
    }

    async fn fallback_then_retry(
        &self,
        token: &Token,
        error: ResolutionError,
        resolver_context: &ResolverContext,
        policy: &FailurePolicy,
        retry: Option<&RetryOperation<'_>>,
    ) -> TokenOutcome {
        let fallback_available = error.fallback_available;
        let mut context =
            ErrorContext::new(token.id.clone(), error, policy.total_attempts(), resolver_context);

        if fallback_available {
            match self.fallbacks.run(token, policy, &mut context).await {
                Ok(success) => return TokenOutcome::Resolved(success.result),
                Err(err) => debug!(token_id = %token.id, %err, "fallback chain exhausted"),
            }
        }

        // Retries follow only on the primary error, not on fallback errors
        if let Some(result) = self.retry(policy, retry, &mut context).await {
            return TokenOutcome::Resolved(result);
        }
        TokenOutcome::Failed(self.propagated(&context, fallback_available))
    }

    /// Retry the primary resolver; `None` when retries are unavailable or spent
    async fn retry(
        &self,
        policy: &FailurePolicy,
        retry: Option<&RetryOperation<'_>>,
        context: &mut ErrorContext<'_>,
    ) -> Option<ResolverResult> {
        let operation = retry?;
        let first = context.original_error()?.clone();
        if policy.max_retries == 0 || !should_retry(&first) {
            return None;
        }
        let config = self.settings.retry.for_policy(policy);
        match retry_after_failure(&config, first, |attempt| operation(attempt)).await {
            Ok(result) => Some(result),
            Err(failure) => {
                // history[0] is the first error, already recorded
                let attempts = failure.attempts;
                context.extend(failure.history.into_iter().skip(1));
                context.attempt = attempts;
                None
            }
        }
    }

    fn propagated(&self, context: &ErrorContext<'_>, fallback_attempted: bool) -> ResolutionError {
        let fallback = ResolutionError::resolver_failed("unknown failure");
        let original = context.original_error().unwrap_or(&fallback);
        let last = context.last_error().unwrap_or(original);
        let error = if fallback_attempted {
            ResolutionError::all_fallbacks_failed(last)
        } else if context.attempt > 1 && context.is_exhausted() {
            ResolutionError::max_retries_exceeded(context.attempt, last)
        } else if context.attempt > 1 {
            last.clone()
        } else {
            original.clone()
        };
        error.for_token(&context.token_id)
    }

    /// Stale cache, then defaults, then the literal placeholder
    async fn degrade(&self, token: &Token, error: ResolutionError, allow_stale: bool) -> TokenOutcome {
        if allow_stale {
            if let Some(entry) = self.cache.get(&token.id.cache_key()).await {
                if entry.age(Utc::now()) <= self.settings.stale_ceiling {
                    debug!(token_id = %token.id, "serving stale cache entry");
                    return TokenOutcome::Resolved(
                        ResolverResult::resolved(entry.value)
                            .with_dependencies(entry.dependencies)
                            .from_cache()
                            .from_fallback(entry.similarity_score),
                    );
                }
            }
        }
        if let Some(value) = self.settings.default_values.lookup(token) {
            debug!(token_id = %token.id, "serving default value");
            return TokenOutcome::Resolved(ResolverResult::resolved(value.clone()).from_fallback(None));
        }
        TokenOutcome::Degraded {
            literal: token.placeholder.clone(),
            error,
        }
    }

    /// Any cached entry regardless of age
    async fn any_cached(&self, token: &Token) -> Option<ResolverResult> {
        let entry = self.cache.get(&token.id.cache_key()).await?;
        debug!(token_id = %token.id, fresh = entry.is_fresh(Utc::now()), "serving cached entry");
        Some(
            ResolverResult::resolved(entry.value)
                .with_dependencies(entry.dependencies)
                .from_cache()
                .from_fallback(entry.similarity_score),
        )
    }
}
