//! Per-token resolution pipeline
//!
//! Breaker gate, cache lookup, admission, then the resolver raced against the
//! policy timeout. Failures go to the [`ErrorHandler`] together with a retry
//! operation that re-enters this pipeline (gate, admission and timeout
//! included, cache excluded).
//!
//! Resolver calls run as spawned tasks. The admission permit stays with the
//! waiting side and both the permit wait and the call share one deadline, so
//! a timed-out call frees its slot at once while the task finishes detached.

use crate::registry::ResolverRegistry;
use chrono::Utc;
use futures::FutureExt;
use resolve_cache::{CacheEntry, ResolutionCache, TtlClasses};
use resolve_core::{
    FailurePolicy, ResolutionError, ResolverContext, ResolverResult, Token, TokenOutcome,
};
use resolve_resilience::{
    Admission, CircuitBreakerRegistry, ErrorHandler, FailureContext, RetryOperation,
    SimilarityIndex,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, trace, warn};

/// Shared collaborators of the pipeline
#[derive(Debug, Clone)]
pub struct ResolutionPipeline {
    registry: ResolverRegistry,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Arc<dyn ResolutionCache>,
    similarity: Arc<dyn SimilarityIndex>,
    handler: ErrorHandler,
    admission: Arc<Semaphore>,
    ttl: TtlClasses,
}

impl ResolutionPipeline {
    /// Create pipeline
    #[must_use]
    pub fn new(
        registry: ResolverRegistry,
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Arc<dyn ResolutionCache>,
        similarity: Arc<dyn SimilarityIndex>,
        handler: ErrorHandler,
        max_concurrent: usize,
        ttl: TtlClasses,
    ) -> Self {
        Self {
            registry,
            breakers,
            cache,
            similarity,
            handler,
            admission: Arc::new(Semaphore::new(max_concurrent.max(1))),
            ttl,
        }
    }

    /// Failure handler
    #[inline]
    #[must_use]
    pub fn handler(&self) -> &ErrorHandler {
        &self.handler
    }

    /// Free admission permits
    #[inline]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.admission.available_permits()
    }

    /// Resolve one token to its final outcome
    pub async fn resolve(
        &self,
        token: &Token,
        context: &ResolverContext,
        policy: &FailurePolicy,
    ) -> TokenOutcome {
        let started = Instant::now();
        let outcome = match self.attempt(token, context, policy, 1).await {
            Ok(result) => TokenOutcome::Resolved(result),
            Err(error) => {
                let retry: &RetryOperation<'_> =
                    &|attempt| self.attempt(token, context, policy, attempt).boxed();
                self.handler
                    .handle(FailureContext {
                        token,
                        error,
                        resolver_context: context,
                        policy,
                        retry: Some(retry),
                    })
                    .await
            }
        };
        with_elapsed(outcome, started)
    }

    /// Route a failure that never reached a resolver (no retry available)
    pub async fn fail(
        &self,
        token: &Token,
        error: ResolutionError,
        context: &ResolverContext,
        policy: &FailurePolicy,
    ) -> TokenOutcome {
        let started = Instant::now();
        let outcome = self
            .handler
            .handle(FailureContext {
                token,
                error,
                resolver_context: context,
                policy,
                retry: None,
            })
            .await;
        with_elapsed(outcome, started)
    }

    /// One pass through gate, cache (first attempt only), admission and resolver
    async fn attempt(
        &self,
        token: &Token,
        context: &ResolverContext,
        policy: &FailurePolicy,
        attempt: u32,
    ) -> Result<ResolverResult, ResolutionError> {
        let key = token.resolver_key();
        let resolver = self
            .registry
            .get(&key)
            .ok_or_else(|| ResolutionError::no_resolver(&key))?;

        if let Admission::Rejected { retry_in } = self.breakers.check(&key) {
            debug!(token_id = %token.id, resolver = %key, retry_in_ms = millis(retry_in), "circuit open, call rejected");
            metrics::counter!("resolve.circuit.rejections.total", "resolver" => key.to_string())
                .increment(1);
            return Err(ResolutionError::circuit_open(&key, retry_in));
        }

        if attempt == 1 {
            if let Some(entry) = self.cache.get_fresh(&token.id.cache_key(), Utc::now()).await {
                debug!(token_id = %token.id, "cache hit");
                return Ok(ResolverResult::resolved(entry.value)
                    .with_dependencies(entry.dependencies)
                    .from_cache());
            }
            trace!(token_id = %token.id, "cache miss");
        }

        let timeout = policy.timeout_duration();
        let deadline = tokio::time::Instant::now() + timeout;
        let permit = match tokio::time::timeout_at(
            deadline,
            Arc::clone(&self.admission).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ResolutionError::resolver_failed("admission control closed")),
            Err(_) => {
                // waiting for capacity is not a resolver failure; the breaker is left alone
                warn!(token_id = %token.id, resolver = %key, timeout_ms = policy.timeout_ms, attempt, "no admission capacity before deadline");
                metrics::counter!("resolve.admission.timeouts.total", "resolver" => key.to_string())
                    .increment(1);
                return Err(ResolutionError::timeout(&key, timeout));
            }
        };

        let started = Instant::now();
        let task_token = token.clone();
        let task_context = context.clone();
        let handle =
            tokio::spawn(async move { resolver.resolve(&task_token, &task_context).await });

        let outcome = match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(Ok(result))) => result.into_outcome(),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(join_err)) => {
                error!(token_id = %token.id, resolver = %key, panic = join_err.is_panic(), "resolver task aborted");
                Err(ResolutionError::resolver_failed(format!(
                    "resolver {key} panicked while resolving {}",
                    token.id
                )))
            }
            Err(_) => {
                warn!(token_id = %token.id, resolver = %key, timeout_ms = policy.timeout_ms, attempt, "resolver timed out, abandoning call");
                Err(ResolutionError::timeout(&key, timeout))
            }
        };
        drop(permit);
        let elapsed_ms = elapsed_ms(started);
        metrics::histogram!("resolve.resolver.duration_ms", "resolver" => key.to_string())
            .record(elapsed_ms as f64);

        match outcome {
            Ok(mut result) => {
                self.breakers.record_success(&key);
                result.set_resolve_time_ms(elapsed_ms);
                self.store(token, &result).await;
                metrics::counter!("resolve.resolver.calls.total", "resolver" => key.to_string(), "outcome" => "success")
                    .increment(1);
                Ok(result)
            }
            Err(err) => {
                let state = self.breakers.record_failure(&key);
                debug!(token_id = %token.id, resolver = %key, code = %err.code, attempt, breaker = %state, "resolver call failed");
                metrics::counter!("resolve.resolver.calls.total", "resolver" => key.to_string(), "outcome" => "failure")
                    .increment(1);
                Err(err)
            }
        }
    }

    /// Cache a primary resolution and feed the similarity index
    async fn store(&self, token: &Token, result: &ResolverResult) {
        let Some(value) = result.value() else {
            return;
        };
        if let Some(ttl) = self.ttl.ttl_for(token.cache_policy) {
            let entry = CacheEntry::new(value.clone(), token.token_type(), ttl)
                .with_dependencies(token.dependencies.clone());
            self.cache.set(token.id.cache_key(), entry).await;
            trace!(token_id = %token.id, ttl_ms = millis(ttl), "cached resolution");
        }
        self.similarity.record(token, value).await;
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    millis(started.elapsed())
}

/// Stamp total time on results that carry none
fn with_elapsed(outcome: TokenOutcome, started: Instant) -> TokenOutcome {
    match outcome {
        TokenOutcome::Resolved(mut result) if result.metadata().resolve_time_ms == 0 => {
            result.set_resolve_time_ms(elapsed_ms(started));
            TokenOutcome::Resolved(result)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolve_cache::MokaResolutionCache;
    use resolve_core::{ErrorCode, FailureMode, TokenKey, TokenType};
    use resolve_resilience::{
        CircuitBreakerConfig, CircuitState, FallbackChain, LexicalSimilarityIndex,
        RecoverySettings, RetryConfig,
    };
    use resolve_test_utils::{FailingResolver, FlakyResolver, SlowResolver, StaticResolver};

    struct Fixture {
        pipeline: ResolutionPipeline,
        registry: ResolverRegistry,
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Arc<MokaResolutionCache>,
    }

    fn fixture(threshold: u32) -> Fixture {
        let registry = ResolverRegistry::new();
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default().with_failure_threshold(threshold),
        ));
        let cache = Arc::new(MokaResolutionCache::default());
        let handler = ErrorHandler::new(
            cache.clone(),
            FallbackChain::new(Duration::from_millis(50)),
            RecoverySettings {
                retry: RetryConfig::default().without_jitter(),
                ..RecoverySettings::default()
            },
        );
        let pipeline = ResolutionPipeline::new(
            registry.clone(),
            Arc::clone(&breakers),
            cache.clone(),
            Arc::new(LexicalSimilarityIndex::default()),
            handler,
            4,
            TtlClasses::default(),
        );
        Fixture {
            pipeline,
            registry,
            breakers,
            cache,
        }
    }

    fn token() -> Token {
        Token::new(TokenKey::new(TokenType::Data, "artifact", "v1", "req"))
    }

    #[tokio::test]
    async fn resolves_and_caches() {
        let f = fixture(5);
        let resolver = StaticResolver::new(TokenType::Data, "artifact", "42");
        let calls = resolver.calls();
        f.registry.register(Arc::new(resolver));

        let policy = FailurePolicy::new();
        let ctx = ResolverContext::new();
        let first = f.pipeline.resolve(&token(), &ctx, &policy).await;
        assert_eq!(first.replacement(""), "42");
        assert!(!first.result().unwrap().metadata().cache_hit);

        let second = f.pipeline.resolve(&token(), &ctx, &policy).await;
        assert!(second.result().unwrap().metadata().cache_hit);
        assert_eq!(calls.count(), 1);
        assert_eq!(f.cache.stats().writes, 1);
        assert_eq!(f.pipeline.available_permits(), 4);
    }

    #[tokio::test]
    async fn missing_resolver_is_no_resolver() {
        let f = fixture(5);
        let outcome = f
            .pipeline
            .resolve(&token(), &ResolverContext::new(), &FailurePolicy::new())
            .await;
        assert_eq!(outcome.error().unwrap().code, ErrorCode::NoResolver);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_reenter_the_resolver() {
        let f = fixture(10);
        let resolver = FlakyResolver::new(TokenType::Data, "artifact", 2, "ok");
        let calls = resolver.calls();
        f.registry.register(Arc::new(resolver));

        let outcome = f
            .pipeline
            .resolve(&token(), &ResolverContext::new(), &FailurePolicy::new().max_retries(3))
            .await;
        assert_eq!(outcome.replacement(""), "ok");
        assert_eq!(calls.count(), 3);
        assert_eq!(f.breakers.state(&token().resolver_key()), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_ends_retries() {
        let f = fixture(2);
        let resolver = FailingResolver::new(TokenType::Data, "artifact");
        let calls = resolver.calls();
        f.registry.register(Arc::new(resolver));

        let outcome = f
            .pipeline
            .resolve(&token(), &ResolverContext::new(), &FailurePolicy::new().max_retries(5))
            .await;
        // second failure opens the breaker; the third attempt is rejected at the gate
        assert_eq!(calls.count(), 2);
        assert_eq!(outcome.error().unwrap().code, ErrorCode::CircuitBreakerOpen);
    }

    #[test]
    fn millis_saturates_instead_of_wrapping() {
        assert_eq!(millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_call_frees_its_permit() {
        let f = fixture(5);
        let resolver = SlowResolver::new(TokenType::Data, "artifact", Duration::from_secs(60), "late");
        let completed = resolver.completed();
        f.registry.register(Arc::new(resolver));

        let policy = FailurePolicy::new()
            .max_retries(0)
            .timeout(Duration::from_millis(20));
        let outcome = f.pipeline.resolve(&token(), &ResolverContext::new(), &policy).await;

        assert_eq!(outcome.error().unwrap().code, ErrorCode::Timeout);
        assert_eq!(completed.count(), 0);
        assert_eq!(f.pipeline.available_permits(), 4);
    }

    #[tokio::test]
    async fn fail_routes_without_retry() {
        let f = fixture(5);
        let policy = FailurePolicy::with_mode(FailureMode::GracefulDegradation);
        let outcome = f
            .pipeline
            .fail(
                &token(),
                ResolutionError::validation_failed("bad scope"),
                &ResolverContext::new(),
                &policy,
            )
            .await;
        assert_eq!(outcome.replacement(&token().placeholder), "{DATA:artifact:v1:req}");
        assert_eq!(outcome.error().unwrap().code, ErrorCode::ValidationFailed);
    }
}
