//! Resolution engine
//!
//! Owns every shared store (resolver registry, circuit breakers, cache,
//! analytics, event bus) for its lifetime; nothing lives in process-wide
//! state. [`ResolutionEngine::process_text`] extracts, plans, resolves each
//! group concurrently, and reassembles the text.

use crate::analytics::{AnalyticsAggregator, AnalyticsSnapshot, SessionRecord};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::extractor::{ExtractedToken, TokenExtractor};
use crate::planner::{ResolutionPlan, ResolutionPlanner};
use crate::pipeline::ResolutionPipeline;
use crate::registry::ResolverRegistry;
use chrono::Utc;
use futures::future::join_all;
use resolve_cache::{CacheStats, MokaResolutionCache, ResolutionCache};
use resolve_core::{
    ErrorCode, FailureMode, FailurePolicy, GrammarSet, OutcomeKind, ResolutionError, Resolver,
    ResolverContext, ResolverKey, Token, TokenId, TokenOutcome,
};
use resolve_resilience::{
    BareDefaultFallback, CircuitBreakerRegistry, CircuitBreakerStatus, ErrorHandler,
    FallbackChain, FallbackStrategy, LexicalSimilarityIndex, PatternDefaultFallback,
    SimilarityFallback, SimilarityIndex, StaticLookupFallback,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-token line of a [`ProcessResult`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenReport {
    /// Token id
    pub token_id: TokenId,
    /// Literal placeholder
    pub placeholder: String,
    /// How the token ended
    pub outcome: OutcomeKind,
    /// Time spent on the token in milliseconds
    pub resolve_time_ms: u64,
    /// Served from cache
    pub cache_hit: bool,
    /// Produced by a fallback path
    pub fallback_used: bool,
    /// Dependencies (cleared for skipped tokens)
    pub dependencies: Vec<TokenId>,
    /// Error code, for unresolved tokens
    pub error: Option<ErrorCode>,
}

/// Result of one `process_text` call
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    /// Session id of the caller context
    pub session_id: Uuid,
    /// Text with every placeholder substituted per its outcome
    pub text: String,
    /// Distinct tokens found
    pub tokens_processed: usize,
    /// Tokens resolved to a value
    pub successful_resolutions: usize,
    /// One error per unresolved token, in order of first appearance
    pub errors: Vec<ResolutionError>,
    /// Wall-clock time in milliseconds
    pub processing_time_ms: u64,
    /// Values served from cache
    pub cache_hits: usize,
    /// Values produced by fallback paths
    pub fallback_resolutions: usize,
    /// Tokens replaced by the skip sentinel
    pub skipped: usize,
    /// Per-token reports, in order of first appearance
    pub reports: Vec<TokenReport>,
    /// Planner estimate in milliseconds
    pub estimated_time_ms: u64,
    /// Analytics after this call
    pub analytics: AnalyticsSnapshot,
}

/// What a maintenance pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MaintenanceReport {
    /// Breakers swept back to closed
    pub breakers_reset: usize,
    /// Analytics sessions folded into cumulative counters
    pub sessions_folded: usize,
    /// Breakers tracked after the sweep
    pub breakers_tracked: usize,
}

/// Builder for [`ResolutionEngine`]
pub struct EngineBuilder {
    config: EngineConfig,
    cache: Option<Arc<dyn ResolutionCache>>,
    similarity: Option<Arc<dyn SimilarityIndex>>,
    strategies: Vec<Arc<dyn FallbackStrategy>>,
    grammars: Option<GrammarSet>,
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl EngineBuilder {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cache: None,
            similarity: None,
            strategies: Vec::new(),
            grammars: None,
            resolvers: Vec::new(),
        }
    }

    /// With an external cache store instead of the in-memory default
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn ResolutionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// With an external similarity backend
    #[must_use]
    pub fn similarity_index(mut self, index: Arc<dyn SimilarityIndex>) -> Self {
        self.similarity = Some(index);
        self
    }

    /// With an extra fallback strategy, ordered by its priority
    #[must_use]
    pub fn fallback_strategy(mut self, strategy: Arc<dyn FallbackStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// With a custom grammar table
    #[must_use]
    pub fn grammars(mut self, grammars: GrammarSet) -> Self {
        self.grammars = Some(grammars);
        self
    }

    /// With a resolver registered at build time
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Build the engine
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the standard
    /// grammars fail to build
    pub fn build(self) -> Result<ResolutionEngine, EngineError> {
        let config = self.config;
        config.validate()?;

        let grammars = match self.grammars {
            Some(grammars) => grammars,
            None => GrammarSet::standard()?,
        };
        let cache: Arc<dyn ResolutionCache> = self.cache.unwrap_or_else(|| {
            Arc::new(MokaResolutionCache::new(
                config.cache.max_capacity,
                config.stale_ceiling(),
            ))
        });
        let similarity: Arc<dyn SimilarityIndex> = self
            .similarity
            .unwrap_or_else(|| Arc::new(LexicalSimilarityIndex::default()));

        let fallback = &config.fallback;
        let mut chain = FallbackChain::new(Duration::from_millis(fallback.timeout_ms))
            .with(Arc::new(SimilarityFallback::new(
                Arc::clone(&similarity),
                fallback.similarity_threshold,
            )))
            .with(Arc::new(StaticLookupFallback::new(fallback.static_table.clone())))
            .with(Arc::new(PatternDefaultFallback));
        if let Some(value) = &fallback.bare_default {
            chain.push(Arc::new(BareDefaultFallback::new(value.clone())));
        }
        for strategy in self.strategies {
            chain.push(strategy);
        }
        debug!(strategies = ?chain.names(), "fallback chain assembled");

        let registry = ResolverRegistry::new();
        for resolver in self.resolvers {
            registry.register(resolver);
        }

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker_config()));
        let handler = ErrorHandler::new(Arc::clone(&cache), chain, config.recovery_settings());
        let pipeline = ResolutionPipeline::new(
            registry.clone(),
            Arc::clone(&breakers),
            Arc::clone(&cache),
            similarity,
            handler,
            config.resilience.max_concurrent_resolutions,
            config.cache.ttl,
        );

        Ok(ResolutionEngine {
            extractor: TokenExtractor::new(grammars, config.cache.ttl),
            planner: ResolutionPlanner::new(Arc::clone(&cache)),
            analytics: AnalyticsAggregator::new(config.analytics.buffer_capacity),
            events: EventBus::new(config.engine.event_capacity),
            default_policy: config.default_policy(),
            registry,
            breakers,
            cache,
            pipeline,
            config,
        })
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolvers: Vec<ResolverKey> = self.resolvers.iter().map(|r| r.key()).collect();
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("similarity", &self.similarity)
            .field("strategies", &self.strategies)
            .field("resolvers", &resolvers)
            .finish_non_exhaustive()
    }
}

/// Placeholder resolution engine
#[derive(Debug)]
pub struct ResolutionEngine {
    config: EngineConfig,
    default_policy: FailurePolicy,
    registry: ResolverRegistry,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Arc<dyn ResolutionCache>,
    extractor: TokenExtractor,
    planner: ResolutionPlanner,
    pipeline: ResolutionPipeline,
    analytics: AnalyticsAggregator,
    events: EventBus,
}

impl ResolutionEngine {
    /// Start building an engine
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Engine with default collaborators
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::builder(config).build()
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Policy applied when a call supplies none
    #[inline]
    #[must_use]
    pub fn default_policy(&self) -> &FailurePolicy {
        &self.default_policy
    }

    /// Fallback strategy names in run order
    #[must_use]
    pub fn fallback_strategies(&self) -> Vec<String> {
        self.pipeline
            .handler()
            .fallbacks()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Register a resolver, replacing any with the same key
    pub fn register_resolver(&self, resolver: Arc<dyn Resolver>) -> Option<Arc<dyn Resolver>> {
        let key = resolver.key();
        let replaced = self.registry.register(resolver);
        info!(resolver = %key, replaced = replaced.is_some(), "resolver registered");
        self.events.publish(EngineEvent::ResolverRegistered {
            key,
            replaced: replaced.is_some(),
        });
        replaced
    }

    /// Remove a resolver; false if none was registered
    pub fn unregister_resolver(&self, key: &ResolverKey) -> bool {
        let removed = self.registry.unregister(key).is_some();
        if removed {
            info!(resolver = %key, "resolver unregistered");
            self.events.publish(EngineEvent::ResolverUnregistered { key: key.clone() });
        }
        removed
    }

    /// Registered resolver keys, sorted
    #[must_use]
    pub fn resolver_keys(&self) -> Vec<ResolverKey> {
        self.registry.keys()
    }

    /// Extract and validate tokens without resolving them
    #[must_use]
    pub fn extract(&self, text: &str) -> Vec<ExtractedToken> {
        self.extractor.extract(text, &self.registry)
    }

    /// Plan the valid tokens of `text` without resolving them
    pub async fn plan(&self, text: &str) -> ResolutionPlan {
        let valid: Vec<Token> = self
            .extract(text)
            .into_iter()
            .filter(|t| t.is_valid)
            .map(|t| t.token)
            .collect();
        self.planner.plan(&valid).await
    }

    /// Engine default policy with `mode` swapped in
    #[must_use]
    pub fn policy(&self, mode: FailureMode) -> FailurePolicy {
        self.config.policy(mode)
    }

    /// Resolve every placeholder in `text`
    ///
    /// Token-level failures never fail the call; they are handled by
    /// `policy` (or the engine default) and reported in
    /// [`ProcessResult::errors`]. A supplied policy is used as-is; it does
    /// not inherit `[resilience]` retry settings (see [`Self::policy`]).
    ///
    /// # Errors
    /// Returns [`EngineError::InputTooLarge`] if `text` exceeds
    /// `engine.max_text_bytes`, or [`EngineError::Policy`] if `policy` has
    /// a zero timeout or a backoff multiplier below 1.0
    pub async fn process_text(
        &self,
        text: &str,
        context: &ResolverContext,
        policy: Option<&FailurePolicy>,
    ) -> Result<ProcessResult, EngineError> {
        let started = Instant::now();
        let session_id = context.session_id;
        let limit = self.config.engine.max_text_bytes;
        if text.len() > limit {
            let err = EngineError::InputTooLarge {
                size: text.len(),
                limit,
            };
            warn!(%session_id, size = text.len(), limit, "input rejected");
            self.events.publish(EngineEvent::ProcessingFailed {
                session_id,
                reason: err.to_string(),
            });
            return Err(err);
        }

        let policy = policy.unwrap_or(&self.default_policy);
        if let Err(e) = policy.validate() {
            let err = EngineError::from(e);
            warn!(%session_id, error = %err, "policy rejected");
            self.events.publish(EngineEvent::ProcessingFailed {
                session_id,
                reason: err.to_string(),
            });
            return Err(err);
        }
        info!(%session_id, bytes = text.len(), mode = policy.mode.as_str(), "processing text");
        self.events.publish(EngineEvent::ProcessingStarted {
            session_id,
            text_bytes: text.len(),
        });

        let extracted = self.extract(text);
        let mut outcomes: HashMap<TokenId, (TokenOutcome, u64)> = HashMap::new();

        // invalid tokens never reach a resolver, so no retry is offered
        let invalid = extracted.iter().filter(|t| !t.is_valid).map(|t| {
            let error = t
                .validation
                .to_error(&t.token.resolver_key())
                .unwrap_or_else(|| ResolutionError::validation_failed("token rejected"));
            timed(self.pipeline.fail(&t.token, error, context, policy))
        });
        for (token, outcome) in extracted
            .iter()
            .filter(|t| !t.is_valid)
            .zip(join_all(invalid).await)
        {
            outcomes.insert(token.token.id.clone(), outcome);
        }

        let valid: Vec<Token> = extracted
            .iter()
            .filter(|t| t.is_valid)
            .map(|t| t.token.clone())
            .collect();
        let plan = self.planner.plan(&valid).await;
        for (token, error) in &plan.blocked {
            outcomes.insert(token.id.clone(), (TokenOutcome::Failed(error.clone()), 0));
        }

        let mut group_context = context.clone();
        publish_values(&mut group_context, &outcomes);

        for (index, group) in plan.groups.iter().enumerate() {
            debug!(%session_id, group = index, size = group.len(), "dispatching resolution group");
            let shared = &group_context;
            let runs: Vec<_> = group
                .iter()
                .map(|token| {
                    let failed_dependency = unresolved_dependency(token, &outcomes);
                    async move {
                        let result = match failed_dependency {
                            Some(dep) => {
                                debug!(token_id = %token.id, dependency = %dep, "dependency unresolved");
                                timed(self.pipeline.fail(
                                    token,
                                    ResolutionError::dependency_failed(&dep),
                                    shared,
                                    policy,
                                ))
                                .await
                            }
                            None => timed(self.pipeline.resolve(token, shared, policy)).await,
                        };
                        (token.id.clone(), result)
                    }
                })
                .collect();

            let settled = join_all(runs).await;
            for (id, (outcome, ms)) in settled {
                if let Some(value) = outcome.value_for_dependents() {
                    group_context.insert_resolved(id.clone(), value);
                }
                outcomes.insert(id, (outcome, ms));
            }
        }

        let result = self.assemble(text, context, &extracted, &outcomes, &plan, started);
        info!(
            %session_id,
            tokens = result.tokens_processed,
            resolved = result.successful_resolutions,
            errors = result.errors.len(),
            elapsed_ms = result.processing_time_ms,
            "processing complete"
        );
        self.events.publish(EngineEvent::ProcessingCompleted {
            session_id,
            tokens_processed: result.tokens_processed,
            successful_resolutions: result.successful_resolutions,
            errors: result.errors.len(),
            processing_time_ms: result.processing_time_ms,
        });
        Ok(result)
    }

    fn assemble(
        &self,
        text: &str,
        context: &ResolverContext,
        extracted: &[ExtractedToken],
        outcomes: &HashMap<TokenId, (TokenOutcome, u64)>,
        plan: &ResolutionPlan,
        started: Instant,
    ) -> ProcessResult {
        let mut replacements: Vec<(Range<usize>, String)> = Vec::new();
        let mut reports = Vec::with_capacity(extracted.len());
        let mut errors = Vec::new();
        let mut record = SessionRecord::new(context.session_id);

        for item in extracted {
            let token = &item.token;
            let Some((outcome, ms)) = outcomes.get(&token.id) else {
                continue;
            };
            let replacement = outcome.replacement(&token.placeholder);
            for span in &item.occurrences {
                replacements.push((span.clone(), replacement.clone()));
            }

            let metadata = outcome.result().map(|r| r.metadata());
            let cache_hit = metadata.is_some_and(|m| m.cache_hit);
            let fallback_used = metadata.is_some_and(|m| m.fallback_used);
            let dependencies = if outcome.kind() == OutcomeKind::Skipped {
                Vec::new()
            } else {
                token.dependencies.clone()
            };

            if let Some(err) = outcome.error() {
                errors.push(err.clone());
            }
            metrics::counter!("resolve.tokens.processed.total", "outcome" => kind_label(outcome.kind()))
                .increment(1);

            record.tokens_processed += 1;
            if outcome.is_resolved() {
                record.successful += 1;
            } else {
                record.failed += 1;
            }
            record.cache_hits += u64::from(cache_hit);
            record.fallback_resolutions += u64::from(fallback_used);
            record.resolve_time_ms += ms;
            *record.type_counts.entry(token.token_type()).or_default() += 1;

            reports.push(TokenReport {
                token_id: token.id.clone(),
                placeholder: token.placeholder.clone(),
                outcome: outcome.kind(),
                resolve_time_ms: *ms,
                cache_hit,
                fallback_used,
                dependencies,
                error: outcome.error().map(|e| e.code),
            });
        }

        let processing_time_ms = elapsed_ms(started);
        record.processing_time_ms = processing_time_ms;
        record.recorded_at = Utc::now();
        self.analytics.record(record);

        let count = |kind: OutcomeKind| reports.iter().filter(|r| r.outcome == kind).count();
        ProcessResult {
            session_id: context.session_id,
            text: substitute(text, replacements),
            tokens_processed: extracted.len(),
            successful_resolutions: count(OutcomeKind::Resolved),
            skipped: count(OutcomeKind::Skipped),
            cache_hits: reports.iter().filter(|r| r.cache_hit).count(),
            fallback_resolutions: reports.iter().filter(|r| r.fallback_used).count(),
            errors,
            processing_time_ms,
            estimated_time_ms: plan.estimated_ms,
            analytics: self.analytics.snapshot(),
            reports,
        }
    }

    /// Sweep idle breakers, fold analytics, publish a breaker snapshot
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let breakers_reset = self.breakers.sweep_stale();
        let sessions_folded = self.analytics.fold();
        let breakers = self.breakers.snapshot();
        let report = MaintenanceReport {
            breakers_reset,
            sessions_folded,
            breakers_tracked: breakers.len(),
        };
        debug!(?report, "maintenance pass");
        self.events.publish(EngineEvent::CircuitBreakerSnapshot {
            breakers,
            taken_at: Utc::now(),
        });
        report
    }

    /// Run maintenance every `period` until the handle is aborted or the
    /// engine is dropped
    #[must_use]
    pub fn spawn_maintenance(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    debug!("engine dropped, maintenance stopped");
                    break;
                };
                engine.run_maintenance();
            }
        })
    }

    /// Status of one breaker
    #[must_use]
    pub fn circuit_status(&self, key: &ResolverKey) -> Option<CircuitBreakerStatus> {
        self.breakers.status(key)
    }

    /// Status of every breaker, ordered by key
    #[must_use]
    pub fn circuit_snapshot(&self) -> Vec<CircuitBreakerStatus> {
        self.breakers.snapshot()
    }

    /// Reset a breaker to closed; false if unknown
    pub fn reset_circuit(&self, key: &ResolverKey) -> bool {
        self.breakers.reset(key)
    }

    /// Open a breaker for one cooldown
    pub fn force_open(&self, key: &ResolverKey) {
        self.breakers.force_open(key);
    }

    /// Cache statistics
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop the cached value of a token
    pub async fn invalidate(&self, id: &TokenId) {
        self.cache.invalidate(&id.cache_key()).await;
    }

    /// Analytics over every processed call
    #[must_use]
    pub fn analytics(&self) -> AnalyticsSnapshot {
        self.analytics.snapshot()
    }

    /// Subscribe to engine events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// First dependency, resolved earlier in this call, that left no value
fn unresolved_dependency(
    token: &Token,
    outcomes: &HashMap<TokenId, (TokenOutcome, u64)>,
) -> Option<TokenId> {
    token
        .dependencies
        .iter()
        .find(|dep| {
            outcomes
                .get(*dep)
                .is_some_and(|(outcome, _)| outcome.value_for_dependents().is_none())
        })
        .cloned()
}

fn publish_values(context: &mut ResolverContext, outcomes: &HashMap<TokenId, (TokenOutcome, u64)>) {
    for (id, (outcome, _)) in outcomes {
        if let Some(value) = outcome.value_for_dependents() {
            context.insert_resolved(id.clone(), value);
        }
    }
}

async fn timed(outcome: impl std::future::Future<Output = TokenOutcome>) -> (TokenOutcome, u64) {
    let started = Instant::now();
    let outcome = outcome.await;
    (outcome, elapsed_ms(started))
}

/// Replace spans in order; spans come from one scan and never overlap
fn substitute(text: &str, mut replacements: Vec<(Range<usize>, String)>) -> String {
    replacements.sort_by_key(|(span, _)| span.start);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (span, replacement) in replacements {
        if span.start < cursor {
            continue;
        }
        out.push_str(text.get(cursor..span.start).unwrap_or_default());
        out.push_str(&replacement);
        cursor = span.end;
    }
    out.push_str(text.get(cursor..).unwrap_or_default());
    out
}

fn kind_label(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Resolved => "resolved",
        OutcomeKind::Degraded => "degraded",
        OutcomeKind::Skipped => "skipped",
        OutcomeKind::Failed => "failed",
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
