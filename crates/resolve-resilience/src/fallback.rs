//! Fallback strategies
//!
//! Used only by the `fallback-resolver` failure mode. Strategies run in
//! ascending priority, each raced against the chain timeout; the first
//! success wins. Strategies never recurse into further fallbacks.

use crate::context::ErrorContext;
use crate::similarity::SimilarityIndex;
use chrono::{SecondsFormat, Utc};
use resolve_core::{FailurePolicy, ResolutionError, ResolverResult, Token, TokenType};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Built-in strategy names
pub mod names {
    /// Similarity search over past resolutions
    pub const SIMILARITY: &str = "similarity";
    /// Static placeholder/namespace table
    pub const STATIC_LOOKUP: &str = "static-lookup";
    /// Type-derived default
    pub const PATTERN_DEFAULT: &str = "pattern-default";
    /// Configured bare default
    pub const BARE_DEFAULT: &str = "bare-default";
}

/// Alternative resolution strategy
#[async_trait::async_trait]
pub trait FallbackStrategy: Send + Sync + Debug {
    /// Name matched against `FailurePolicy::fallback_resolvers`
    fn name(&self) -> &str;

    /// Lower runs first
    fn priority(&self) -> u32;

    /// Produce a value for the failed token
    async fn execute(
        &self,
        token: &Token,
        context: &ErrorContext<'_>,
    ) -> Result<ResolverResult, ResolutionError>;
}

fn no_value(strategy: &str, token: &Token) -> ResolutionError {
    ResolutionError::resolver_failed(format!("{strategy}: no value for {}", token.id))
}

/// Similarity search over previously successful resolutions of the same type
#[derive(Debug)]
pub struct SimilarityFallback {
    index: Arc<dyn SimilarityIndex>,
    threshold: f64,
}

impl SimilarityFallback {
    /// Create strategy with a minimum score
    #[must_use]
    pub fn new(index: Arc<dyn SimilarityIndex>, threshold: f64) -> Self {
        Self { index, threshold }
    }
}

#[async_trait::async_trait]
impl FallbackStrategy for SimilarityFallback {
    fn name(&self) -> &str {
        names::SIMILARITY
    }

    fn priority(&self) -> u32 {
        10
    }

    async fn execute(
        &self,
        token: &Token,
        _context: &ErrorContext<'_>,
    ) -> Result<ResolverResult, ResolutionError> {
        let found = self
            .index
            .search(token, self.threshold)
            .await
            .ok_or_else(|| no_value(names::SIMILARITY, token))?;
        debug!(token_id = %token.id, source = %found.source, score = found.score, "similar resolution found");
        Ok(ResolverResult::resolved(found.value).from_fallback(Some(found.score)))
    }
}

/// Static table keyed by placeholder text or namespace
#[derive(Debug, Clone, Default)]
pub struct StaticLookupFallback {
    table: HashMap<String, Value>,
}

impl StaticLookupFallback {
    /// Create strategy from a table
    #[must_use]
    pub fn new(table: HashMap<String, Value>) -> Self {
        Self { table }
    }
}

#[async_trait::async_trait]
impl FallbackStrategy for StaticLookupFallback {
    fn name(&self) -> &str {
        names::STATIC_LOOKUP
    }

    fn priority(&self) -> u32 {
        20
    }

    async fn execute(
        &self,
        token: &Token,
        _context: &ErrorContext<'_>,
    ) -> Result<ResolverResult, ResolutionError> {
        self.table
            .get(&token.placeholder)
            .or_else(|| self.table.get(&token.key.namespace))
            .map(|v| ResolverResult::resolved(v.clone()).from_fallback(None))
            .ok_or_else(|| no_value(names::STATIC_LOOKUP, token))
    }
}

/// Default derived from the token type
///
/// `TEMPORAL` falls back to the current RFC 3339 timestamp, `METRICS` to `0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternDefaultFallback;

#[async_trait::async_trait]
impl FallbackStrategy for PatternDefaultFallback {
    fn name(&self) -> &str {
        names::PATTERN_DEFAULT
    }

    fn priority(&self) -> u32 {
        30
    }

    async fn execute(
        &self,
        token: &Token,
        _context: &ErrorContext<'_>,
    ) -> Result<ResolverResult, ResolutionError> {
        let value = match token.token_type() {
            TokenType::Temporal => Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            TokenType::Metrics => Value::from(0),
            TokenType::Context | TokenType::Data | TokenType::State => {
                return Err(no_value(names::PATTERN_DEFAULT, token));
            }
        };
        Ok(ResolverResult::resolved(value).from_fallback(None))
    }
}

/// Fixed value for any token
#[derive(Debug, Clone)]
pub struct BareDefaultFallback {
    value: Value,
}

impl BareDefaultFallback {
    /// Create strategy
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait::async_trait]
impl FallbackStrategy for BareDefaultFallback {
    fn name(&self) -> &str {
        names::BARE_DEFAULT
    }

    fn priority(&self) -> u32 {
        40
    }

    async fn execute(
        &self,
        _token: &Token,
        _context: &ErrorContext<'_>,
    ) -> Result<ResolverResult, ResolutionError> {
        Ok(ResolverResult::resolved(self.value.clone()).from_fallback(None))
    }
}

/// Value produced by the chain
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackSuccess {
    /// Strategy that produced it
    pub strategy: String,
    /// Result, tagged `fallback_used`
    pub result: ResolverResult,
}

/// Priority-ordered fallback chain
#[derive(Debug, Clone)]
pub struct FallbackChain {
    strategies: Vec<Arc<dyn FallbackStrategy>>,
    timeout: Duration,
}

impl FallbackChain {
    /// Empty chain with a per-strategy timeout
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            timeout,
        }
    }

    /// Add a strategy, keeping priority order (ties keep insertion order)
    pub fn push(&mut self, strategy: Arc<dyn FallbackStrategy>) {
        let at = self
            .strategies
            .partition_point(|s| s.priority() <= strategy.priority());
        self.strategies.insert(at, strategy);
    }

    /// With strategy
    #[must_use]
    pub fn with(mut self, strategy: Arc<dyn FallbackStrategy>) -> Self {
        self.push(strategy);
        self
    }

    /// Strategy names in run order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Number of strategies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the chain is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run the strategies the policy allows; first success wins
    ///
    /// Failed strategy errors are appended to `context.history`.
    ///
    /// # Errors
    /// Returns the last strategy error once the chain is exhausted
    pub async fn run(
        &self,
        token: &Token,
        policy: &FailurePolicy,
        context: &mut ErrorContext<'_>,
    ) -> Result<FallbackSuccess, ResolutionError> {
        let mut last = None;
        for strategy in self
            .strategies
            .iter()
            .filter(|s| policy.allows_fallback(s.name()))
        {
            let outcome = match timeout(self.timeout, strategy.execute(token, context)).await {
                Ok(Ok(result)) if result.is_success() => Ok(result),
                Ok(Ok(result)) => Err(result
                    .error()
                    .cloned()
                    .unwrap_or_else(|| no_value(strategy.name(), token))),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(ResolutionError::resolver_failed(format!(
                    "fallback {} timed out after {}ms",
                    strategy.name(),
                    self.timeout.as_millis()
                ))),
            };
            match outcome {
                Ok(result) => {
                    info!(token_id = %token.id, strategy = strategy.name(), "fallback resolved token");
                    metrics::counter!("resolve.fallback.used.total", "strategy" => strategy.name().to_string())
                        .increment(1);
                    return Ok(FallbackSuccess {
                        strategy: strategy.name().to_string(),
                        result: result.from_fallback(None),
                    });
                }
                Err(err) => {
                    debug!(token_id = %token.id, strategy = strategy.name(), %err, "fallback strategy failed");
                    context.extend([err.clone()]);
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| {
            ResolutionError::resolver_failed(format!("no fallback strategy available for {}", token.id))
        }))
    }
}

/// Graceful-degradation default values keyed by `TYPE:namespace` or `TYPE`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultValueTable {
    values: HashMap<String, Value>,
}

impl DefaultValueTable {
    /// Create table
    #[must_use]
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Most specific default for a token
    #[must_use]
    pub fn lookup(&self, token: &Token) -> Option<&Value> {
        self.values
            .get(&token.resolver_key().to_string())
            .or_else(|| self.values.get(token.token_type().as_str()))
    }

    /// Whether the table is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::LexicalSimilarityIndex;
    use resolve_core::{ResolverContext, TokenKey};

    #[derive(Debug)]
    struct Hang;

    #[async_trait::async_trait]
    impl FallbackStrategy for Hang {
        fn name(&self) -> &str {
            "hang"
        }

        fn priority(&self) -> u32 {
            1
        }

        async fn execute(
            &self,
            _token: &Token,
            _context: &ErrorContext<'_>,
        ) -> Result<ResolverResult, ResolutionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ResolverResult::resolved("never"))
        }
    }

    fn token(ty: TokenType) -> Token {
        Token::new(TokenKey::new(ty, "ns", "v1", "item"))
    }

    fn chain() -> FallbackChain {
        let table = HashMap::from([("ns".to_string(), Value::from("from-table"))]);
        FallbackChain::new(Duration::from_millis(100))
            .with(Arc::new(PatternDefaultFallback))
            .with(Arc::new(StaticLookupFallback::new(table)))
            .with(Arc::new(SimilarityFallback::new(
                Arc::new(LexicalSimilarityIndex::default()),
                0.7,
            )))
    }

    #[test]
    fn chain_sorted_by_priority() {
        let chain = chain().with(Arc::new(BareDefaultFallback::new("x")));
        assert_eq!(
            chain.names(),
            vec!["similarity", "static-lookup", "pattern-default", "bare-default"]
        );
    }

    #[tokio::test]
    async fn first_success_wins() {
        let ctx = ResolverContext::new();
        let token = token(TokenType::Data);
        let mut error_ctx =
            ErrorContext::new(token.id.clone(), ResolutionError::resolver_failed("x"), 1, &ctx);

        let success = chain()
            .run(&token, &FailurePolicy::new(), &mut error_ctx)
            .await
            .unwrap();
        assert_eq!(success.strategy, "static-lookup");
        assert_eq!(success.result.value(), Some(&Value::from("from-table")));
        assert!(success.result.metadata().fallback_used);
        // similarity missed first
        assert_eq!(error_ctx.history.len(), 2);
    }

    #[tokio::test]
    async fn policy_filters_strategies() {
        let ctx = ResolverContext::new();
        let token = token(TokenType::Metrics);
        let mut error_ctx =
            ErrorContext::new(token.id.clone(), ResolutionError::resolver_failed("x"), 1, &ctx);
        let policy = FailurePolicy::new().fallback_resolvers(["pattern-default"]);

        let success = chain().run(&token, &policy, &mut error_ctx).await.unwrap();
        assert_eq!(success.strategy, "pattern-default");
        assert_eq!(success.result.value(), Some(&Value::from(0)));
    }

    #[tokio::test]
    async fn exhausted_chain_returns_last_error() {
        let ctx = ResolverContext::new();
        let token = token(TokenType::State);
        let mut error_ctx =
            ErrorContext::new(token.id.clone(), ResolutionError::resolver_failed("x"), 1, &ctx);
        let policy = FailurePolicy::new().fallback_resolvers(["similarity", "pattern-default"]);

        let err = chain().run(&token, &policy, &mut error_ctx).await.unwrap_err();
        assert!(err.message.contains("pattern-default"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_strategy_times_out() {
        let ctx = ResolverContext::new();
        let token = token(TokenType::Temporal);
        let mut error_ctx =
            ErrorContext::new(token.id.clone(), ResolutionError::resolver_failed("x"), 1, &ctx);

        let policy = FailurePolicy::new().fallback_resolvers(["hang", "pattern-default"]);

        let success = chain()
            .with(Arc::new(Hang))
            .run(&token, &policy, &mut error_ctx)
            .await
            .unwrap();
        assert_eq!(success.strategy, "pattern-default");
        assert_eq!(error_ctx.history.len(), 2);
        assert!(error_ctx.history[1].message.contains("fallback hang timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn static_lookup_wins_over_pattern_default() {
        let ctx = ResolverContext::new();
        let token = token(TokenType::Temporal);
        let mut error_ctx =
            ErrorContext::new(token.id.clone(), ResolutionError::resolver_failed("x"), 1, &ctx);

        let success = chain()
            .with(Arc::new(Hang))
            .run(&token, &FailurePolicy::new(), &mut error_ctx)
            .await
            .unwrap();
        assert_eq!(success.strategy, "static-lookup");
        assert!(error_ctx.history[1].message.contains("fallback hang timed out"));
    }

    #[test]
    fn default_table_prefers_namespace_key() {
        let table = DefaultValueTable::new(HashMap::from([
            ("DATA".to_string(), Value::from("type-default")),
            ("DATA:ns".to_string(), Value::from("ns-default")),
        ]));
        assert_eq!(table.lookup(&token(TokenType::Data)), Some(&Value::from("ns-default")));
        assert!(table.lookup(&token(TokenType::State)).is_none());
    }
}
