//! Testing utilities for the resolve workspace
//!
//! Scripted resolvers with call counters, and tracing setup for tests.

#![allow(missing_docs)]

use resolve_core::{
    ResolutionError, Resolver, ResolverContext, ResolverResult, Token, TokenId, TokenType,
    ValidationResult,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honouring `RUST_LOG` (default `warn`); safe to call repeatedly
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn token_id(id: &str) -> TokenId {
    id.parse().unwrap()
}

/// Shared call counter
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Resolves every token to a fixed value, with per-identifier overrides
#[derive(Debug, Clone)]
pub struct StaticResolver {
    token_type: TokenType,
    namespace: String,
    default: Value,
    values: HashMap<String, Value>,
    dependencies: HashMap<String, Vec<TokenId>>,
    rejected: Vec<String>,
    calls: CallCounter,
}

impl StaticResolver {
    pub fn new(token_type: TokenType, namespace: &str, value: impl Into<Value>) -> Self {
        Self {
            token_type,
            namespace: namespace.to_string(),
            default: value.into(),
            values: HashMap::new(),
            dependencies: HashMap::new(),
            rejected: Vec::new(),
            calls: CallCounter::default(),
        }
    }

    pub fn with_value(mut self, identifier: &str, value: impl Into<Value>) -> Self {
        self.values.insert(identifier.to_string(), value.into());
        self
    }

    /// Declare `deps` for tokens with this identifier during validation
    pub fn with_dependencies(mut self, identifier: &str, deps: &[&str]) -> Self {
        self.dependencies
            .insert(identifier.to_string(), deps.iter().map(|d| token_id(d)).collect());
        self
    }

    /// Fail validation for tokens with this identifier
    pub fn rejecting(mut self, identifier: &str) -> Self {
        self.rejected.push(identifier.to_string());
        self
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl Resolver for StaticResolver {
    fn token_type(&self) -> TokenType {
        self.token_type
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn validate(&self, token: &Token) -> ValidationResult {
        if self.rejected.contains(&token.key.identifier) {
            return ValidationResult::invalid("REJECTED", format!("{} rejected", token.id));
        }
        let deps = self
            .dependencies
            .get(&token.key.identifier)
            .cloned()
            .unwrap_or_default();
        ValidationResult::ok().with_dependencies(deps)
    }

    async fn resolve(
        &self,
        token: &Token,
        _context: &ResolverContext,
    ) -> Result<ResolverResult, ResolutionError> {
        self.calls.bump();
        let value = self
            .values
            .get(&token.key.identifier)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        Ok(ResolverResult::resolved(value))
    }
}

/// Always fails
#[derive(Debug, Clone)]
pub struct FailingResolver {
    token_type: TokenType,
    namespace: String,
    message: String,
    calls: CallCounter,
}

impl FailingResolver {
    pub fn new(token_type: TokenType, namespace: &str) -> Self {
        Self {
            token_type,
            namespace: namespace.to_string(),
            message: format!("{namespace} unavailable"),
            calls: CallCounter::default(),
        }
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl Resolver for FailingResolver {
    fn token_type(&self) -> TokenType {
        self.token_type
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn resolve(
        &self,
        _token: &Token,
        _context: &ResolverContext,
    ) -> Result<ResolverResult, ResolutionError> {
        self.calls.bump();
        Err(ResolutionError::resolver_failed(self.message.clone()))
    }
}

/// Fails the first `failures` calls, then resolves
#[derive(Debug, Clone)]
pub struct FlakyResolver {
    token_type: TokenType,
    namespace: String,
    failures: usize,
    value: Value,
    calls: CallCounter,
}

impl FlakyResolver {
    pub fn new(token_type: TokenType, namespace: &str, failures: usize, value: impl Into<Value>) -> Self {
        Self {
            token_type,
            namespace: namespace.to_string(),
            failures,
            value: value.into(),
            calls: CallCounter::default(),
        }
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl Resolver for FlakyResolver {
    fn token_type(&self) -> TokenType {
        self.token_type
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn resolve(
        &self,
        _token: &Token,
        _context: &ResolverContext,
    ) -> Result<ResolverResult, ResolutionError> {
        let call = self.calls.bump();
        if call <= self.failures {
            // failed result rather than Err: both count as failures
            return Ok(ResolverResult::failed(ResolutionError::resolver_failed(format!(
                "transient failure {call}"
            ))));
        }
        Ok(ResolverResult::resolved(self.value.clone()))
    }
}

/// Sleeps before resolving
#[derive(Debug, Clone)]
pub struct SlowResolver {
    token_type: TokenType,
    namespace: String,
    delay: Duration,
    value: Value,
    calls: CallCounter,
    completed: CallCounter,
}

impl SlowResolver {
    pub fn new(token_type: TokenType, namespace: &str, delay: Duration, value: impl Into<Value>) -> Self {
        Self {
            token_type,
            namespace: namespace.to_string(),
            delay,
            value: value.into(),
            calls: CallCounter::default(),
            completed: CallCounter::default(),
        }
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Calls that ran to completion, abandoned ones included
    pub fn completed(&self) -> CallCounter {
        self.completed.clone()
    }
}

#[async_trait::async_trait]
impl Resolver for SlowResolver {
    fn token_type(&self) -> TokenType {
        self.token_type
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn resolve(
        &self,
        _token: &Token,
        _context: &ResolverContext,
    ) -> Result<ResolverResult, ResolutionError> {
        self.calls.bump();
        tokio::time::sleep(self.delay).await;
        self.completed.bump();
        Ok(ResolverResult::resolved(self.value.clone()))
    }
}

/// Joins the values of its declared dependencies with `+`
#[derive(Debug, Clone)]
pub struct DependentResolver {
    token_type: TokenType,
    namespace: String,
    dependencies: Vec<TokenId>,
    calls: CallCounter,
}

impl DependentResolver {
    pub fn new(token_type: TokenType, namespace: &str, deps: &[&str]) -> Self {
        Self {
            token_type,
            namespace: namespace.to_string(),
            dependencies: deps.iter().map(|d| token_id(d)).collect(),
            calls: CallCounter::default(),
        }
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl Resolver for DependentResolver {
    fn token_type(&self) -> TokenType {
        self.token_type
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn validate(&self, _token: &Token) -> ValidationResult {
        ValidationResult::ok().with_dependencies(self.dependencies.clone())
    }

    async fn resolve(
        &self,
        _token: &Token,
        context: &ResolverContext,
    ) -> Result<ResolverResult, ResolutionError> {
        self.calls.bump();
        let mut parts = Vec::new();
        for dep in &self.dependencies {
            match context.dependency_value(dep) {
                Some(Value::String(s)) => parts.push(s.clone()),
                Some(other) => parts.push(other.to_string()),
                None => {
                    return Err(ResolutionError::resolver_failed(format!(
                        "dependency {dep} missing from context"
                    )))
                }
            }
        }
        Ok(ResolverResult::resolved(parts.join("+")).with_dependencies(self.dependencies.clone()))
    }
}

/// Panics inside `resolve`
#[derive(Debug, Clone)]
pub struct PanickingResolver {
    token_type: TokenType,
    namespace: String,
}

impl PanickingResolver {
    pub fn new(token_type: TokenType, namespace: &str) -> Self {
        Self {
            token_type,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Resolver for PanickingResolver {
    fn token_type(&self) -> TokenType {
        self.token_type
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn resolve(
        &self,
        token: &Token,
        _context: &ResolverContext,
    ) -> Result<ResolverResult, ResolutionError> {
        panic!("resolver exploded on {}", token.id);
    }
}
