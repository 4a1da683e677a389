//! Resolver results
//!
//! [`ResolverResult`] keeps its invariant by construction: a successful
//! result has a value and no error, a failed one has an error and no value.

use crate::error::ResolutionError;
use crate::token::TokenId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cost-impact counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CostImpact {
    /// Upstream calls avoided (cache or fallback)
    pub api_calls_avoided: u64,
    /// Estimated upstream work units saved
    pub units_saved: u64,
}

/// Resolution metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResolutionMetadata {
    /// Wall-clock resolve time in milliseconds
    pub resolve_time_ms: u64,
    /// Served from cache
    pub cache_hit: bool,
    /// Produced by a fallback path
    pub fallback_used: bool,
    /// Similarity score when produced by similarity search
    pub similarity_score: Option<f64>,
    /// Cost-impact counters
    pub cost_impact: CostImpact,
}

/// Outcome of one resolve call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverResult {
    success: bool,
    resolved_value: Option<Value>,
    dependencies: Vec<TokenId>,
    metadata: ResolutionMetadata,
    error: Option<ResolutionError>,
}

impl ResolverResult {
    /// Successful result
    #[must_use]
    pub fn resolved(value: impl Into<Value>) -> Self {
        Self {
            success: true,
            resolved_value: Some(value.into()),
            dependencies: Vec::new(),
            metadata: ResolutionMetadata::default(),
            error: None,
        }
    }

    /// Failed result
    #[must_use]
    pub fn failed(error: ResolutionError) -> Self {
        Self {
            success: false,
            resolved_value: None,
            dependencies: Vec::new(),
            metadata: ResolutionMetadata::default(),
            error: Some(error),
        }
    }

    /// With surfaced dependency ids
    #[inline]
    #[must_use]
    pub fn with_dependencies(mut self, deps: Vec<TokenId>) -> Self {
        self.dependencies = deps;
        self
    }

    /// With metadata
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: ResolutionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Tag as served from cache
    #[inline]
    #[must_use]
    pub fn from_cache(mut self) -> Self {
        self.metadata.cache_hit = true;
        self.metadata.cost_impact.api_calls_avoided += 1;
        self
    }

    /// Tag as produced by a fallback path
    #[inline]
    #[must_use]
    pub fn from_fallback(mut self, similarity_score: Option<f64>) -> Self {
        self.metadata.fallback_used = true;
        self.metadata.similarity_score = similarity_score.or(self.metadata.similarity_score);
        self
    }

    /// Set resolve time
    #[inline]
    pub fn set_resolve_time_ms(&mut self, ms: u64) {
        self.metadata.resolve_time_ms = ms;
    }

    /// Drop surfaced dependencies
    #[inline]
    pub fn clear_dependencies(&mut self) {
        self.dependencies.clear();
    }

    /// Whether resolution succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Resolved value
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.resolved_value.as_ref()
    }

    /// Error, for failed results
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&ResolutionError> {
        self.error.as_ref()
    }

    /// Dependencies surfaced by the resolver
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &[TokenId] {
        &self.dependencies
    }

    /// Metadata
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &ResolutionMetadata {
        &self.metadata
    }

    /// Split into value or error
    ///
    /// # Errors
    /// Returns the carried error for failed results
    pub fn into_outcome(self) -> Result<ResolverResult, ResolutionError> {
        if self.success {
            return Ok(self);
        }
        Err(self
            .error
            .unwrap_or_else(|| ResolutionError::resolver_failed("failed without error detail")))
    }
}

/// Render a resolved value for substitution into text
///
/// Strings are inserted verbatim, `null` renders empty, anything else as
/// compact JSON.
#[must_use]
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
