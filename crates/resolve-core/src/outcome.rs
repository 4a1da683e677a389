//! Final per-token outcomes

use crate::error::ResolutionError;
use crate::result::{render_value, ResolverResult};
use crate::token::TokenId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel substituted for tokens skipped under `dependency-skip`
#[must_use]
pub fn skipped_marker(id: &TokenId) -> String {
    format!("[SKIPPED:{id}]")
}

/// Outcome kind, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// Resolved to a value
    Resolved,
    /// Placeholder kept as literal
    Degraded,
    /// Replaced by the skip sentinel
    Skipped,
    /// Unresolved, error propagated
    Failed,
}

/// How one token ended
#[derive(Debug, Clone, PartialEq)]
pub enum TokenOutcome {
    /// Resolved (primary, cached, stale, default, fallback or retried value)
    Resolved(ResolverResult),
    /// Literal placeholder kept; the original error is surfaced
    Degraded {
        /// Literal placeholder text
        literal: String,
        /// Original failure
        error: ResolutionError,
    },
    /// Sentinel substituted so dependents can proceed
    Skipped {
        /// `[SKIPPED:<id>]`
        marker: String,
        /// Original failure
        error: ResolutionError,
    },
    /// Propagated failure; the placeholder stays in the text
    Failed(ResolutionError),
}

impl TokenOutcome {
    /// Outcome kind
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            TokenOutcome::Resolved(_) => OutcomeKind::Resolved,
            TokenOutcome::Degraded { .. } => OutcomeKind::Degraded,
            TokenOutcome::Skipped { .. } => OutcomeKind::Skipped,
            TokenOutcome::Failed(_) => OutcomeKind::Failed,
        }
    }

    /// Whether the token resolved to a value
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, TokenOutcome::Resolved(_))
    }

    /// Surfaced error, if the token did not resolve
    #[must_use]
    pub fn error(&self) -> Option<&ResolutionError> {
        match self {
            TokenOutcome::Resolved(_) => None,
            TokenOutcome::Degraded { error, .. }
            | TokenOutcome::Skipped { error, .. }
            | TokenOutcome::Failed(error) => Some(error),
        }
    }

    /// Value visible to dependents; `None` blocks them
    #[must_use]
    pub fn value_for_dependents(&self) -> Option<Value> {
        match self {
            TokenOutcome::Resolved(result) => Some(result.value().cloned().unwrap_or(Value::Null)),
            TokenOutcome::Skipped { marker, .. } => Some(Value::String(marker.clone())),
            TokenOutcome::Degraded { .. } | TokenOutcome::Failed(_) => None,
        }
    }

    /// Text substituted for the placeholder
    #[must_use]
    pub fn replacement(&self, placeholder: &str) -> String {
        match self {
            TokenOutcome::Resolved(result) => result.value().map(render_value).unwrap_or_default(),
            TokenOutcome::Degraded { literal, .. } => literal.clone(),
            TokenOutcome::Skipped { marker, .. } => marker.clone(),
            TokenOutcome::Failed(_) => placeholder.to_string(),
        }
    }

    /// Resolver result, when resolved
    #[inline]
    #[must_use]
    pub fn result(&self) -> Option<&ResolverResult> {
        match self {
            TokenOutcome::Resolved(result) => Some(result),
            _ => None,
        }
    }
}
