//! Per-failure error context

use resolve_core::{ResolutionError, ResolverContext, TokenId};
use tokio::time::Instant;

/// Attempt record for one token's recovery
#[derive(Debug, Clone)]
pub struct ErrorContext<'a> {
    /// Failing token
    pub token_id: TokenId,
    /// Current attempt, 1-based
    pub attempt: u32,
    /// Attempts allowed in total
    pub total_attempts: u32,
    /// Every error so far, oldest first
    pub history: Vec<ResolutionError>,
    /// When recovery started
    pub started_at: Instant,
    /// Caller context of the processing call
    pub resolver_context: &'a ResolverContext,
}

impl<'a> ErrorContext<'a> {
    /// Start a context from the first failure
    #[must_use]
    pub fn new(
        token_id: TokenId,
        error: ResolutionError,
        total_attempts: u32,
        resolver_context: &'a ResolverContext,
    ) -> Self {
        Self {
            token_id,
            attempt: 1,
            total_attempts: total_attempts.max(1),
            history: vec![error],
            started_at: Instant::now(),
            resolver_context,
        }
    }

    /// Most recent error
    #[must_use]
    pub fn last_error(&self) -> Option<&ResolutionError> {
        self.history.last()
    }

    /// First error, the one that started recovery
    #[must_use]
    pub fn original_error(&self) -> Option<&ResolutionError> {
        self.history.first()
    }

    /// Record a further failed attempt
    pub fn record(&mut self, error: ResolutionError) {
        self.attempt = self.attempt.saturating_add(1);
        self.history.push(error);
    }

    /// Append errors without counting attempts
    pub fn extend(&mut self, errors: impl IntoIterator<Item = ResolutionError>) {
        self.history.extend(errors);
    }

    /// Whether the attempt budget is spent
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.total_attempts
    }

    /// Time since recovery started, in milliseconds
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_attempts_and_history() {
        let ctx = ResolverContext::new();
        let id: TokenId = "DATA:a:v1:x".parse().unwrap();
        let mut error_ctx =
            ErrorContext::new(id, ResolutionError::resolver_failed("first"), 3, &ctx);
        assert!(!error_ctx.is_exhausted());

        error_ctx.record(ResolutionError::resolver_failed("second"));
        error_ctx.record(ResolutionError::resolver_failed("third"));

        assert_eq!(error_ctx.attempt, 3);
        assert!(error_ctx.is_exhausted());
        assert_eq!(error_ctx.original_error().unwrap().message, "first");
        assert_eq!(error_ctx.last_error().unwrap().message, "third");
    }
}
