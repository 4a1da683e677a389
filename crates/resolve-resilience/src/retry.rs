//! Retry with exponential backoff
//!
//! `delay(n) = min(max_backoff, base * multiplier^(n-1))`, optionally with up
//! to 10% jitter added and the result capped again at `max_backoff`.

use rand::Rng;
use resolve_core::{ErrorCode, FailurePolicy, ResolutionError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Largest jitter fraction added to a delay
pub const MAX_JITTER: f64 = 0.1;

/// Backoff configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Re-invocations after the first failed attempt
    pub max_retries: u32,
    /// Backoff growth factor
    pub backoff_multiplier: f64,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Delay ceiling, in milliseconds
    pub max_backoff_ms: u64,
    /// Add up to 10% random jitter
    pub jitter: bool,
}

impl RetryConfig {
    /// Copy with the per-call knobs of a failure policy
    #[must_use]
    pub fn for_policy(&self, policy: &FailurePolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            backoff_multiplier: policy.backoff_multiplier,
            ..*self
        }
    }

    /// With jitter disabled
    #[inline]
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Unjittered delay before retry number `retry` (1-based)
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let max = self.max_backoff_ms as f64;
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.max(0.0).powi(exponent);
        let ms = if raw.is_finite() { raw.min(max) } else { max };
        Duration::from_millis(ms.max(0.0) as u64)
    }

    /// Delay before retry number `retry`, jittered if enabled
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff_delay(retry);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(0.0..=MAX_JITTER);
        let jittered = delay.mul_f64(1.0 + factor);
        jittered.min(Duration::from_millis(self.max_backoff_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 2.0,
            base_delay_ms: 100,
            max_backoff_ms: 5_000,
            jitter: true,
        }
    }
}

/// Why a retry loop gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    /// Attempts made, the first failed call included
    pub attempts: u32,
    /// Error of the last attempt
    pub last: ResolutionError,
    /// Every error in attempt order
    pub history: Vec<ResolutionError>,
    /// True if the budget ran out, false if an error stopped the loop early
    pub exhausted: bool,
}

impl RetryFailure {
    /// Error to surface: `MAX_RETRIES_EXCEEDED` after real retries, else the last error
    #[must_use]
    pub fn into_error(self) -> ResolutionError {
        if self.exhausted && self.attempts > 1 {
            ResolutionError::max_retries_exceeded(self.attempts, &self.last)
        } else {
            self.last
        }
    }
}

/// Whether another attempt may help
///
/// Non-retryable errors stop the loop, and so does a circuit-breaker
/// rejection: the breaker will not admit calls before its cooldown.
#[inline]
#[must_use]
pub fn should_retry(error: &ResolutionError) -> bool {
    error.retryable && error.code != ErrorCode::CircuitBreakerOpen
}

/// Run `operation` with retries; it receives the 1-based attempt number
///
/// # Errors
/// Returns [`RetryFailure`] once an error stops the loop or the budget runs out
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ResolutionError>>,
{
    match operation(1).await {
        Ok(value) => Ok(value),
        Err(first) => retry_after_failure(config, first, operation).await,
    }
}

/// Continue retrying after a first attempt already failed with `first`
///
/// # Errors
/// Returns [`RetryFailure`] once an error stops the loop or the budget runs out
pub async fn retry_after_failure<T, F, Fut>(
    config: &RetryConfig,
    first: ResolutionError,
    mut operation: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ResolutionError>>,
{
    let mut attempts = 1;
    let mut last = first;
    let mut history = Vec::new();

    loop {
        if !should_retry(&last) {
            debug!(attempts, code = %last.code, "not retrying");
            return Err(finish(attempts, last, history, false));
        }
        if attempts > config.max_retries {
            return Err(finish(attempts, last, history, true));
        }

        let delay = config.delay_for(attempts);
        debug!(
            attempt = attempts + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retrying after backoff"
        );
        sleep(delay).await;

        attempts += 1;
        match operation(attempts).await {
            Ok(value) => {
                debug!(attempts, "succeeded after retry");
                return Ok(value);
            }
            Err(err) => history.push(std::mem::replace(&mut last, err)),
        }
    }
}

fn finish(
    attempts: u32,
    last: ResolutionError,
    mut history: Vec<ResolutionError>,
    exhausted: bool,
) -> RetryFailure {
    history.push(last.clone());
    RetryFailure {
        attempts,
        last,
        history,
        exhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolve_core::{ResolverKey, TokenType};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            backoff_multiplier: 2.0,
            base_delay_ms: 100,
            max_backoff_ms: 1_000,
            jitter: false,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = config();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(5), Duration::from_millis(1_000));
        assert_eq!(config.backoff_delay(200), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_ten_percent_and_cap() {
        let config = RetryConfig {
            jitter: true,
            ..config()
        };
        for _ in 0..100 {
            let delay = config.delay_for(2);
            assert!(delay >= Duration::from_millis(199));
            assert!(delay <= Duration::from_millis(221));
            assert!(config.delay_for(10) <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn policy_overrides_retry_knobs() {
        let policy = FailurePolicy::new().max_retries(7).backoff_multiplier(1.5);
        let derived = config().for_policy(&policy);
        assert_eq!(derived.max_retries, 7);
        assert!((derived.backoff_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(derived.base_delay_ms, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&config(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(ResolutionError::resolver_failed("flaky"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries_plus_one() {
        let calls = AtomicU32::new(0);
        let failure = retry_with_backoff(&config(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ResolutionError::resolver_failed("down")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(failure.attempts, 4);
        assert_eq!(failure.history.len(), 4);
        assert!(failure.exhausted);
        assert_eq!(failure.into_error().code, ErrorCode::MaxRetriesExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_short_circuits() {
        let calls = AtomicU32::new(0);
        let failure = retry_with_backoff(&config(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ResolutionError::validation_failed("bad")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!failure.exhausted);
        assert_eq!(failure.into_error().code, ErrorCode::ValidationFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_open_ends_retries() {
        let key = ResolverKey::new(TokenType::Data, "artifact");
        let calls = AtomicU32::new(0);
        let failure = retry_after_failure(
            &config(),
            ResolutionError::resolver_failed("boom"),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = ResolutionError::circuit_open(&key, Duration::from_secs(5));
                async move { Err::<(), _>(err) }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.last.code, ErrorCode::CircuitBreakerOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_propagates_first_error() {
        let config = RetryConfig {
            max_retries: 0,
            ..config()
        };
        let failure = retry_after_failure(
            &config,
            ResolutionError::resolver_failed("once"),
            |_| async { Ok::<(), _>(()) },
        )
        .await
        .unwrap_err();
        assert_eq!(failure.into_error().code, ErrorCode::ResolutionError);
    }
}
