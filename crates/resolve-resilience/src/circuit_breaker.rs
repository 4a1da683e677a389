//! Circuit breaker registry
//!
//! One breaker per resolver key (`TYPE:namespace`), created lazily on the
//! first recorded success or failure. Each read-modify-write runs under the
//! `DashMap` entry lock for its key, so increment-and-compare and state
//! transitions are atomic per key.
//!
//! ```text
//! closed --(consecutive failures >= threshold)--> open
//! open --(cooldown elapsed)--> half-open
//! half-open --(success)--> closed
//! half-open --(failure)--> open
//! ```
//!
//! Maintenance sweeps and explicit resets return a breaker to `closed` from
//! any state; they are administrative and bypass the transition table.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use resolve_core::ResolverKey;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls pass through
    #[default]
    Closed,
    /// Calls rejected until the cooldown elapses
    Open,
    /// Calls admitted to probe recovery
    HalfOpen,
}

impl CircuitState {
    /// Kebab-case name
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CircuitError {
    /// Transition not in the state table
    #[error("illegal circuit transition: {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: CircuitState,
        /// Requested state
        to: CircuitState,
    },
}

/// States reachable from `from` through normal operation
#[must_use]
pub fn allowed_transitions(from: CircuitState) -> &'static [CircuitState] {
    use CircuitState::{Closed, HalfOpen, Open};
    match from {
        Closed => &[Open],
        Open => &[HalfOpen],
        HalfOpen => &[Closed, Open],
    }
}

/// Validate a state transition
///
/// # Errors
/// Returns `IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: CircuitState, to: CircuitState) -> Result<(), CircuitError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(CircuitError::IllegalTransition { from, to })
    }
}

/// Breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time an open breaker rejects calls
    pub cooldown: Duration,
    /// Inactivity after which a breaker is swept back to closed
    pub maintenance_window: Duration,
}

impl CircuitBreakerConfig {
    /// With failure threshold
    #[inline]
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// With cooldown
    #[inline]
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// With maintenance window
    #[inline]
    #[must_use]
    pub fn with_maintenance_window(mut self, window: Duration) -> Self {
        self.maintenance_window = window;
        self
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            maintenance_window: Duration::from_secs(300),
        }
    }
}

/// Gate decision for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed
    Allowed,
    /// Breaker half-open; the call probes recovery
    Probe,
    /// Breaker open
    Rejected {
        /// Time until the cooldown elapses
        retry_in: Duration,
    },
}

impl Admission {
    /// Whether the call may proceed
    #[inline]
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    /// Resolver key
    pub key: ResolverKey,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures
    pub consecutive_failures: u32,
    /// Failures since creation or reset
    pub total_failures: u64,
    /// Successes since creation or reset
    pub total_successes: u64,
    /// Last success
    pub last_success_at: Option<DateTime<Utc>>,
    /// Last failure
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Milliseconds until an open breaker admits a probe
    pub retry_in_ms: Option<u64>,
}

#[derive(Debug, Clone)]
struct BreakerRecord {
    state: CircuitState,
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    last_activity: Instant,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    next_retry: Option<Instant>,
}

impl BreakerRecord {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_failures: 0,
            total_successes: 0,
            last_activity: now,
            last_success_at: None,
            last_failure_at: None,
            next_retry: None,
        }
    }

    fn transition(&mut self, key: &ResolverKey, to: CircuitState) -> bool {
        if let Err(err) = validate_transition(self.state, to) {
            debug!(resolver = %key, %err, "ignoring circuit transition");
            return false;
        }
        let from = std::mem::replace(&mut self.state, to);
        match to {
            CircuitState::Open => warn!(
                resolver = %key,
                %from,
                consecutive_failures = self.consecutive_failures,
                "circuit opened"
            ),
            CircuitState::HalfOpen | CircuitState::Closed => {
                info!(resolver = %key, %from, to = %to, "circuit transition");
            }
        }
        metrics::counter!(
            "resolve.circuit.transitions.total",
            "resolver" => key.to_string(),
            "to" => to.as_str()
        )
        .increment(1);
        true
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.next_retry = None;
    }

    fn status(&self, key: &ResolverKey, now: Instant) -> CircuitBreakerStatus {
        let retry_in_ms = match (self.state, self.next_retry) {
            (CircuitState::Open, Some(at)) => {
                Some(u64::try_from(at.saturating_duration_since(now).as_millis()).unwrap_or(u64::MAX))
            }
            _ => None,
        };
        CircuitBreakerStatus {
            key: key.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            last_success_at: self.last_success_at,
            last_failure_at: self.last_failure_at,
            retry_in_ms,
        }
    }
}

/// Engine-owned registry of per-resolver breakers
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<ResolverKey, BreakerRecord>,
}

impl CircuitBreakerRegistry {
    /// Create registry
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Gate a call, moving an open breaker to half-open once its cooldown elapsed
    pub fn check(&self, key: &ResolverKey) -> Admission {
        let Some(mut record) = self.breakers.get_mut(key) else {
            return Admission::Allowed;
        };
        let state = record.state;
        match state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::HalfOpen => Admission::Probe,
            CircuitState::Open => {
                let now = Instant::now();
                match record.next_retry {
                    Some(at) if now < at => Admission::Rejected {
                        retry_in: at - now,
                    },
                    _ => {
                        record.transition(key, CircuitState::HalfOpen);
                        Admission::Probe
                    }
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self, key: &ResolverKey) -> CircuitState {
        let now = Instant::now();
        let mut record = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| BreakerRecord::new(now));
        record.total_successes += 1;
        record.last_activity = now;
        record.last_success_at = Some(Utc::now());
        let state = record.state;
        match state {
            CircuitState::Closed => record.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                if record.transition(key, CircuitState::Closed) {
                    record.close();
                }
            }
            // A call admitted before the breaker opened; the cooldown stands
            CircuitState::Open => {}
        }
        record.state
    }

    /// Record a failed call
    pub fn record_failure(&self, key: &ResolverKey) -> CircuitState {
        let now = Instant::now();
        let mut record = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| BreakerRecord::new(now));
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.total_failures += 1;
        record.last_activity = now;
        record.last_failure_at = Some(Utc::now());

        let should_open = match record.state {
            CircuitState::Closed => record.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if should_open && record.transition(key, CircuitState::Open) {
            record.next_retry = Some(now + self.config.cooldown);
        }
        record.state
    }

    /// Current state (`closed` for keys never seen)
    #[must_use]
    pub fn state(&self, key: &ResolverKey) -> CircuitState {
        self.breakers
            .get(key)
            .map_or(CircuitState::Closed, |r| r.state)
    }

    /// Status of one breaker, if it exists
    #[must_use]
    pub fn status(&self, key: &ResolverKey) -> Option<CircuitBreakerStatus> {
        let now = Instant::now();
        self.breakers.get(key).map(|r| r.status(key, now))
    }

    /// Status of every breaker, ordered by key
    #[must_use]
    pub fn snapshot(&self) -> Vec<CircuitBreakerStatus> {
        let now = Instant::now();
        let mut all: Vec<CircuitBreakerStatus> = self
            .breakers
            .iter()
            .map(|entry| entry.value().status(entry.key(), now))
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Reset breakers idle longer than the maintenance window; returns how many
    pub fn sweep_stale(&self) -> usize {
        let now = Instant::now();
        let window = self.config.maintenance_window;
        let mut swept = 0;
        for mut entry in self.breakers.iter_mut() {
            let idle = now.saturating_duration_since(entry.last_activity);
            if entry.state != CircuitState::Closed && idle >= window {
                info!(
                    resolver = %entry.key(),
                    from = %entry.state,
                    idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
                    "sweeping stale circuit back to closed"
                );
                entry.close();
                swept += 1;
            }
        }
        swept
    }

    /// Reset one breaker to closed with cleared counters; false if unknown
    pub fn reset(&self, key: &ResolverKey) -> bool {
        let Some(mut record) = self.breakers.get_mut(key) else {
            return false;
        };
        *record = BreakerRecord::new(Instant::now());
        info!(resolver = %key, "circuit reset");
        true
    }

    /// Open a breaker for one cooldown regardless of its counters
    pub fn force_open(&self, key: &ResolverKey) {
        let now = Instant::now();
        let mut record = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| BreakerRecord::new(now));
        record.state = CircuitState::Open;
        record.last_activity = now;
        record.next_retry = Some(now + self.config.cooldown);
        warn!(resolver = %key, cooldown_ms = u64::try_from(self.config.cooldown.as_millis()).unwrap_or(u64::MAX), "circuit forced open");
    }

    /// Number of tracked breakers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker exists yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
