//! Engine events
//!
//! Observable side channel over a `tokio::sync::broadcast` channel. Publishing
//! never blocks and never fails: with no subscribers the event is dropped, and
//! slow subscribers see `RecvError::Lagged` instead of stalling resolution.

use chrono::{DateTime, Utc};
use resolve_core::ResolverKey;
use resolve_resilience::CircuitBreakerStatus;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Event emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// `process_text` accepted its input
    ProcessingStarted {
        /// Session id
        session_id: Uuid,
        /// Input size in bytes
        text_bytes: usize,
    },
    /// `process_text` finished
    ProcessingCompleted {
        /// Session id
        session_id: Uuid,
        /// Distinct tokens
        tokens_processed: usize,
        /// Tokens resolved
        successful_resolutions: usize,
        /// Surfaced errors
        errors: usize,
        /// Wall-clock time in milliseconds
        processing_time_ms: u64,
    },
    /// `process_text` rejected its input
    ProcessingFailed {
        /// Session id
        session_id: Uuid,
        /// Reason
        reason: String,
    },
    /// Resolver registered
    ResolverRegistered {
        /// Resolver key
        key: ResolverKey,
        /// Whether an earlier resolver was replaced
        replaced: bool,
    },
    /// Resolver removed
    ResolverUnregistered {
        /// Resolver key
        key: ResolverKey,
    },
    /// Breaker states after maintenance
    CircuitBreakerSnapshot {
        /// Status of every known breaker
        breakers: Vec<CircuitBreakerStatus>,
        /// Snapshot time
        taken_at: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Event name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            EngineEvent::ProcessingStarted { .. } => "processing_started",
            EngineEvent::ProcessingCompleted { .. } => "processing_completed",
            EngineEvent::ProcessingFailed { .. } => "processing_failed",
            EngineEvent::ResolverRegistered { .. } => "resolver_registered",
            EngineEvent::ResolverUnregistered { .. } => "resolver_unregistered",
            EngineEvent::CircuitBreakerSnapshot { .. } => "circuit_breaker_snapshot",
        }
    }
}

/// Broadcast bus for [`EngineEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create bus with the given channel capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; dropped when nobody listens
    pub fn publish(&self, event: EngineEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            trace!(event = name, "no event subscribers");
        }
    }

    /// Subscribe to events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
