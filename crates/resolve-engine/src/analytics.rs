//! Processing analytics
//!
//! One [`SessionRecord`] per `process_text` call goes into a bounded buffer.
//! Records leaving the buffer, by eviction or by [`AnalyticsAggregator::fold`],
//! are added to cumulative counters, so snapshots always cover every session.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use resolve_core::TokenType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// Metrics of one processing call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id of the caller context
    pub session_id: Uuid,
    /// Distinct tokens
    pub tokens_processed: u64,
    /// Tokens resolved to a value
    pub successful: u64,
    /// Tokens left unresolved (degraded, skipped or failed)
    pub failed: u64,
    /// Values served from cache
    pub cache_hits: u64,
    /// Values produced by fallback paths
    pub fallback_resolutions: u64,
    /// Summed per-token resolve time in milliseconds
    pub resolve_time_ms: u64,
    /// Wall-clock time of the call in milliseconds
    pub processing_time_ms: u64,
    /// Tokens per type
    pub type_counts: BTreeMap<TokenType, u64>,
    /// Completion time
    pub recorded_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Empty record for a session
    #[must_use]
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            tokens_processed: 0,
            successful: 0,
            failed: 0,
            cache_hits: 0,
            fallback_resolutions: 0,
            resolve_time_ms: 0,
            processing_time_ms: 0,
            type_counts: BTreeMap::new(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Totals {
    sessions: u64,
    tokens: u64,
    successful: u64,
    failed: u64,
    cache_hits: u64,
    fallback_resolutions: u64,
    resolve_time_ms: u64,
    processing_time_ms: u64,
    type_distribution: BTreeMap<TokenType, u64>,
}

impl Totals {
    fn add(&mut self, record: &SessionRecord) {
        self.sessions += 1;
        self.tokens += record.tokens_processed;
        self.successful += record.successful;
        self.failed += record.failed;
        self.cache_hits += record.cache_hits;
        self.fallback_resolutions += record.fallback_resolutions;
        self.resolve_time_ms += record.resolve_time_ms;
        self.processing_time_ms += record.processing_time_ms;
        for (token_type, count) in &record.type_counts {
            *self.type_distribution.entry(*token_type).or_default() += count;
        }
    }
}

/// Aggregate view over every recorded session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    /// Sessions recorded
    pub sessions: u64,
    /// Tokens processed
    pub tokens_processed: u64,
    /// Tokens resolved
    pub successful_resolutions: u64,
    /// Tokens unresolved
    pub failed_resolutions: u64,
    /// Resolved over processed
    pub success_rate: f64,
    /// Cache hits over processed
    pub cache_hit_rate: f64,
    /// Mean per-token resolve time in milliseconds
    pub average_resolve_time_ms: f64,
    /// Mean per-session processing time in milliseconds
    pub average_processing_time_ms: f64,
    /// Values produced by fallback paths
    pub fallback_resolutions: u64,
    /// Tokens per type
    pub type_distribution: BTreeMap<TokenType, u64>,
    /// Sessions still in the rolling buffer
    pub buffered_sessions: usize,
}

#[derive(Debug, Default)]
struct Inner {
    buffer: VecDeque<SessionRecord>,
    cumulative: Totals,
}

/// Rolling analytics buffer with cumulative counters
#[derive(Debug)]
pub struct AnalyticsAggregator {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl AnalyticsAggregator {
    /// Create aggregator keeping at most `capacity` sessions buffered
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Buffer capacity
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a session, folding the oldest one out when full
    pub fn record(&self, record: SessionRecord) {
        let mut inner = self.inner.lock();
        inner.buffer.push_back(record);
        while inner.buffer.len() > self.capacity {
            if let Some(oldest) = inner.buffer.pop_front() {
                inner.cumulative.add(&oldest);
            }
        }
    }

    /// Move every buffered session into the cumulative counters
    pub fn fold(&self) -> usize {
        let mut inner = self.inner.lock();
        let Inner { buffer, cumulative } = &mut *inner;
        let folded = buffer.len();
        for record in buffer.drain(..) {
            cumulative.add(&record);
        }
        folded
    }

    /// Recent sessions, oldest first
    #[must_use]
    pub fn recent(&self) -> Vec<SessionRecord> {
        self.inner.lock().buffer.iter().cloned().collect()
    }

    /// Snapshot over cumulative counters and the buffer
    #[must_use]
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let inner = self.inner.lock();
        let mut totals = inner.cumulative.clone();
        for record in &inner.buffer {
            totals.add(record);
        }

        AnalyticsSnapshot {
            sessions: totals.sessions,
            tokens_processed: totals.tokens,
            successful_resolutions: totals.successful,
            failed_resolutions: totals.failed,
            success_rate: ratio(totals.successful, totals.tokens),
            cache_hit_rate: ratio(totals.cache_hits, totals.tokens),
            average_resolve_time_ms: ratio(totals.resolve_time_ms, totals.tokens),
            average_processing_time_ms: ratio(totals.processing_time_ms, totals.sessions),
            fallback_resolutions: totals.fallback_resolutions,
            type_distribution: totals.type_distribution,
            buffered_sessions: inner.buffer.len(),
        }
    }
}

impl Default for AnalyticsAggregator {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
