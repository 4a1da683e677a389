//! TTL classes

use resolve_core::CachePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Millisecond durations for each cache policy class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlClasses {
    /// `short` TTL in milliseconds
    pub short_ms: u64,
    /// `medium` TTL in milliseconds
    pub medium_ms: u64,
    /// `long` TTL in milliseconds
    pub long_ms: u64,
}

impl TtlClasses {
    /// TTL for a policy; `None` means never cache
    #[must_use]
    pub fn ttl_for(&self, policy: CachePolicy) -> Option<Duration> {
        match policy {
            CachePolicy::Short => Some(Duration::from_millis(self.short_ms)),
            CachePolicy::Medium => Some(Duration::from_millis(self.medium_ms)),
            CachePolicy::Long => Some(Duration::from_millis(self.long_ms)),
            CachePolicy::None => None,
        }
    }
}

impl Default for TtlClasses {
    fn default() -> Self {
        Self {
            short_ms: 5 * 60 * 1_000,
            medium_ms: 60 * 60 * 1_000,
            long_ms: 24 * 60 * 60 * 1_000,
        }
    }
}
