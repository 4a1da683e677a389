//! Resolve Cache
//!
//! Cache seam between the resolution engine and the external value store.
//!
//! The engine writes every successful primary resolution keyed by the token's
//! [`CacheKey`](resolve_core::CacheKey) with an expiry derived from the token's
//! [`CachePolicy`](resolve_core::CachePolicy) via [`TtlClasses`]. Readers decide
//! between fresh and stale entries themselves.

#![warn(unreachable_pub)]

pub mod cache;
pub mod ttl;

pub use cache::{CacheEntry, CacheStats, MokaResolutionCache, ResolutionCache};
pub use ttl::TtlClasses;
