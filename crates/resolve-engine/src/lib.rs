//! Resolve Engine
//!
//! Resolves typed placeholders (`{TYPE:namespace:scope:identifier}`) in free
//! text through pluggable resolvers, with caching, dependency ordering,
//! per-resolver circuit breaking and policy-driven failure recovery.
//!
//! # Flow
//!
//! 1. [`TokenExtractor`] finds and validates tokens
//! 2. [`ResolutionPlanner`] orders them into groups of independent tokens
//! 3. [`ResolutionPipeline`] resolves each token: breaker gate, cache,
//!    admission, resolver under timeout, then the failure policy
//! 4. [`ResolutionEngine`] runs groups in sequence, members concurrently,
//!    and reassembles the text
//!
//! # Example
//!
//! ```rust,no_run
//! use resolve_engine::{EngineConfig, ResolutionEngine};
//! use resolve_core::ResolverContext;
//!
//! # async fn run() -> Result<(), resolve_engine::EngineError> {
//! let engine = ResolutionEngine::new(EngineConfig::default())?;
//! let result = engine
//!     .process_text("Use {DATA:artifact:v1:req}", &ResolverContext::new(), None)
//!     .await?;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod analytics;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod extractor;
pub mod pipeline;
pub mod planner;
pub mod registry;

pub use analytics::{AnalyticsAggregator, AnalyticsSnapshot, SessionRecord};
pub use config::{
    AnalyticsConfig, CacheConfig, EngineConfig, EngineLimits, FallbackConfig, ResilienceConfig,
};
pub use engine::{EngineBuilder, MaintenanceReport, ProcessResult, ResolutionEngine, TokenReport};
pub use error::{ConfigError, EngineError};
pub use events::{EngineEvent, EventBus};
pub use extractor::{ExtractedToken, TokenExtractor};
pub use pipeline::ResolutionPipeline;
pub use planner::{ResolutionPlan, ResolutionPlanner};
pub use registry::ResolverRegistry;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
