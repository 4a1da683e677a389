//! Resolve Core
//!
//! Shared vocabulary for placeholder resolution.
//!
//! # Core Concepts
//!
//! - [`Token`]: a typed placeholder (`{TYPE:namespace:scope:identifier}`)
//!   extracted from text
//! - [`Resolver`]: pluggable component serving one `TYPE:namespace`
//! - [`ResolverResult`]: value-or-error outcome of one resolve call
//! - [`ResolutionError`]: coded, flagged failure driving the failure policy
//! - [`FailurePolicy`]: caller-selected handling of unresolved tokens
//! - [`CacheKey`]: Blake3 key over the canonical token identity
//!
//! # Example
//!
//! ```rust
//! use resolve_core::{GrammarSet, TokenType};
//!
//! let grammars = GrammarSet::standard().unwrap();
//! let found = grammars.scan("Use {DATA:artifact:v1:req}");
//! assert_eq!(found[0].0.key.token_type, TokenType::Data);
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod cache_key;
pub mod error;
pub mod grammar;
pub mod outcome;
pub mod policy;
pub mod resolver;
pub mod result;
pub mod token;

// Re-exports for convenience
pub use cache_key::{CacheKey, CacheKeyError};
pub use error::{ErrorCategory, ErrorCode, ResolutionError};
pub use grammar::{GrammarError, GrammarMatch, GrammarSet, PlaceholderGrammar};
pub use outcome::{skipped_marker, OutcomeKind, TokenOutcome};
pub use policy::{FailureMode, FailurePolicy, PolicyError};
pub use resolver::{Resolver, ResolverContext, ValidationIssue, ValidationResult};
pub use result::{render_value, CostImpact, ResolutionMetadata, ResolverResult};
pub use token::{
    CachePolicy, PermissionScope, ResolverKey, Token, TokenId, TokenKey, TokenParseError,
    TokenType,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for resolver implementers
    pub use crate::{
        FailureMode, FailurePolicy, ResolutionError, Resolver, ResolverContext, ResolverResult,
        Token, TokenId, TokenType, ValidationResult,
    };
}
