//! Resolver seam
//!
//! Concrete resolvers (context, data, state, metrics, temporal) live outside
//! this workspace and plug in through [`Resolver`].
//!
//! # Abandonment contract
//!
//! The engine races every `resolve` call against a timeout. When the timeout
//! wins, the engine stops waiting but does not abort the call: the resolver
//! future keeps running detached until it settles. Implementations must be
//! safe to abandon, holding no resources that only the caller could release.

use crate::error::ResolutionError;
use crate::result::ResolverResult;
use crate::token::{PermissionScope, ResolverKey, Token, TokenId, TokenType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Per-call context handed to resolvers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverContext {
    /// Processing session id
    pub session_id: Uuid,
    /// Calling principal, if known
    pub user_id: Option<String>,
    /// Scopes granted to the caller
    pub permissions: Vec<PermissionScope>,
    /// Free-form attributes
    pub attributes: BTreeMap<String, String>,
    /// Values of already-resolved dependencies
    pub resolved: HashMap<TokenId, Value>,
}

impl ResolverContext {
    /// Create context with a fresh session id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            ..Self::default()
        }
    }

    /// With calling user
    #[inline]
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// With granted permission
    #[inline]
    #[must_use]
    pub fn with_permission(mut self, scope: PermissionScope) -> Self {
        if !self.permissions.contains(&scope) {
            self.permissions.push(scope);
        }
        self
    }

    /// With attribute
    #[inline]
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Record a resolved dependency value
    #[inline]
    pub fn insert_resolved(&mut self, id: TokenId, value: Value) {
        self.resolved.insert(id, value);
    }

    /// Resolved value of a dependency
    #[inline]
    #[must_use]
    pub fn dependency_value(&self, id: &TokenId) -> Option<&Value> {
        self.resolved.get(id)
    }

    /// Attribute lookup
    #[inline]
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Validation issue reported by a resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Machine-readable code
    pub code: String,
    /// Detail
    pub message: String,
}

impl ValidationIssue {
    /// Create new issue
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Validation outcome for one token
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the token may be resolved
    pub valid: bool,
    /// Blocking issues
    pub errors: Vec<ValidationIssue>,
    /// Non-blocking issues
    pub warnings: Vec<ValidationIssue>,
    /// Dependencies the resolver declares for this token
    pub dependencies: Vec<TokenId>,
}

impl ValidationResult {
    /// Valid, no issues
    #[inline]
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    /// Invalid with one issue
    #[inline]
    #[must_use]
    pub fn invalid(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![ValidationIssue::new(code, message)],
            ..Self::default()
        }
    }

    /// No resolver for the token's key
    #[must_use]
    pub fn no_resolver(key: &ResolverKey) -> Self {
        Self::invalid("NO_RESOLVER", format!("no resolver registered for {key}"))
    }

    /// With declared dependencies
    #[inline]
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TokenId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    /// With warning
    #[inline]
    #[must_use]
    pub fn with_warning(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.warnings.push(ValidationIssue::new(code, message));
        self
    }

    /// Whether the failure is a missing resolver
    #[inline]
    #[must_use]
    pub fn is_missing_resolver(&self) -> bool {
        self.errors.iter().any(|e| e.code == "NO_RESOLVER")
    }

    /// Convert a failed validation into a resolution error
    #[must_use]
    pub fn to_error(&self, key: &ResolverKey) -> Option<ResolutionError> {
        if self.valid {
            return None;
        }
        if self.is_missing_resolver() {
            return Some(ResolutionError::no_resolver(key));
        }
        let detail: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        Some(ResolutionError::validation_failed(detail.join("; ")))
    }
}

/// Pluggable type-specific resolver
///
/// Registered under `TYPE:namespace`. Returning `Err` or a failed
/// [`ResolverResult`] both count as a failed call for circuit breaking and
/// failure handling.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// Token type served
    fn token_type(&self) -> TokenType;

    /// Namespace served
    fn namespace(&self) -> &str;

    /// Registry key
    fn key(&self) -> ResolverKey {
        ResolverKey::new(self.token_type(), self.namespace())
    }

    /// Check a token before planning; may declare dependencies
    fn validate(&self, _token: &Token) -> ValidationResult {
        ValidationResult::ok()
    }

    /// Resolve a token to a value
    async fn resolve(
        &self,
        token: &Token,
        context: &ResolverContext,
    ) -> Result<ResolverResult, ResolutionError>;
}
