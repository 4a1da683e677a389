//! Token model
//!
//! A token is a typed placeholder found in free text, identified by its
//! four-part key `TYPE:namespace:scope:identifier`.

use crate::cache_key::CacheKey;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// Placeholder token types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    /// Conversation or environment context
    Context,
    /// Data artifacts
    Data,
    /// Workflow or agent state
    State,
    /// Metrics and counters
    Metrics,
    /// Time-derived values
    Temporal,
}

impl TokenType {
    /// All token types, in grammar order
    pub const ALL: [TokenType; 5] = [
        TokenType::Context,
        TokenType::Data,
        TokenType::State,
        TokenType::Metrics,
        TokenType::Temporal,
    ];

    /// Upper-case tag used in placeholders
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TokenType::Context => "CONTEXT",
            TokenType::Data => "DATA",
            TokenType::State => "STATE",
            TokenType::Metrics => "METRICS",
            TokenType::Temporal => "TEMPORAL",
        }
    }

    /// Cache policy a grammar assigns to freshly extracted tokens of this type
    #[inline]
    #[must_use]
    pub const fn default_cache_policy(&self) -> CachePolicy {
        match self {
            TokenType::Context => CachePolicy::Medium,
            TokenType::Data => CachePolicy::Long,
            TokenType::State | TokenType::Metrics => CachePolicy::Short,
            TokenType::Temporal => CachePolicy::None,
        }
    }
}

impl Display for TokenType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TokenParseError::UnknownType(s.to_string()))
    }
}

/// Cache TTL class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Minutes
    Short,
    /// About an hour
    #[default]
    Medium,
    /// About a day
    Long,
    /// Never cached
    None,
}

/// Permission scope a token requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    /// Read-only access
    #[default]
    Read,
    /// Read and write
    Write,
    /// Administrative access
    Admin,
}

/// Errors parsing token identities
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenParseError {
    /// Unknown type tag
    #[error("unknown token type: '{0}'")]
    UnknownType(String),

    /// Wrong number of `:`-separated parts
    #[error("malformed token id '{0}': expected TYPE:namespace:scope:identifier")]
    Malformed(String),
}

/// Four-part token key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenKey {
    /// Token type
    pub token_type: TokenType,
    /// Resolver namespace
    pub namespace: String,
    /// Scope (version, environment, ...)
    pub scope: String,
    /// Identifier within the scope
    pub identifier: String,
}

impl TokenKey {
    /// Create new key
    #[must_use]
    pub fn new(
        token_type: TokenType,
        namespace: impl Into<String>,
        scope: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            token_type,
            namespace: namespace.into(),
            scope: scope.into(),
            identifier: identifier.into(),
        }
    }

    /// Deterministic id for this key
    #[inline]
    #[must_use]
    pub fn id(&self) -> TokenId {
        TokenId(self.to_string())
    }

    /// Key of the resolver responsible for this token
    #[inline]
    #[must_use]
    pub fn resolver_key(&self) -> ResolverKey {
        ResolverKey::new(self.token_type, self.namespace.clone())
    }

    /// Placeholder text as it appears in source text
    #[must_use]
    pub fn placeholder(&self) -> String {
        format!("{{{self}}}")
    }
}

impl Display for TokenKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.token_type, self.namespace, self.scope, self.identifier
        )
    }
}

impl FromStr for TokenKey {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(4, ':').collect();
        let [ty, namespace, scope, identifier] = parts.as_slice() else {
            return Err(TokenParseError::Malformed(s.to_string()));
        };
        if [namespace, scope, identifier].iter().any(|p| p.is_empty()) {
            return Err(TokenParseError::Malformed(s.to_string()));
        }
        Ok(Self::new(ty.parse()?, *namespace, *scope, *identifier))
    }
}

/// Stable token identifier (`TYPE:namespace:scope:identifier`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    /// Id as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse back into its key
    ///
    /// # Errors
    /// Returns error if the id is not a well-formed four-part key
    pub fn key(&self) -> Result<TokenKey, TokenParseError> {
        self.0.parse()
    }

    /// Collision-resistant cache key for this id
    #[inline]
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_token_id(self)
    }
}

impl Display for TokenId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TokenId {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: TokenKey = s.parse()?;
        Ok(key.id())
    }
}

impl From<&TokenKey> for TokenId {
    fn from(key: &TokenKey) -> Self {
        key.id()
    }
}

/// Resolver registry key (`TYPE:namespace`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResolverKey {
    /// Token type
    pub token_type: TokenType,
    /// Namespace
    pub namespace: String,
}

impl ResolverKey {
    /// Create new resolver key
    #[inline]
    #[must_use]
    pub fn new(token_type: TokenType, namespace: impl Into<String>) -> Self {
        Self {
            token_type,
            namespace: namespace.into(),
        }
    }
}

impl Display for ResolverKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.token_type, self.namespace)
    }
}

/// A placeholder token extracted from text
///
/// Tokens live for one processing call; only resolved values outlive them
/// (through the cache).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Deterministic id derived from `key`
    pub id: TokenId,
    /// Four-part key
    pub key: TokenKey,
    /// Literal placeholder text, braces included
    pub placeholder: String,
    /// TTL class for resolved values
    pub cache_policy: CachePolicy,
    /// Required permission scope
    pub permission_scope: PermissionScope,
    /// Ids of tokens that must resolve first
    pub dependencies: Vec<TokenId>,
    /// When a resolved value stops being fresh, if cacheable
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Token {
    /// Create token from key with the type's default cache policy
    #[must_use]
    pub fn new(key: TokenKey) -> Self {
        let policy = key.token_type.default_cache_policy();
        let placeholder = key.placeholder();
        Self::with_placeholder(key, placeholder, policy)
    }

    /// Create token from a grammar match
    #[must_use]
    pub fn with_placeholder(
        key: TokenKey,
        placeholder: impl Into<String>,
        cache_policy: CachePolicy,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: key.id(),
            key,
            placeholder: placeholder.into(),
            cache_policy,
            permission_scope: PermissionScope::default(),
            dependencies: Vec::new(),
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// With permission scope
    #[inline]
    #[must_use]
    pub fn with_permission_scope(mut self, scope: PermissionScope) -> Self {
        self.permission_scope = scope;
        self
    }

    /// With dependencies (self-references and duplicates dropped)
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TokenId>) -> Self {
        for dep in deps {
            self.add_dependency(dep);
        }
        self
    }

    /// Add a dependency, ignoring self-references and duplicates
    pub fn add_dependency(&mut self, dep: TokenId) {
        if dep != self.id && !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
            self.updated_at = Utc::now();
        }
    }

    /// Drop all dependencies
    pub fn clear_dependencies(&mut self) {
        self.dependencies.clear();
        self.updated_at = Utc::now();
    }

    /// Set expiry from a TTL (`None` clears it)
    pub fn set_ttl(&mut self, ttl: Option<Duration>) {
        self.expires_at = ttl
            .and_then(|d| ChronoDuration::from_std(d).ok())
            .map(|d| self.created_at + d);
    }

    /// Token type
    #[inline]
    #[must_use]
    pub fn token_type(&self) -> TokenType {
        self.key.token_type
    }

    /// Resolver key
    #[inline]
    #[must_use]
    pub fn resolver_key(&self) -> ResolverKey {
        self.key.resolver_key()
    }

    /// Whether `other` appears among this token's dependencies
    #[inline]
    #[must_use]
    pub fn depends_on(&self, other: &TokenId) -> bool {
        self.dependencies.contains(other)
    }
}
