//! Token extraction and validation
//!
//! Pure over text, grammar table and a registry snapshot: no resolver is
//! invoked, only `validate`.

use crate::registry::ResolverRegistry;
use indexmap::IndexMap;
use resolve_cache::TtlClasses;
use resolve_core::{GrammarSet, Token, TokenId, ValidationResult};
use serde::Serialize;
use std::ops::Range;
use tracing::{debug, trace};

/// One distinct token found in the text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedToken {
    /// Token, with validated dependencies attached
    pub token: Token,
    /// Validation outcome
    pub validation: ValidationResult,
    /// Whether the token may be resolved
    pub is_valid: bool,
    /// Byte spans of every occurrence, in text order
    pub occurrences: Vec<Range<usize>>,
}

/// Extracts tokens using a grammar table
#[derive(Debug, Clone)]
pub struct TokenExtractor {
    grammars: GrammarSet,
    ttl: TtlClasses,
}

impl TokenExtractor {
    /// Create extractor
    #[must_use]
    pub fn new(grammars: GrammarSet, ttl: TtlClasses) -> Self {
        Self { grammars, ttl }
    }

    /// Grammar table
    #[inline]
    #[must_use]
    pub fn grammars(&self) -> &GrammarSet {
        &self.grammars
    }

    /// Extract and validate distinct tokens, in order of first appearance
    ///
    /// A placeholder repeated in the text yields one token with several
    /// occurrences. A missing resolver is reported as a `NO_RESOLVER`
    /// validation error, never as `Err`.
    #[must_use]
    pub fn extract(&self, text: &str, registry: &ResolverRegistry) -> Vec<ExtractedToken> {
        let mut found: IndexMap<TokenId, ExtractedToken> = IndexMap::new();

        for (m, cache_policy) in self.grammars.scan(text) {
            let id = m.key.id();
            if let Some(existing) = found.get_mut(&id) {
                existing.occurrences.push(m.span);
                continue;
            }

            let mut token = Token::with_placeholder(m.key, m.placeholder, cache_policy);
            token.set_ttl(self.ttl.ttl_for(cache_policy));

            let validation = match registry.get(&token.resolver_key()) {
                Some(resolver) => resolver.validate(&token),
                None => ValidationResult::no_resolver(&token.resolver_key()),
            };
            let is_valid = validation.valid;
            if is_valid {
                token = token.with_dependencies(validation.dependencies.iter().cloned());
            }
            trace!(token_id = %id, valid = is_valid, deps = token.dependencies.len(), "extracted token");

            found.insert(
                id,
                ExtractedToken {
                    token,
                    validation,
                    is_valid,
                    occurrences: vec![m.span],
                },
            );
        }

        debug!(tokens = found.len(), "extraction complete");
        found.into_values().collect()
    }
}
