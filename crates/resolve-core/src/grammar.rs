//! Placeholder grammars
//!
//! One grammar per token type, matching `{TYPE:namespace:scope:identifier}`.

use crate::token::{CachePolicy, TokenKey, TokenType};
use regex::Regex;
use std::ops::Range;

/// Errors building a grammar
#[derive(Debug, thiserror::Error)]
pub enum GrammarError {
    /// Pattern failed to compile
    #[error("invalid placeholder pattern for {token_type}: {source}")]
    InvalidPattern {
        /// Type the pattern was for
        token_type: TokenType,
        /// Regex error
        #[source]
        source: regex::Error,
    },

    /// Pattern lacks the three capture groups
    #[error("pattern for {0} must have exactly 3 capture groups")]
    WrongCaptureCount(TokenType),
}

/// One grammar match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarMatch {
    /// Byte span of the placeholder in the source text
    pub span: Range<usize>,
    /// Placeholder text, braces included
    pub placeholder: String,
    /// Parsed key
    pub key: TokenKey,
}

/// Placeholder grammar for one token type
#[derive(Debug, Clone)]
pub struct PlaceholderGrammar {
    token_type: TokenType,
    pattern: Regex,
    default_cache_policy: CachePolicy,
}

impl PlaceholderGrammar {
    /// Standard grammar for a token type
    ///
    /// # Errors
    /// Only fails if the built-in pattern does not compile
    pub fn standard(token_type: TokenType) -> Result<Self, GrammarError> {
        let pattern = format!(
            r"\{{{}:([A-Za-z0-9_-]+):([A-Za-z0-9_.-]+):([A-Za-z0-9_./-]+)\}}",
            regex::escape(token_type.as_str())
        );
        Self::custom(token_type, &pattern, token_type.default_cache_policy())
    }

    /// Grammar with a custom pattern
    ///
    /// The pattern must capture namespace, scope and identifier, in that order.
    ///
    /// # Errors
    /// Returns error if the pattern does not compile or has the wrong shape
    pub fn custom(
        token_type: TokenType,
        pattern: &str,
        default_cache_policy: CachePolicy,
    ) -> Result<Self, GrammarError> {
        let pattern = Regex::new(pattern)
            .map_err(|source| GrammarError::InvalidPattern { token_type, source })?;
        // captures_len counts the implicit whole-match group
        if pattern.captures_len() != 4 {
            return Err(GrammarError::WrongCaptureCount(token_type));
        }
        Ok(Self {
            token_type,
            pattern,
            default_cache_policy,
        })
    }

    /// Token type
    #[inline]
    #[must_use]
    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    /// Default cache policy for matched tokens
    #[inline]
    #[must_use]
    pub fn default_cache_policy(&self) -> CachePolicy {
        self.default_cache_policy
    }

    /// All matches in `text`, in order of appearance
    #[must_use]
    pub fn matches(&self, text: &str) -> Vec<GrammarMatch> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let key = TokenKey::new(
                    self.token_type,
                    caps.get(1)?.as_str(),
                    caps.get(2)?.as_str(),
                    caps.get(3)?.as_str(),
                );
                Some(GrammarMatch {
                    span: whole.range(),
                    placeholder: whole.as_str().to_string(),
                    key,
                })
            })
            .collect()
    }
}

/// Grammar table, one entry per token type
#[derive(Debug, Clone)]
pub struct GrammarSet {
    grammars: Vec<PlaceholderGrammar>,
}

impl GrammarSet {
    /// Empty set
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self {
            grammars: Vec::new(),
        }
    }

    /// Standard grammars for every token type
    ///
    /// # Errors
    /// Only fails if a built-in pattern does not compile
    pub fn standard() -> Result<Self, GrammarError> {
        let grammars = TokenType::ALL
            .into_iter()
            .map(PlaceholderGrammar::standard)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { grammars })
    }

    /// Add or replace the grammar for its token type
    pub fn insert(&mut self, grammar: PlaceholderGrammar) {
        self.grammars
            .retain(|g| g.token_type() != grammar.token_type());
        self.grammars.push(grammar);
    }

    /// Matches of every grammar, ordered by position in `text`
    #[must_use]
    pub fn scan(&self, text: &str) -> Vec<(GrammarMatch, CachePolicy)> {
        let mut all: Vec<(GrammarMatch, CachePolicy)> = self
            .grammars
            .iter()
            .flat_map(|g| {
                let policy = g.default_cache_policy();
                g.matches(text).into_iter().map(move |m| (m, policy))
            })
            .collect();
        all.sort_by_key(|(m, _)| m.span.start);
        all
    }

    /// Number of grammars
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.grammars.len()
    }

    /// Whether the set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grammars.is_empty()
    }
}
