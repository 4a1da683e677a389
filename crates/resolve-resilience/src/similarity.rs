//! Similarity search over past resolutions
//!
//! [`SimilarityIndex`] is the seam to a vector-search backend. The in-memory
//! [`LexicalSimilarityIndex`] scores by Jaccard overlap of identity terms and
//! keeps a bounded history per token type.

use parking_lot::RwLock;
use resolve_core::{Token, TokenId, TokenType};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Debug;

/// Closest past resolution
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMatch {
    /// Token the value was resolved for
    pub source: TokenId,
    /// Its value
    pub value: Value,
    /// Score in `0.0..=1.0`
    pub score: f64,
}

/// Search backend over previously successful resolutions
#[async_trait::async_trait]
pub trait SimilarityIndex: Send + Sync + Debug {
    /// Remember a successful resolution
    async fn record(&self, token: &Token, value: &Value);

    /// Best match of the same token type scoring at least `threshold`
    async fn search(&self, token: &Token, threshold: f64) -> Option<SimilarMatch>;
}

#[derive(Debug, Clone)]
struct IndexedResolution {
    id: TokenId,
    terms: BTreeSet<String>,
    value: Value,
}

/// In-memory lexical index
#[derive(Debug)]
pub struct LexicalSimilarityIndex {
    per_type_capacity: usize,
    entries: RwLock<HashMap<TokenType, VecDeque<IndexedResolution>>>,
}

impl LexicalSimilarityIndex {
    /// Create index keeping at most `per_type_capacity` resolutions per type
    #[must_use]
    pub fn new(per_type_capacity: usize) -> Self {
        Self {
            per_type_capacity: per_type_capacity.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of indexed resolutions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().values().map(VecDeque::len).sum()
    }

    /// Whether nothing is indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LexicalSimilarityIndex {
    fn default() -> Self {
        Self::new(1_000)
    }
}

/// Lower-cased alphanumeric terms of namespace, scope and identifier
fn terms(token: &Token) -> BTreeSet<String> {
    [&token.key.namespace, &token.key.scope, &token.key.identifier]
        .into_iter()
        .flat_map(|part| part.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[async_trait::async_trait]
impl SimilarityIndex for LexicalSimilarityIndex {
    async fn record(&self, token: &Token, value: &Value) {
        let mut entries = self.entries.write();
        let bucket = entries.entry(token.token_type()).or_default();
        bucket.retain(|e| e.id != token.id);
        if bucket.len() >= self.per_type_capacity {
            bucket.pop_front();
        }
        bucket.push_back(IndexedResolution {
            id: token.id.clone(),
            terms: terms(token),
            value: value.clone(),
        });
    }

    async fn search(&self, token: &Token, threshold: f64) -> Option<SimilarMatch> {
        let query = terms(token);
        let entries = self.entries.read();
        entries
            .get(&token.token_type())?
            .iter()
            .map(|e| (e, jaccard(&query, &e.terms)))
            .filter(|(_, score)| *score >= threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(e, score)| SimilarMatch {
                source: e.id.clone(),
                value: e.value.clone(),
                score,
            })
    }
}
