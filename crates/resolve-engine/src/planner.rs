//! Resolution planning
//!
//! Kahn's algorithm over the dependency graph. Each wave of tokens with no
//! unscheduled dependencies becomes one resolution group, so members of a
//! group never depend on each other and every token appears in at most one
//! group. Tokens that never reach in-degree zero sit on or behind a cycle and
//! are reported with `CYCLIC_DEPENDENCY` instead of being scheduled.

use chrono::Utc;
use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use resolve_cache::ResolutionCache;
use resolve_core::{ResolutionError, Token, TokenId};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Default estimate for a token served from cache, in milliseconds
pub const CACHED_ESTIMATE_MS: u64 = 5;

/// Default estimate for a token that needs its resolver, in milliseconds
pub const RESOLVER_ESTIMATE_MS: u64 = 100;

/// Ordered resolution groups
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionPlan {
    /// Groups in execution order; members are mutually independent
    pub groups: Vec<Vec<Token>>,
    /// Tokens on or behind a dependency cycle, in input order
    pub blocked: Vec<(Token, ResolutionError)>,
    /// Whether a fresh cache entry existed at planning time (estimation only)
    pub cached: IndexMap<TokenId, bool>,
    /// Estimated wall-clock time in milliseconds
    pub estimated_ms: u64,
}

impl ResolutionPlan {
    /// Scheduled tokens, flattened in execution order
    pub fn order(&self) -> impl Iterator<Item = &Token> {
        self.groups.iter().flatten()
    }

    /// Number of scheduled tokens
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}

/// Dependency planner
#[derive(Debug, Clone)]
pub struct ResolutionPlanner {
    cache: Arc<dyn ResolutionCache>,
    cached_estimate_ms: u64,
    resolver_estimate_ms: u64,
}

impl ResolutionPlanner {
    /// Create planner probing `cache` for estimates
    #[must_use]
    pub fn new(cache: Arc<dyn ResolutionCache>) -> Self {
        Self {
            cache,
            cached_estimate_ms: CACHED_ESTIMATE_MS,
            resolver_estimate_ms: RESOLVER_ESTIMATE_MS,
        }
    }

    /// With per-token estimates
    #[must_use]
    pub fn with_estimates(mut self, cached_ms: u64, resolver_ms: u64) -> Self {
        self.cached_estimate_ms = cached_ms;
        self.resolver_estimate_ms = resolver_ms;
        self
    }

    /// Plan resolution of valid tokens
    ///
    /// Dependencies naming tokens outside `tokens` are ignored. The cache is
    /// only peeked, so planning does not move hit statistics.
    pub async fn plan(&self, tokens: &[Token]) -> ResolutionPlan {
        let index: HashMap<&TokenId, usize> =
            tokens.iter().enumerate().map(|(i, t)| (&t.id, i)).collect();

        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::with_capacity(tokens.len(), 0);
        for i in 0..tokens.len() {
            graph.add_node(i);
        }
        for (i, token) in tokens.iter().enumerate() {
            for dep in &token.dependencies {
                match index.get(dep) {
                    // edge points from dependency to dependent
                    Some(&j) if j != i => {
                        graph.add_edge(j, i, ());
                    }
                    Some(_) => {}
                    None => trace!(token_id = %token.id, dependency = %dep, "dependency not in text, ignored"),
                }
            }
        }

        let (waves, scheduled) = kahn_waves(&graph, tokens.len());
        let blocked = blocked_tokens(&graph, tokens, &scheduled);

        let mut cached = IndexMap::with_capacity(tokens.len());
        let now = Utc::now();
        for token in tokens {
            let fresh = self
                .cache
                .peek(&token.id.cache_key())
                .await
                .is_some_and(|entry| entry.is_fresh(now));
            cached.insert(token.id.clone(), fresh);
        }

        let estimated_ms = waves
            .iter()
            .map(|wave| {
                wave.iter()
                    .map(|&i| {
                        if cached.get(&tokens[i].id).copied().unwrap_or(false) {
                            self.cached_estimate_ms
                        } else {
                            self.resolver_estimate_ms
                        }
                    })
                    .max()
                    .unwrap_or(0)
            })
            .sum();

        let groups: Vec<Vec<Token>> = waves
            .into_iter()
            .map(|wave| wave.into_iter().map(|i| tokens[i].clone()).collect())
            .collect();

        debug!(
            tokens = tokens.len(),
            groups = groups.len(),
            blocked = blocked.len(),
            estimated_ms,
            "resolution plan built"
        );

        ResolutionPlan {
            groups,
            blocked,
            cached,
            estimated_ms,
        }
    }
}

/// Zero-in-degree waves in index order, plus which nodes were scheduled
fn kahn_waves(graph: &DiGraphMap<usize, ()>, len: usize) -> (Vec<Vec<usize>>, Vec<bool>) {
    let mut in_degree: Vec<usize> = (0..len)
        .map(|i| graph.neighbors_directed(i, Direction::Incoming).count())
        .collect();
    let mut scheduled = vec![false; len];
    let mut waves = Vec::new();

    let mut wave: Vec<usize> = (0..len).filter(|&i| in_degree[i] == 0).collect();
    while !wave.is_empty() {
        let mut next = Vec::new();
        for &i in &wave {
            scheduled[i] = true;
            for dependent in graph.neighbors_directed(i, Direction::Outgoing) {
                in_degree[dependent] = in_degree[dependent].saturating_sub(1);
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_unstable();
        waves.push(std::mem::replace(&mut wave, next));
    }
    (waves, scheduled)
}

/// Errors for every unscheduled token: cycle path for members, blocker for the rest
fn blocked_tokens(
    graph: &DiGraphMap<usize, ()>,
    tokens: &[Token],
    scheduled: &[bool],
) -> Vec<(Token, ResolutionError)> {
    if scheduled.iter().all(|&s| s) {
        return Vec::new();
    }

    let mut component_of: HashMap<usize, usize> = HashMap::new();
    let components: Vec<HashSet<usize>> = tarjan_scc(graph)
        .into_iter()
        .filter(|c| c.len() > 1)
        .map(|c| c.into_iter().collect())
        .collect();
    for (ci, component) in components.iter().enumerate() {
        for &node in component {
            component_of.insert(node, ci);
        }
    }

    let mut blocked = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if scheduled[i] {
            continue;
        }
        let error = if let Some(&ci) = component_of.get(&i) {
            let path: Vec<TokenId> = cycle_path(graph, i, &components[ci])
                .into_iter()
                .map(|n| tokens[n].id.clone())
                .collect();
            ResolutionError::cyclic(&path)
        } else if let Some(blocker) = nearest_cycle_member(graph, i, &component_of) {
            ResolutionError::blocked_by_cycle(&tokens[blocker].id)
        } else {
            ResolutionError::cyclic(std::slice::from_ref(&token.id))
        };
        warn!(token_id = %token.id, %error, "token not scheduled");
        blocked.push((token.clone(), error.for_token(&token.id)));
    }
    blocked
}

/// Shortest dependency path from `start` back to itself inside its component
fn cycle_path(graph: &DiGraphMap<usize, ()>, start: usize, component: &HashSet<usize>) -> Vec<usize> {
    let mut parent: HashMap<usize, usize> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for dep in graph.neighbors_directed(node, Direction::Incoming) {
            if !component.contains(&dep) {
                continue;
            }
            if dep == start {
                let mut chain = vec![node];
                let mut current = node;
                while let Some(&p) = parent.get(&current) {
                    chain.push(p);
                    current = p;
                }
                chain.reverse();
                chain.push(start);
                return chain;
            }
            if !parent.contains_key(&dep) {
                parent.insert(dep, node);
                queue.push_back(dep);
            }
        }
    }
    vec![start]
}

/// Closest cycle member among the transitive dependencies of `node`
fn nearest_cycle_member(
    graph: &DiGraphMap<usize, ()>,
    node: usize,
    component_of: &HashMap<usize, usize>,
) -> Option<usize> {
    let mut seen = HashSet::from([node]);
    let mut queue = VecDeque::from([node]);
    while let Some(current) = queue.pop_front() {
        let mut deps: Vec<usize> = graph.neighbors_directed(current, Direction::Incoming).collect();
        deps.sort_unstable();
        for dep in deps {
            if component_of.contains_key(&dep) {
                return Some(dep);
            }
            if seen.insert(dep) {
                queue.push_back(dep);
            }
        }
    }
    None
}
