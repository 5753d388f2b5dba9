//! Breadth-first traversal and weighted shortest paths.
//!
//! Both walk edges from either endpoint. The graph may contain cycles (for
//! example `A LEADS_TO B` and `B LEADS_TO A`), so every walk keeps a visited
//! set and is bounded by depth or hop count.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::store::{EdgeFilter, RelationshipGraph};
use crate::graph::types::{Relationship, RelationshipId};
use crate::memory::{EntityStore, Memory, MemoryId};

/// A memory reached by a traversal, with the edges leading to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalStep {
    pub memory: Memory,
    pub depth: usize,
    /// Edges from the start node to `memory`, in walk order.
    pub path: Vec<Relationship>,
}

/// A bounded breadth-first walk over borrowed graph state.
///
/// Iterating yields nodes by non-decreasing depth; within a depth, by the
/// strength of the edge that reached them (descending), then by memory id.
/// The start node is not yielded. Each call to [`Traversal::iter`] restarts
/// the walk from scratch.
#[derive(Debug, Clone)]
pub struct Traversal<'g> {
    graph: &'g RelationshipGraph,
    entities: &'g EntityStore,
    start: MemoryId,
    max_depth: usize,
    filter: EdgeFilter,
}

impl<'g> Traversal<'g> {
    pub fn new(
        graph: &'g RelationshipGraph,
        entities: &'g EntityStore,
        start: MemoryId,
        max_depth: usize,
        filter: EdgeFilter,
    ) -> Result<Self> {
        entities.get(&start)?;
        Ok(Self {
            graph,
            entities,
            start,
            max_depth,
            filter,
        })
    }

    pub fn iter(&self) -> TraversalIter<'g> {
        TraversalIter::new(
            self.graph,
            self.entities,
            self.start,
            self.max_depth,
            self.filter.clone(),
        )
    }
}

impl<'g> IntoIterator for &Traversal<'g> {
    type Item = TraversalStep;
    type IntoIter = TraversalIter<'g>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
struct Frontier {
    node: MemoryId,
    path: Vec<RelationshipId>,
    strength: f64,
}

/// Lazy iterator over a [`Traversal`]. Layers are expanded on demand.
pub struct TraversalIter<'g> {
    graph: &'g RelationshipGraph,
    entities: &'g EntityStore,
    max_depth: usize,
    filter: EdgeFilter,
    layer: Vec<Frontier>,
    cursor: usize,
    depth: usize,
    visited: HashSet<MemoryId>,
}

impl<'g> TraversalIter<'g> {
    /// Start a walk without re-checking that `start` exists.
    pub(crate) fn new(
        graph: &'g RelationshipGraph,
        entities: &'g EntityStore,
        start: MemoryId,
        max_depth: usize,
        filter: EdgeFilter,
    ) -> Self {
        let mut visited = HashSet::new();
        visited.insert(start);
        Self {
            graph,
            entities,
            max_depth,
            filter,
            layer: vec![Frontier {
                node: start,
                path: Vec::new(),
                strength: 1.0,
            }],
            cursor: 1,
            depth: 0,
            visited,
        }
    }

    fn expand(&mut self) -> bool {
        if self.depth >= self.max_depth || self.layer.is_empty() {
            return false;
        }

        let mut next: HashMap<MemoryId, Frontier> = HashMap::new();
        for entry in &self.layer {
            for rel in self.graph.neighbors(&entry.node, &self.filter) {
                let Some(other) = rel.other_end(&entry.node) else {
                    continue;
                };
                if self.visited.contains(&other) {
                    continue;
                }
                let better = match next.get(&other) {
                    None => true,
                    Some(current) => {
                        rel.strength > current.strength
                            || (rel.strength == current.strength
                                && current.path.last().is_some_and(|last| rel.id < *last))
                    }
                };
                if better {
                    let mut path = entry.path.clone();
                    path.push(rel.id);
                    next.insert(
                        other,
                        Frontier {
                            node: other,
                            path,
                            strength: rel.strength,
                        },
                    );
                }
            }
        }

        let mut layer: Vec<Frontier> = next.into_values().collect();
        layer.sort_by(|a, b| {
            b.strength
                .total_cmp(&a.strength)
                .then(a.node.cmp(&b.node))
        });
        self.visited.extend(layer.iter().map(|f| f.node));
        self.layer = layer;
        self.cursor = 0;
        self.depth += 1;
        !self.layer.is_empty()
    }
}

impl Iterator for TraversalIter<'_> {
    type Item = TraversalStep;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cursor < self.layer.len() {
                let entry = &self.layer[self.cursor];
                self.cursor += 1;

                // Entries come from a consistent snapshot, so lookups succeed;
                // anything missing is skipped rather than yielded half-formed.
                let Ok(memory) = self.entities.get(&entry.node) else {
                    continue;
                };
                let path: Option<Vec<Relationship>> = entry
                    .path
                    .iter()
                    .map(|id| self.graph.get(id).ok().cloned())
                    .collect();
                let Some(path) = path else {
                    continue;
                };
                return Some(TraversalStep {
                    memory: memory.clone(),
                    depth: self.depth,
                    path,
                });
            }
            if !self.expand() {
                return None;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PathEntry {
    cost: f64,
    hops: usize,
    node: MemoryId,
}

impl PartialEq for PathEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PathEntry {}

impl PartialOrd for PathEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathEntry {
    // Reversed so BinaryHeap pops the cheapest, then fewest hops, then lowest id.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then(other.hops.cmp(&self.hops))
            .then(other.node.cmp(&self.node))
    }
}

/// Search state: a node together with the number of edges used to reach it.
type HopState = (MemoryId, usize);

/// Cheapest path from `source` to `target` where an edge costs `1 - strength`.
///
/// Searches at most `max_hops` edges deep. Costs are tracked per
/// `(node, hops)` so a cheap but long route to an intermediate node never
/// hides a dearer route that still fits the horizon. Equal-cost alternatives
/// resolve toward fewer hops, then the stronger edge, then the lower
/// relationship id.
pub fn shortest_weighted_path(
    graph: &RelationshipGraph,
    source: MemoryId,
    target: MemoryId,
    max_hops: usize,
) -> Result<Vec<Relationship>> {
    if source == target {
        return Ok(Vec::new());
    }

    let mut best: HashMap<HopState, (f64, Option<(RelationshipId, HopState)>)> = HashMap::new();
    let mut settled: HashSet<HopState> = HashSet::new();
    let mut heap = BinaryHeap::new();
    best.insert((source, 0), (0.0, None));
    heap.push(PathEntry {
        cost: 0.0,
        hops: 0,
        node: source,
    });

    while let Some(PathEntry { cost, hops, node }) = heap.pop() {
        if !settled.insert((node, hops)) {
            continue;
        }
        if node == target {
            return reconstruct(graph, &best, (source, 0), (target, hops));
        }
        if hops >= max_hops {
            continue;
        }
        for rel in graph.neighbors(&node, &EdgeFilter::default()) {
            let Some(next) = rel.other_end(&node) else {
                continue;
            };
            let state = (next, hops + 1);
            if next == source || settled.contains(&state) {
                continue;
            }
            let next_cost = cost + (1.0 - rel.strength);
            let improves = match best.get(&state) {
                None => true,
                Some((known, _)) => next_cost < *known,
            };
            if improves {
                best.insert(state, (next_cost, Some((rel.id, (node, hops)))));
                heap.push(PathEntry {
                    cost: next_cost,
                    hops: hops + 1,
                    node: next,
                });
            }
        }
    }

    Err(Error::path_not_found(source, target))
}

fn reconstruct(
    graph: &RelationshipGraph,
    best: &HashMap<HopState, (f64, Option<(RelationshipId, HopState)>)>,
    source: HopState,
    target: HopState,
) -> Result<Vec<Relationship>> {
    let mut path = Vec::new();
    let mut cursor = target;
    while cursor != source {
        let Some((_, Some((rel_id, prev)))) = best.get(&cursor) else {
            return Err(Error::consistency(format!(
                "broken predecessor chain at {} after {} hops",
                cursor.0, cursor.1
            )));
        };
        path.push(graph.get(rel_id)?.clone());
        cursor = *prev;
    }
    path.reverse();
    Ok(path)
}
