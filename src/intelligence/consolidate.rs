//! Near-duplicate consolidation.
//!
//! Two memories of the same kind are merged when
//! `(1 - w) * text + w * structural` exceeds the threshold, where `text` is
//! cosine similarity and `structural` is the Jaccard overlap of their
//! neighbor sets (two memories with no neighbors count as structurally
//! identical). The memory with the newer `updated_at` wins, the higher id on a
//! tie. The loser's relationships are re-pointed to the winner, its
//! observations are appended to the winner's, and it is then deleted through
//! the ordinary delete path.
//!
//! Candidates come from the search index (pairs sharing a term) and, when
//! the threshold is below `w`, from the graph as well: a pair with no shared
//! term scores at most `w`, so it can only qualify through its structure.
//!
//! Merging changes neighborhoods, which can create new qualifying pairs, so a
//! call repeats until no pair qualifies. A second call is then a no-op.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, instrument, warn};

use crate::engine::GraphState;
use crate::error::{Error, Result};
use crate::graph::{EdgeFilter, RepointOutcome};
use crate::intelligence::{skip_item, Intelligence};
use crate::memory::{Memory, MemoryId};

/// One completed merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedPair {
    pub winner: MemoryId,
    pub loser: MemoryId,
    pub similarity: f64,
    pub moved: usize,
    pub folded: usize,
    pub dropped: usize,
}

/// Outcome of a consolidation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub rounds: usize,
    pub merged: Vec<MergedPair>,
    pub skipped: usize,
    pub cancelled: bool,
    /// False if the round limit stopped the call before a fixpoint.
    pub converged: bool,
}

#[derive(Debug, Clone)]
struct Candidate {
    a: MemoryId,
    b: MemoryId,
    similarity: f64,
}

fn neighbor_set(state: &GraphState, id: &MemoryId) -> BTreeSet<MemoryId> {
    state
        .relationships()
        .touching(id)
        .filter_map(|r| r.other_end(id))
        .collect()
}

fn structural_similarity(state: &GraphState, a: &MemoryId, b: &MemoryId) -> f64 {
    let mut na = neighbor_set(state, a);
    let mut nb = neighbor_set(state, b);
    na.remove(b);
    nb.remove(a);
    if na.is_empty() && nb.is_empty() {
        return 1.0;
    }
    let shared = na.intersection(&nb).count();
    let union = na.union(&nb).count();
    shared as f64 / union as f64
}

/// Same-kind pairs whose neighborhoods can overlap: those sharing a neighbor,
/// and those with at most one neighbor each (Jaccard of empty sets).
fn structural_pairs(state: &GraphState) -> BTreeSet<(MemoryId, MemoryId)> {
    let mut pairs = BTreeSet::new();
    let mut sparse = Vec::new();
    for memory in state.entities().iter() {
        let near = neighbor_set(state, &memory.id);
        for n in &near {
            for other in neighbor_set(state, n) {
                if other > memory.id {
                    pairs.insert((memory.id, other));
                }
            }
        }
        if near.len() <= 1 {
            sparse.push(memory.id);
        }
    }
    for (i, a) in sparse.iter().enumerate() {
        for b in &sparse[i + 1..] {
            pairs.insert((*a.min(b), *a.max(b)));
        }
    }
    pairs
}

/// Qualifying pairs, most similar first, each memory in at most one pair.
fn select_pairs(state: &GraphState, threshold: f64, structural_weight: f64) -> Vec<Candidate> {
    // (lower id, higher id) -> text similarity
    let mut texts: BTreeMap<(MemoryId, MemoryId), f64> = BTreeMap::new();
    for memory in state.entities().iter() {
        for (other, text) in state.index().similar_to(&memory.id) {
            if other > memory.id {
                texts.insert((memory.id, other), text);
            }
        }
    }
    if structural_weight > threshold {
        for pair in structural_pairs(state) {
            texts.entry(pair).or_insert(0.0);
        }
    }

    let mut all = Vec::new();
    for ((a, b), text) in texts {
        let (Ok(first), Ok(second)) = (state.memory(&a), state.memory(&b)) else {
            continue;
        };
        if first.kind != second.kind {
            continue;
        }
        let structural = structural_similarity(state, &a, &b);
        let similarity = (1.0 - structural_weight) * text + structural_weight * structural;
        if similarity > threshold {
            all.push(Candidate { a, b, similarity });
        }
    }
    all.sort_by(|x, y| {
        y.similarity
            .total_cmp(&x.similarity)
            .then(x.a.cmp(&y.a))
            .then(x.b.cmp(&y.b))
    });

    let mut used = HashSet::new();
    all.into_iter()
        .filter(|c| {
            if used.contains(&c.a) || used.contains(&c.b) {
                return false;
            }
            used.insert(c.a);
            used.insert(c.b);
            true
        })
        .collect()
}

/// `(winner, loser)`: newer `updated_at` wins, higher id on a tie.
fn order_pair<'m>(a: &'m Memory, b: &'m Memory) -> (&'m Memory, &'m Memory) {
    if (a.updated_at, a.id) >= (b.updated_at, b.id) {
        (a, b)
    } else {
        (b, a)
    }
}

impl Intelligence<'_> {
    /// Merge near-duplicate memories until none remain above `threshold`.
    #[instrument(skip(self))]
    pub fn consolidate(&self, threshold: f64) -> Result<ConsolidationReport> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::validation(format!(
                "consolidation threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        let weight = self.config().structural_weight;
        let mut report = ConsolidationReport::default();

        'rounds: while report.rounds < self.config().max_consolidation_rounds {
            let state = self.kg.snapshot()?;
            let pairs = select_pairs(&state, threshold, weight);
            if pairs.is_empty() {
                report.converged = true;
                break;
            }
            report.rounds += 1;
            debug!(round = report.rounds, pairs = pairs.len(), "Consolidation round");

            let mut progressed = false;
            for pair in pairs {
                if self.cancelled() {
                    report.cancelled = true;
                    break 'rounds;
                }
                let label = format!("{} + {}", pair.a, pair.b);
                match skip_item(self.merge_pair(&pair), "consolidate", &label)? {
                    Some(merged) => {
                        progressed = true;
                        report.merged.push(merged);
                    }
                    None => report.skipped += 1,
                }
            }
            if !progressed {
                // Every pair failed; retrying would select the same pairs.
                report.converged = true;
                break;
            }
        }

        if !report.converged && !report.cancelled {
            warn!(
                rounds = report.rounds,
                "Consolidation stopped at the round limit before converging"
            );
        }
        info!(
            merged = report.merged.len(),
            rounds = report.rounds,
            "Consolidation complete"
        );
        Ok(report)
    }

    fn merge_pair(&self, pair: &Candidate) -> Result<MergedPair> {
        let state = self.kg.snapshot()?;
        let (winner, loser) = order_pair(state.memory(&pair.a)?, state.memory(&pair.b)?);
        let (winner, loser) = (winner.id, loser.clone());

        let mut merged = MergedPair {
            winner,
            loser: loser.id,
            similarity: pair.similarity,
            moved: 0,
            folded: 0,
            dropped: 0,
        };
        for rel in state
            .relationships()
            .neighbors(&loser.id, &EdgeFilter::default())
        {
            match self.kg.repoint_relationship(&rel.id, loser.id, winner)? {
                RepointOutcome::Moved(_) => merged.moved += 1,
                RepointOutcome::Merged(_) => merged.folded += 1,
                RepointOutcome::Dropped => merged.dropped += 1,
            }
        }
        self.kg.absorb_observations(&winner, &loser.observations)?;
        let cascaded = self.kg.delete_memory(&loser.id)?;
        if cascaded != 0 {
            // Edges added by another writer after the re-point
            warn!(loser = %loser.id, cascaded, "Late relationships removed with consolidated memory");
        }
        debug!(winner = %winner, loser = %loser.id, "Merged memories");
        Ok(merged)
    }
}
