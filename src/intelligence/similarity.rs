//! Similar memories and solution suggestions.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::IntelligenceConfig;
use crate::engine::GraphState;
use crate::error::Result;
use crate::graph::{EdgeFilter, RelationshipCategory, RelationshipType, TraversalIter};
use crate::intelligence::{effectiveness, Intelligence};
use crate::memory::{Memory, MemoryId, MemoryKind};

/// A memory ranked by similarity to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarMemory {
    pub memory: Memory,
    /// `text_similarity + graph_bonus`.
    pub score: f64,
    pub text_similarity: f64,
    pub graph_bonus: f64,
}

/// A solution suggested for a problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionSuggestion {
    pub memory: Memory,
    pub score: f64,
    pub text_similarity: f64,
    /// Strongest SOLVES/ADDRESSES evidence linking the solution to the problem
    /// or to a similar problem, scaled by that problem's similarity.
    pub link_strength: f64,
    pub effectiveness: f64,
}

/// Rank memories by text similarity plus a bonus for Similarity-category
/// neighbors within two hops. Ties resolve by id ascending.
pub(crate) fn similar(
    state: &GraphState,
    id: &MemoryId,
    top_k: usize,
    config: &IntelligenceConfig,
) -> Result<Vec<SimilarMemory>> {
    state.memory(id)?;

    let mut scores: BTreeMap<MemoryId, (f64, f64)> = state
        .index()
        .similar_to(id)
        .into_iter()
        .map(|(other, sim)| (other, (sim, 0.0)))
        .collect();

    let walk = TraversalIter::new(
        state.relationships(),
        state.entities(),
        *id,
        2,
        EdgeFilter::new().category(RelationshipCategory::Similarity),
    );
    for step in walk {
        let bonus = if step.depth == 1 {
            config.similarity_bonus_direct
        } else {
            config.similarity_bonus_indirect
        };
        scores.entry(step.memory.id).or_insert((0.0, 0.0)).1 = bonus;
    }

    let mut ranked: Vec<SimilarMemory> = scores
        .into_iter()
        .filter(|(other, (text, bonus))| other != id && text + bonus > 0.0)
        .map(|(other, (text, bonus))| {
            Ok(SimilarMemory {
                memory: state.memory(&other)?.clone(),
                score: text + bonus,
                text_similarity: text,
                graph_bonus: bonus,
            })
        })
        .collect::<Result<_>>()?;
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.memory.id.cmp(&b.memory.id))
    });
    ranked.truncate(top_k);
    Ok(ranked)
}

/// Score every solution against a problem.
///
/// `score = (0.5 * text + 0.5 * link) * (0.5 + 0.5 * effectiveness)`, where
/// `link` credits SOLVES/ADDRESSES edges into the problem itself at full
/// weight and into similar problems at their (capped) similarity.
pub(crate) fn suggest(
    state: &GraphState,
    problem: &MemoryId,
    top_k: usize,
    config: &IntelligenceConfig,
) -> Result<Vec<SolutionSuggestion>> {
    state.memory(problem)?;

    let mut related: BTreeMap<MemoryId, f64> = BTreeMap::new();
    related.insert(*problem, 1.0);
    for similar_problem in similar(state, problem, config.alternative_pool, config)?
        .into_iter()
        .filter(|s| s.memory.kind == MemoryKind::Problem)
    {
        related.insert(similar_problem.memory.id, similar_problem.score.min(1.0));
    }

    let linking = EdgeFilter::new().types(vec![RelationshipType::Solves, RelationshipType::Addresses]);
    let now = Utc::now();
    let mut suggestions = Vec::new();
    for solution in state
        .entities()
        .iter()
        .filter(|m| m.kind == MemoryKind::Solution)
    {
        let text = state.index().similarity(problem, &solution.id);
        let link = state
            .relationships()
            .neighbors(&solution.id, &linking)
            .into_iter()
            .filter(|r| r.source_id == solution.id)
            .filter_map(|r| related.get(&r.target_id).map(|weight| r.strength * weight))
            .fold(0.0, f64::max);
        if text <= 0.0 && link <= 0.0 {
            continue;
        }
        let effectiveness = effectiveness::estimate(state, &solution.id, now, config)?.value;
        suggestions.push(SolutionSuggestion {
            memory: solution.clone(),
            score: (0.5 * text + 0.5 * link) * (0.5 + 0.5 * effectiveness),
            text_similarity: text,
            link_strength: link,
            effectiveness,
        });
    }
    suggestions.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.memory.id.cmp(&b.memory.id))
    });
    suggestions.truncate(top_k);
    Ok(suggestions)
}

impl Intelligence<'_> {
    /// Up to `top_k` memories most similar to `id`.
    pub fn find_similar(&self, id: &MemoryId, top_k: usize) -> Result<Vec<SimilarMemory>> {
        let state = self.kg.snapshot()?;
        similar(&state, id, top_k, self.config())
    }

    /// Up to `top_k` solutions for a problem, best first.
    pub fn suggest_similar_solutions(
        &self,
        problem: &MemoryId,
        top_k: usize,
    ) -> Result<Vec<SolutionSuggestion>> {
        let state = self.kg.snapshot()?;
        suggest(&state, problem, top_k, self.config())
    }
}
