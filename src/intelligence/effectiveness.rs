//! Solution effectiveness from decayed evidence.
//!
//! Effectiveness is the weighted share of supporting evidence events on a
//! solution's outgoing Solution and Quality relationships. Each event is
//! weighted by `0.5^(age / half_life)`, so a run of old successes cannot mask
//! recent failures. On negative types (`INEFFECTIVE_FOR`, `BREAKS`,
//! `DEPRECATED_BY`) supporting evidence counts against the solution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::IntelligenceConfig;
use crate::engine::GraphState;
use crate::error::Result;
use crate::graph::{NewRelationship, Relationship, RelationshipCategory, RelationshipType};
use crate::intelligence::{require_kind, Intelligence};
use crate::memory::{MemoryId, MemoryKind};

/// Effectiveness of one solution with the evidence it rests on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessEstimate {
    /// Decayed share of favorable evidence, in `[0, 1]`.
    pub value: f64,
    /// Undecayed number of evidence events considered.
    pub events: u64,
}

/// One row of the effectiveness table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionEffectiveness {
    pub memory_id: MemoryId,
    pub label: String,
    pub effectiveness: f64,
    pub evidence_events: u64,
}

fn counts_toward(rel: &Relationship, solution: &MemoryId) -> bool {
    rel.source_id == *solution
        && matches!(
            rel.category(),
            RelationshipCategory::Solution | RelationshipCategory::Quality
        )
}

/// Estimate a solution's effectiveness as of `now`.
pub(crate) fn estimate(
    state: &GraphState,
    solution: &MemoryId,
    now: DateTime<Utc>,
    config: &IntelligenceConfig,
) -> Result<EffectivenessEstimate> {
    require_kind(state.memory(solution)?, MemoryKind::Solution)?;

    let mut favorable = 0.0;
    let mut total = 0.0;
    let mut events = 0u64;
    for rel in state
        .relationships()
        .touching(solution)
        .filter(|r| counts_toward(r, solution))
    {
        for evidence in &rel.evidence {
            let age_days = (now - evidence.observed_at).num_seconds().max(0) as f64 / 86_400.0;
            let weight = 0.5f64.powf(age_days / config.effectiveness_half_life_days);
            total += weight;
            events += 1;
            if evidence.is_supporting() != rel.rel_type.is_negative() {
                favorable += weight;
            }
        }
    }

    let value = if events == 0 || total <= f64::MIN_POSITIVE {
        config.neutral_effectiveness
    } else {
        (favorable / total).clamp(0.0, 1.0)
    };
    Ok(EffectivenessEstimate { value, events })
}

/// Effectiveness of every solution, best first, then by id.
pub(crate) fn table(
    state: &GraphState,
    now: DateTime<Utc>,
    config: &IntelligenceConfig,
) -> Result<Vec<SolutionEffectiveness>> {
    let mut rows = Vec::new();
    for memory in state
        .entities()
        .iter()
        .filter(|m| m.kind == MemoryKind::Solution)
    {
        let estimate = estimate(state, &memory.id, now, config)?;
        rows.push(SolutionEffectiveness {
            memory_id: memory.id,
            label: memory.label(),
            effectiveness: estimate.value,
            evidence_events: estimate.events,
        });
    }
    rows.sort_by(|a, b| {
        b.effectiveness
            .total_cmp(&a.effectiveness)
            .then(a.memory_id.cmp(&b.memory_id))
    });
    Ok(rows)
}

impl Intelligence<'_> {
    /// Effectiveness of a solution right now.
    pub fn compute_effectiveness(&self, solution: &MemoryId) -> Result<f64> {
        self.compute_effectiveness_at(solution, Utc::now())
    }

    /// Effectiveness of a solution as of a given instant.
    pub fn compute_effectiveness_at(&self, solution: &MemoryId, now: DateTime<Utc>) -> Result<f64> {
        let state = self.kg.snapshot()?;
        Ok(estimate(&state, solution, now, self.config())?.value)
    }

    /// Effectiveness and evidence volume for a solution.
    pub fn effectiveness_estimate(&self, solution: &MemoryId) -> Result<EffectivenessEstimate> {
        let state = self.kg.snapshot()?;
        estimate(&state, solution, Utc::now(), self.config())
    }

    /// Effectiveness of every solution in the graph.
    pub fn effectiveness_table(&self) -> Result<Vec<SolutionEffectiveness>> {
        let state = self.kg.snapshot()?;
        table(&state, Utc::now(), self.config())
    }

    /// Record that applying `solution` to `problem` worked or failed.
    ///
    /// Folds one observation into the `SOLVES` edge: strength 1.0 and
    /// supporting on success, strength 0.0 and contradicting on failure.
    #[instrument(skip(self), fields(solution = %solution, problem = %problem))]
    pub fn record_solution_outcome(
        &self,
        solution: &MemoryId,
        problem: &MemoryId,
        success: bool,
    ) -> Result<Relationship> {
        let state = self.kg.snapshot()?;
        require_kind(state.memory(solution)?, MemoryKind::Solution)?;
        state.memory(problem)?;

        let mut new = NewRelationship::new(*solution, *problem, RelationshipType::Solves)
            .with_strength(if success { 1.0 } else { 0.0 });
        if !success {
            new = new.contradicting();
        }
        let rel = self.kg.create_relationship(new)?;
        debug!(success, evidence = rel.evidence_count, "Recorded solution outcome");
        Ok(rel)
    }
}
