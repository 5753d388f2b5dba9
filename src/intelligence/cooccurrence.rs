//! Problem/solution co-occurrence detection.
//!
//! A problem and a solution co-occur when they share a project or technology
//! and were last updated within the window of each other. Support blends how
//! much context they share with how similar their text is. Pairs above the
//! support threshold become `SOLVES` (same project) or `ADDRESSES` (shared
//! technology only) observations, written through `create_relationship`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

use crate::config::IntelligenceConfig;
use crate::engine::GraphState;
use crate::error::Result;
use crate::graph::{NewRelationship, RelationshipType};
use crate::intelligence::{skip_item, Intelligence};
use crate::memory::{Memory, MemoryId, MemoryKind};

/// A problem/solution pair that looks related.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoOccurrenceCandidate {
    pub problem_id: MemoryId,
    pub solution_id: MemoryId,
    pub rel_type: RelationshipType,
    pub support: f64,
    pub context_overlap: f64,
    pub text_similarity: f64,
    /// The later of the two `updated_at` values; used as the observation time.
    pub observed_at: DateTime<Utc>,
}

/// Outcome of a co-occurrence pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoOccurrenceReport {
    pub candidates: usize,
    pub created: usize,
    pub corroborated: usize,
    /// Pairs whose current observation is already recorded.
    pub unchanged: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

fn context_features(memory: &Memory) -> BTreeSet<String> {
    let mut features: BTreeSet<String> = memory
        .context
        .technology_tags()
        .into_iter()
        .map(|t| format!("tech:{}", t))
        .collect();
    if let Some(project) = memory.context.project_key() {
        features.insert(format!("project:{}", project));
    }
    features
}

/// Co-occurring pairs above the support threshold, strongest first.
pub(crate) fn candidates(
    state: &GraphState,
    window: Duration,
    config: &IntelligenceConfig,
) -> Vec<CoOccurrenceCandidate> {
    let problems: Vec<(&Memory, BTreeSet<String>)> = state
        .entities()
        .iter()
        .filter(|m| m.kind == MemoryKind::Problem)
        .map(|m| (m, context_features(m)))
        .collect();
    let solutions: Vec<(&Memory, BTreeSet<String>)> = state
        .entities()
        .iter()
        .filter(|m| m.kind == MemoryKind::Solution)
        .map(|m| (m, context_features(m)))
        .collect();

    let mut found = Vec::new();
    for (problem, problem_features) in &problems {
        for (solution, solution_features) in &solutions {
            let shared = problem_features.intersection(solution_features).count();
            if shared == 0 {
                continue;
            }
            let gap = (problem.updated_at - solution.updated_at).abs();
            if gap > window {
                continue;
            }
            let union = problem_features.union(solution_features).count();
            let context_overlap = shared as f64 / union as f64;
            let text_similarity = state.index().similarity(&problem.id, &solution.id);
            let support = 0.5 * context_overlap + 0.5 * text_similarity;
            if support < config.co_occurrence_support {
                continue;
            }
            let same_project = matches!(
                (problem.context.project_key(), solution.context.project_key()),
                (Some(a), Some(b)) if a == b
            );
            found.push(CoOccurrenceCandidate {
                problem_id: problem.id,
                solution_id: solution.id,
                rel_type: if same_project {
                    RelationshipType::Solves
                } else {
                    RelationshipType::Addresses
                },
                support,
                context_overlap,
                text_similarity,
                observed_at: problem.updated_at.max(solution.updated_at),
            });
        }
    }
    found.sort_by(|a, b| {
        b.support
            .total_cmp(&a.support)
            .then(a.problem_id.cmp(&b.problem_id))
            .then(a.solution_id.cmp(&b.solution_id))
    });
    found
}

impl Intelligence<'_> {
    /// Read-only half of [`detect_co_occurrence`](Self::detect_co_occurrence).
    pub fn co_occurrence_candidates(&self, window: Duration) -> Result<Vec<CoOccurrenceCandidate>> {
        let state = self.kg.snapshot()?;
        Ok(candidates(&state, window, self.config()))
    }

    /// Synthesize or corroborate `SOLVES`/`ADDRESSES` edges for co-occurring
    /// pairs.
    ///
    /// A pair contributes at most one observation per state of its two
    /// memories: rerunning without intervening updates changes nothing.
    #[instrument(skip(self), fields(window_days = window.num_days()))]
    pub fn detect_co_occurrence(&self, window: Duration) -> Result<CoOccurrenceReport> {
        let state = self.kg.snapshot()?;
        let found = candidates(&state, window, self.config());
        let mut report = CoOccurrenceReport {
            candidates: found.len(),
            ..CoOccurrenceReport::default()
        };

        for candidate in found {
            if self.cancelled() {
                report.cancelled = true;
                break;
            }
            let existing = state.relationships().find(
                candidate.solution_id,
                candidate.problem_id,
                candidate.rel_type,
            );
            if existing.is_some_and(|r| {
                r.evidence
                    .iter()
                    .any(|e| e.observed_at == candidate.observed_at)
            }) {
                report.unchanged += 1;
                continue;
            }

            let new = NewRelationship::new(
                candidate.solution_id,
                candidate.problem_id,
                candidate.rel_type,
            )
            .with_strength(candidate.support.max(self.config().inferred_strength_floor).min(1.0))
            .with_confidence(self.config().inferred_confidence)
            .with_note(format!("co-occurrence support {:.2}", candidate.support))
            .observed_at(candidate.observed_at);

            let label = format!("{} -> {}", candidate.solution_id, candidate.problem_id);
            match skip_item(self.kg.create_relationship(new), "co_occurrence", &label)? {
                Some(rel) if rel.evidence_count == 1 => report.created += 1,
                Some(_) => report.corroborated += 1,
                None => report.skipped += 1,
            }
        }

        debug!(?report, "Co-occurrence detail");
        info!(
            created = report.created,
            corroborated = report.corroborated,
            "Co-occurrence pass complete"
        );
        Ok(report)
    }
}
