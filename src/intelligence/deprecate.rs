//! Deprecation of ineffective solutions.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::graph::{NewRelationship, RelationshipType};
use crate::intelligence::{effectiveness, similarity, skip_item, Intelligence};
use crate::memory::{MemoryId, MemoryKind};

/// A solution marked as deprecated in favor of an alternative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deprecation {
    pub solution_id: MemoryId,
    pub replacement_id: MemoryId,
    pub effectiveness: f64,
    pub similarity: f64,
}

/// A low-effectiveness solution left unmarked, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSolution {
    pub solution_id: MemoryId,
    pub effectiveness: f64,
    pub reason: String,
}

/// Outcome of a deprecation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeprecationReport {
    pub evaluated: usize,
    pub deprecated: Vec<Deprecation>,
    pub skipped: Vec<SkippedSolution>,
    pub cancelled: bool,
}

impl Intelligence<'_> {
    /// Mark solutions with at least `usage_floor` evidence events and
    /// effectiveness below `effectiveness_floor` as `DEPRECATED_BY` their best
    /// similar alternative.
    ///
    /// Nothing is deleted. A solution with no alternative above the minimum
    /// similarity, or already deprecated, is left as is and reported.
    #[instrument(skip(self))]
    pub fn deprecate(&self, usage_floor: u64, effectiveness_floor: f64) -> Result<DeprecationReport> {
        if !(0.0..=1.0).contains(&effectiveness_floor) {
            return Err(Error::validation(format!(
                "effectiveness floor must be in [0, 1], got {}",
                effectiveness_floor
            )));
        }
        let config = self.config();
        let state = self.kg.snapshot()?;
        let now = Utc::now();
        let mut report = DeprecationReport::default();

        for solution in state
            .entities()
            .iter()
            .filter(|m| m.kind == MemoryKind::Solution)
        {
            report.evaluated += 1;
            let estimate = effectiveness::estimate(&state, &solution.id, now, config)?;
            if estimate.events < usage_floor || estimate.value >= effectiveness_floor {
                continue;
            }

            let skip = |reason: &str| SkippedSolution {
                solution_id: solution.id,
                effectiveness: estimate.value,
                reason: reason.to_string(),
            };
            let already = state
                .relationships()
                .touching(&solution.id)
                .any(|r| r.source_id == solution.id && r.rel_type == RelationshipType::DeprecatedBy);
            if already {
                report.skipped.push(skip("already deprecated"));
                continue;
            }

            let mut alternative = None;
            for candidate in similarity::similar(&state, &solution.id, config.alternative_pool, config)? {
                if candidate.memory.kind != MemoryKind::Solution
                    || candidate.score < config.min_alternative_similarity
                {
                    continue;
                }
                let candidate_estimate =
                    effectiveness::estimate(&state, &candidate.memory.id, now, config)?;
                if candidate_estimate.value < effectiveness_floor {
                    continue;
                }
                alternative = Some(candidate);
                break;
            }
            let Some(alternative) = alternative else {
                report.skipped.push(skip("no alternative above minimum similarity"));
                continue;
            };

            if self.cancelled() {
                report.cancelled = true;
                break;
            }
            let new = NewRelationship::new(
                solution.id,
                alternative.memory.id,
                RelationshipType::DeprecatedBy,
            )
            .with_strength(alternative.score.min(1.0))
            .with_confidence(1.0 - estimate.value)
            .with_note(format!("effectiveness {:.2}", estimate.value));

            match skip_item(self.kg.create_relationship(new), "deprecate", &solution.id)? {
                Some(_) => {
                    debug!(solution = %solution.id, replacement = %alternative.memory.id, "Deprecated solution");
                    report.deprecated.push(Deprecation {
                        solution_id: solution.id,
                        replacement_id: alternative.memory.id,
                        effectiveness: estimate.value,
                        similarity: alternative.score,
                    });
                }
                None => report.skipped.push(skip("write rejected")),
            }
        }

        info!(
            deprecated = report.deprecated.len(),
            skipped = report.skipped.len(),
            "Deprecation pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::KnowledgeGraph;
    use crate::graph::EdgeFilter;
    use crate::memory::NewMemory;

    fn create(kg: &KnowledgeGraph, kind: MemoryKind, content: &str) -> MemoryId {
        kg.create_memory(NewMemory::new(kind, content)).unwrap().id
    }

    #[test]
    fn test_deprecates_toward_effective_alternative() {
        let kg = KnowledgeGraph::new();
        let problem = create(&kg, MemoryKind::Problem, "slow docker builds");
        let weak = create(&kg, MemoryKind::Solution, "cache docker layers locally");
        let strong = create(&kg, MemoryKind::Solution, "cache docker layers in registry");
        let intel = Intelligence::new(&kg);
        for _ in 0..3 {
            intel.record_solution_outcome(&weak, &problem, false).unwrap();
        }
        intel.record_solution_outcome(&strong, &problem, true).unwrap();

        let report = intel.deprecate(3, 0.3).unwrap();
        assert_eq!(report.deprecated.len(), 1);
        assert_eq!(report.deprecated[0].solution_id, weak);
        assert_eq!(report.deprecated[0].replacement_id, strong);

        let marked = kg
            .neighbors(&weak, &EdgeFilter::new().types(vec![RelationshipType::DeprecatedBy]))
            .unwrap();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].target_id, strong);
        // Marked, not deleted
        assert!(kg.get_memory(&weak).is_ok());

        let again = intel.deprecate(3, 0.3).unwrap();
        assert!(again.deprecated.is_empty());
        assert_eq!(again.skipped[0].reason, "already deprecated");
    }

    #[test]
    fn test_usage_floor_protects_new_solutions() {
        let kg = KnowledgeGraph::new();
        let problem = create(&kg, MemoryKind::Problem, "memory leak in worker");
        let tried = create(&kg, MemoryKind::Solution, "restart worker hourly");
        create(&kg, MemoryKind::Solution, "restart worker on leak detection");
        let intel = Intelligence::new(&kg);
        intel.record_solution_outcome(&tried, &problem, false).unwrap();

        let report = intel.deprecate(2, 0.3).unwrap();
        assert!(report.deprecated.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_no_alternative_leaves_unmarked() {
        let kg = KnowledgeGraph::new();
        let problem = create(&kg, MemoryKind::Problem, "dns flaps");
        let lonely = create(&kg, MemoryKind::Solution, "hardcode resolver address");
        create(&kg, MemoryKind::Solution, "completely different topic entirely");
        let intel = Intelligence::new(&kg);
        for _ in 0..2 {
            intel.record_solution_outcome(&lonely, &problem, false).unwrap();
        }

        let report = intel.deprecate(2, 0.3).unwrap();
        assert!(report.deprecated.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].solution_id, lonely);
        assert_eq!(kg.stats().unwrap().total_relationships, 1);
    }
}
