//! Property-based tests for graph-wide invariants using proptest.
//!
//! These tests drive the public engine operations with generated workloads
//! and check that:
//!
//! - Evidence folding stays in bounds and ignores arrival order
//! - Deleting memories never leaves a dangling relationship
//! - Consolidation reaches a fixpoint in one call
//! - Search and traversal are deterministic for a fixed state
//! - Export followed by import reproduces the graph exactly

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use crate::engine::KnowledgeGraph;
    use crate::graph::{fold_evidence, EdgeFilter, Evidence, NewRelationship, RelationshipType};
    use crate::intelligence::Intelligence;
    use crate::memory::{MemoryContext, MemoryId, MemoryKind, NewMemory};
    use crate::search::SearchQuery;

    const WORDS: [&str; 8] = [
        "cache", "deploy", "timeout", "kafka", "retry", "schema", "build", "token",
    ];

    fn unit() -> impl Strategy<Value = f64> {
        prop_oneof![Just(0.0), Just(1.0), 0.0f64..=1.0f64]
    }

    // (strength, confidence, supporting)
    fn observation() -> impl Strategy<Value = (f64, f64, bool)> {
        (unit(), unit(), prop::bool::weighted(0.7))
    }

    fn content() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::sample::select(WORDS.to_vec()), 1..4).prop_map(|w| w.join(" "))
    }

    fn kind() -> impl Strategy<Value = MemoryKind> {
        prop::sample::select(vec![MemoryKind::Problem, MemoryKind::Solution, MemoryKind::Task])
    }

    fn rel_type() -> impl Strategy<Value = RelationshipType> {
        prop::sample::select(RelationshipType::ALL.to_vec())
    }

    // (source index, target index, type, strength)
    fn edge() -> impl Strategy<Value = (usize, usize, RelationshipType, f64)> {
        (0usize..8, 0usize..8, rel_type(), unit())
    }

    fn to_evidence(obs: &[(f64, f64, bool)]) -> Vec<Evidence> {
        let now = Utc::now();
        obs.iter()
            .map(|&(s, c, supporting)| {
                if supporting {
                    Evidence::supporting(s, c, now)
                } else {
                    Evidence::contradicting(s, c, now)
                }
            })
            .collect()
    }

    /// A graph with the given memories and every non-loop edge.
    fn build(
        memories: &[(MemoryKind, String)],
        edges: &[(usize, usize, RelationshipType, f64)],
    ) -> (KnowledgeGraph, Vec<MemoryId>) {
        let kg = KnowledgeGraph::new();
        let ids: Vec<MemoryId> = memories
            .iter()
            .enumerate()
            .map(|(i, (kind, text))| {
                let ctx = MemoryContext::new().with_project(if i % 2 == 0 { "atlas" } else { "zephyr" });
                kg.create_memory(NewMemory::new(*kind, text.clone()).with_context(ctx))
                    .unwrap()
                    .id
            })
            .collect();
        for &(a, b, rel_type, strength) in edges {
            let (a, b) = (a % ids.len(), b % ids.len());
            if a == b {
                continue;
            }
            kg.create_relationship(NewRelationship::new(ids[a], ids[b], rel_type).with_strength(strength))
                .unwrap();
        }
        (kg, ids)
    }

    fn memories() -> impl Strategy<Value = Vec<(MemoryKind, String)>> {
        prop::collection::vec((kind(), content()), 2..8)
    }

    // =========================================================================
    // Evidence Properties
    // =========================================================================

    proptest! {
        /// Strength and confidence stay in [0, 1] for any evidence log.
        #[test]
        fn evidence_fold_is_bounded(
            obs in prop::collection::vec(observation(), 1..20),
            gain in 0.01f64..0.99f64
        ) {
            let summary = fold_evidence(&to_evidence(&obs), gain);
            prop_assert!((0.0..=1.0).contains(&summary.strength));
            prop_assert!((0.0..=1.0).contains(&summary.confidence));
            prop_assert_eq!(summary.supporting + summary.contradicting, obs.len() as u64);
        }

        /// The fold depends on the multiset of observations, not their order.
        #[test]
        fn evidence_fold_ignores_order(
            obs in prop::collection::vec(observation(), 1..20),
            rotate in 0usize..20
        ) {
            let mut shuffled = obs.clone();
            shuffled.reverse();
            let len = shuffled.len();
            shuffled.rotate_left(rotate % len);

            let a = fold_evidence(&to_evidence(&obs), 0.2);
            let b = fold_evidence(&to_evidence(&shuffled), 0.2);
            prop_assert_eq!(a, b);
        }

        /// Merging observations into one edge commutes across graphs.
        #[test]
        fn relationship_merge_commutes(obs in prop::collection::vec(observation(), 1..10)) {
            let apply = |order: &[(f64, f64, bool)]| {
                let kg = KnowledgeGraph::new();
                let fix = kg.create_memory(NewMemory::new(MemoryKind::Solution, "retry with backoff")).unwrap();
                let bug = kg.create_memory(NewMemory::new(MemoryKind::Problem, "flaky upstream")).unwrap();
                let mut last = None;
                for &(s, c, supporting) in order {
                    let mut new = NewRelationship::new(fix.id, bug.id, RelationshipType::Solves)
                        .with_strength(s)
                        .with_confidence(c);
                    if !supporting {
                        new = new.contradicting();
                    }
                    last = Some(kg.create_relationship(new).unwrap());
                }
                last.unwrap()
            };

            let forward = apply(&obs);
            let mut reversed = obs.clone();
            reversed.reverse();
            let backward = apply(&reversed);

            prop_assert_eq!(forward.evidence_count, obs.len() as u64);
            prop_assert_eq!(forward.evidence_count, backward.evidence_count);
            prop_assert_eq!(forward.counter_evidence_count, backward.counter_evidence_count);
            prop_assert_eq!(forward.strength, backward.strength);
            prop_assert_eq!(forward.confidence, backward.confidence);
        }
    }

    // =========================================================================
    // Graph Integrity Properties
    // =========================================================================

    proptest! {
        /// No relationship outlives either of its endpoints.
        #[test]
        fn delete_never_leaves_dangling_edges(
            mems in memories(),
            edges in prop::collection::vec(edge(), 0..20),
            doomed in prop::collection::vec(0usize..8, 1..4)
        ) {
            let (kg, ids) = build(&mems, &edges);
            for i in doomed {
                // Deleting twice is a NotFound, which is fine here
                let _ = kg.delete_memory(&ids[i % ids.len()]);
            }

            let state = kg.snapshot().unwrap();
            for rel in state.relationships().iter() {
                prop_assert!(state.entities().contains(&rel.source_id));
                prop_assert!(state.entities().contains(&rel.target_id));
            }
            let degree_sum: usize = state
                .entities()
                .iter()
                .map(|m| state.relationships().degree(&m.id))
                .sum();
            prop_assert_eq!(degree_sum, 2 * state.relationships().len());
        }

        /// Export then import reproduces the graph exactly.
        #[test]
        fn export_import_round_trip(
            mems in memories(),
            edges in prop::collection::vec(edge(), 0..15)
        ) {
            let (kg, _) = build(&mems, &edges);
            let exported = kg.export().unwrap();

            let restored = KnowledgeGraph::new();
            restored.import(exported.clone()).unwrap();
            prop_assert_eq!(restored.export().unwrap(), exported);
        }
    }

    // =========================================================================
    // Intelligence Properties
    // =========================================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// A consolidation call leaves nothing for a second call to merge.
        #[test]
        fn consolidation_is_idempotent(
            mems in memories(),
            edges in prop::collection::vec(edge(), 0..10),
            threshold in 0.6f64..0.95f64
        ) {
            let (kg, _) = build(&mems, &edges);
            let intel = Intelligence::new(&kg);
            let first = intel.consolidate(threshold).unwrap();
            prop_assert!(first.converged);
            let after_first = kg.export().unwrap();

            let second = intel.consolidate(threshold).unwrap();
            prop_assert!(second.merged.is_empty());
            prop_assert_eq!(kg.export().unwrap(), after_first);
        }

        /// Effectiveness is always a valid probability.
        #[test]
        fn effectiveness_is_bounded(outcomes in prop::collection::vec(any::<bool>(), 0..12)) {
            let kg = KnowledgeGraph::new();
            let fix = kg.create_memory(NewMemory::new(MemoryKind::Solution, "bump the pool size")).unwrap();
            let bug = kg.create_memory(NewMemory::new(MemoryKind::Problem, "pool exhausted")).unwrap();
            let intel = Intelligence::new(&kg);
            for success in &outcomes {
                intel.record_solution_outcome(&fix.id, &bug.id, *success).unwrap();
            }
            let value = intel.compute_effectiveness(&fix.id).unwrap();
            prop_assert!((0.0..=1.0).contains(&value));
            if outcomes.is_empty() {
                prop_assert_eq!(value, 0.5);
            }
        }
    }

    // =========================================================================
    // Determinism Properties
    // =========================================================================

    proptest! {
        /// Identical queries against an unchanged graph return identical results.
        #[test]
        fn search_is_deterministic(
            mems in memories(),
            edges in prop::collection::vec(edge(), 0..10),
            query in prop::sample::select(WORDS.to_vec())
        ) {
            let (kg, _) = build(&mems, &edges);
            let q = SearchQuery::new(query);
            let first = kg.search(&q).unwrap();
            let second = kg.search(&q).unwrap();
            prop_assert_eq!(&first, &second);
            for hit in &first {
                prop_assert!(hit.score.text > 0.0);
                prop_assert!((0.0..=1.0).contains(&hit.score.total));
            }
            for pair in first.windows(2) {
                prop_assert!(pair[0].score.total >= pair[1].score.total);
            }
        }

        /// Traversal visits each node at most once, within the depth bound,
        /// in the same order every time.
        #[test]
        fn traversal_is_bounded_and_deterministic(
            mems in memories(),
            edges in prop::collection::vec(edge(), 0..20),
            depth in 1usize..4
        ) {
            let (kg, ids) = build(&mems, &edges);
            let plan = kg.traverse(ids[0], depth, EdgeFilter::default()).unwrap();
            let first: Vec<MemoryId> = plan.iter().map(|s| s.memory.id).collect();
            let second: Vec<MemoryId> = plan.iter().map(|s| s.memory.id).collect();
            prop_assert_eq!(&first, &second);

            let mut seen = std::collections::HashSet::new();
            for step in plan.iter() {
                prop_assert!(step.depth >= 1 && step.depth <= depth);
                prop_assert_eq!(step.path.len(), step.depth);
                prop_assert!(step.memory.id != ids[0]);
                prop_assert!(seen.insert(step.memory.id));
            }
        }
    }
}
