//! Typed, weighted relationships between memories.
//!
//! Relationships belong to one of 35 types grouped into 7 categories. For a
//! given `(source, target, type)` at most one live edge exists (symmetric
//! types also match the swapped pair); creating it again folds the new
//! observation into the existing edge's evidence log instead of duplicating.
//!
//! ## Example
//!
//! ```rust,ignore
//! use memgraph_core::graph::{EdgeFilter, NewRelationship, RelationshipCategory, RelationshipType};
//!
//! let rel = kg.create_relationship(
//!     NewRelationship::new(solution.id, problem.id, RelationshipType::Solves)
//!         .with_strength(0.8)
//!         .with_confidence(0.5),
//! )?;
//!
//! // Walk Similarity edges two hops out
//! let plan = kg.traverse(problem.id, 2, EdgeFilter::new().categories(vec![RelationshipCategory::Similarity]))?;
//! for step in plan.iter() {
//!     println!("{} at depth {}", step.memory.label(), step.depth);
//! }
//! ```

mod evidence;
mod store;
mod traverse;
mod types;

pub use evidence::{contradict, corroborate, fold_evidence, EvidenceSummary};
pub use store::{EdgeFilter, RelationshipGraph, RepointOutcome};
pub use traverse::{shortest_weighted_path, Traversal, TraversalIter, TraversalStep};
pub use types::{
    Evidence, EvidencePolarity, NewRelationship, Relationship, RelationshipCategory,
    RelationshipId, RelationshipType,
};
