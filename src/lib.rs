//! # memgraph-core
//!
//! A weighted relationship knowledge graph used as persistent memory for
//! coding agents.
//!
//! ## Core Components
//!
//! - **Memory**: Typed knowledge records with optimistic versioning
//! - **Graph**: Typed, weighted relationships with evidence-based confidence
//! - **Search**: Tokenized full-text index with graph-aware ranking
//! - **Intelligence**: Co-occurrence detection, similarity, effectiveness,
//!   consolidation and deprecation passes
//! - **Snapshot**: JSON and SQLite persistence of the full graph
//! - **Maintenance**: Periodic background intelligence runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use memgraph_core::{KnowledgeGraph, MemoryKind, NewMemory, NewRelationship, RelationshipType};
//!
//! let kg = KnowledgeGraph::new();
//! let problem = kg.create_memory(NewMemory::new(MemoryKind::Problem, "CI times out on integration tests"))?;
//! let fix = kg.create_memory(NewMemory::new(MemoryKind::Solution, "shard integration tests across runners"))?;
//!
//! kg.create_relationship(
//!     NewRelationship::new(fix.id, problem.id, RelationshipType::Solves).with_strength(0.8),
//! )?;
//!
//! for hit in kg.search(&SearchQuery::new("integration tests"))? {
//!     println!("{:.2} {}", hit.score.total, hit.memory.label());
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod intelligence;
pub mod maintenance;
pub mod memory;
pub mod search;
pub mod service;
pub mod snapshot;

mod proptest;

// Re-exports for convenience
pub use config::{EngineConfig, EvidenceConfig, GraphConfig, IntelligenceConfig, SearchConfig};
pub use engine::{GraphState, GraphStats, KnowledgeGraph, MemoryWithRelationships, TraversalPlan};
pub use error::{Error, Result};
pub use graph::{
    EdgeFilter, Evidence, EvidencePolarity, NewRelationship, Relationship, RelationshipCategory,
    RelationshipId, RelationshipType, TraversalStep,
};
pub use intelligence::{
    CancelFlag, ConsolidationReport, CoOccurrenceReport, DeprecationReport, Intelligence,
    RelationshipAnalysis, SimilarMemory, SolutionEffectiveness, SolutionSuggestion,
};
pub use maintenance::{MaintenanceConfig, MaintenanceHandle, MaintenanceReport, MaintenanceScheduler};
pub use memory::{
    Memory, MemoryContext, MemoryId, MemoryKind, MemoryPatch, MemoryQuery, NewMemory,
};
pub use search::{ScoreBreakdown, SearchHit, SearchQuery};
pub use service::MemoryService;
pub use snapshot::{GraphSnapshot, JsonSnapshotStore, SnapshotStore, SqliteSnapshotStore};
