//! Operation-level facade over a shared [`KnowledgeGraph`].
//!
//! Transport adapters (an MCP server, a CLI, an HTTP handler) call these
//! methods and translate the results; the engine itself knows nothing about
//! how it is exposed.

use std::sync::Arc;
use tracing::instrument;

use crate::engine::{GraphStats, KnowledgeGraph, MemoryWithRelationships};
use crate::error::Result;
use crate::graph::{EdgeFilter, NewRelationship, Relationship, RelationshipCategory, TraversalStep};
use crate::intelligence::{
    Intelligence, RelationshipAnalysis, SolutionEffectiveness, SolutionSuggestion,
};
use crate::memory::{Memory, MemoryContext, MemoryId, MemoryKind, MemoryPatch, NewMemory};
use crate::search::{SearchHit, SearchQuery};

/// Cloneable handle exposing the external operation set.
#[derive(Debug, Clone)]
pub struct MemoryService {
    kg: Arc<KnowledgeGraph>,
}

impl MemoryService {
    pub fn new(kg: Arc<KnowledgeGraph>) -> Self {
        Self { kg }
    }

    pub fn graph(&self) -> &Arc<KnowledgeGraph> {
        &self.kg
    }

    fn intelligence(&self) -> Intelligence<'_> {
        Intelligence::new(&self.kg)
    }

    /// Store a new memory.
    pub fn store_memory(
        &self,
        kind: MemoryKind,
        content: &str,
        context: MemoryContext,
    ) -> Result<Memory> {
        self.kg
            .create_memory(NewMemory::new(kind, content).with_context(context))
    }

    /// Store a memory with every optional field.
    pub fn store(&self, new: NewMemory) -> Result<Memory> {
        self.kg.create_memory(new)
    }

    /// A memory together with its relationships.
    pub fn get_memory(&self, id: &MemoryId) -> Result<MemoryWithRelationships> {
        self.kg.get_memory_with_relationships(id)
    }

    pub fn update_memory(
        &self,
        id: &MemoryId,
        expected_version: u64,
        patch: MemoryPatch,
    ) -> Result<Memory> {
        self.kg.update_memory(id, expected_version, patch)
    }

    pub fn add_observation(&self, id: &MemoryId, text: &str) -> Result<Memory> {
        self.kg.append_observation(id, text)
    }

    pub fn delete_memory(&self, id: &MemoryId) -> Result<()> {
        self.kg.delete_memory(id).map(|_| ())
    }

    pub fn search_memories(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.kg.search(query)
    }

    pub fn create_relationship(&self, new: NewRelationship) -> Result<Relationship> {
        self.kg.create_relationship(new)
    }

    /// Memories reachable from `id`, each with the path that reached it.
    #[instrument(skip(self), fields(id = %id))]
    pub fn get_related_memories(
        &self,
        id: &MemoryId,
        categories: Option<Vec<RelationshipCategory>>,
        depth: usize,
    ) -> Result<Vec<TraversalStep>> {
        let filter = EdgeFilter {
            categories,
            types: None,
        };
        let plan = self.kg.traverse(*id, depth, filter)?;
        Ok(plan.iter().collect())
    }

    pub fn analyze_relationships(&self) -> Result<RelationshipAnalysis> {
        self.intelligence().analyze_relationships()
    }

    pub fn suggest_similar_solutions(
        &self,
        problem: &MemoryId,
        top_k: usize,
    ) -> Result<Vec<SolutionSuggestion>> {
        self.intelligence().suggest_similar_solutions(problem, top_k)
    }

    pub fn predict_solution_effectiveness(&self, solution: &MemoryId) -> Result<f64> {
        self.intelligence().compute_effectiveness(solution)
    }

    /// Effectiveness of every solution, best first.
    pub fn memory_effectiveness(&self) -> Result<Vec<SolutionEffectiveness>> {
        self.intelligence().effectiveness_table()
    }

    pub fn record_solution_outcome(
        &self,
        solution: &MemoryId,
        problem: &MemoryId,
        success: bool,
    ) -> Result<Relationship> {
        self.intelligence()
            .record_solution_outcome(solution, problem, success)
    }

    pub fn stats(&self) -> Result<GraphStats> {
        self.kg.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::graph::RelationshipType;
    use pretty_assertions::assert_eq;

    fn service() -> MemoryService {
        MemoryService::new(Arc::new(KnowledgeGraph::new()))
    }

    #[test]
    fn test_operation_flow() {
        let svc = service();
        let ctx = MemoryContext::new().with_project("atlas");
        let p1 = svc
            .store_memory(MemoryKind::Problem, "build fails on missing dep", ctx.clone())
            .unwrap();
        let s1 = svc
            .store_memory(MemoryKind::Solution, "pin dependency version", ctx)
            .unwrap();
        svc.create_relationship(
            NewRelationship::new(s1.id, p1.id, RelationshipType::Solves)
                .with_strength(0.8)
                .with_confidence(0.5),
        )
        .unwrap();

        let fetched = svc.get_memory(&p1.id).unwrap();
        assert_eq!(fetched.memory, p1);
        assert_eq!(fetched.relationships.len(), 1);

        let related = svc
            .get_related_memories(&p1.id, Some(vec![RelationshipCategory::Solution]), 2)
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].memory.id, s1.id);

        let suggestions = svc.suggest_similar_solutions(&p1.id, 3).unwrap();
        assert_eq!(suggestions[0].memory.id, s1.id);

        svc.record_solution_outcome(&s1.id, &p1.id, true).unwrap();
        let table = svc.memory_effectiveness().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].memory_id, s1.id);
        let predicted = svc.predict_solution_effectiveness(&s1.id).unwrap();
        assert!((0.0..=1.0).contains(&predicted));

        svc.delete_memory(&p1.id).unwrap();
        assert!(matches!(svc.get_memory(&p1.id), Err(Error::NotFound { .. })));
        assert!(svc.get_memory(&s1.id).unwrap().relationships.is_empty());
        assert!(matches!(svc.delete_memory(&p1.id), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_store_memory_validation() {
        let svc = service();
        assert!(matches!(
            svc.store_memory(MemoryKind::Task, "   ", MemoryContext::new()),
            Err(Error::Validation(_))
        ));
        assert_eq!(svc.stats().unwrap().total_memories, 0);
    }
}
