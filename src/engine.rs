//! Shared graph state and the [`KnowledgeGraph`] handle.
//!
//! [`GraphState`] bundles the entity store, relationship graph, and search
//! index, and is the only place that mutates more than one of them. Every
//! mutation validates before it touches anything, so a failed call leaves the
//! state exactly as it was.
//!
//! [`KnowledgeGraph`] holds the state as `RwLock<Arc<GraphState>>`. Readers
//! clone the `Arc` and work on a consistent snapshot without holding the lock;
//! writers copy-on-write through `Arc::make_mut` and swap in place. The stores
//! keep their records in persistent `im` maps, so that copy shares structure
//! with every live snapshot and a write costs O(log n) whether or not a
//! reader still holds the previous state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::graph::{
    shortest_weighted_path, EdgeFilter, NewRelationship, Relationship, RelationshipGraph,
    RelationshipId, RepointOutcome, Traversal, TraversalIter,
};
use crate::memory::{EntityStore, Memory, MemoryId, MemoryPatch, MemoryQuery, NewMemory};
use crate::search::{SearchHit, SearchIndex, SearchQuery};
use crate::snapshot::{GraphSnapshot, SnapshotStore};

/// Entity store, relationship graph, and search index kept in lockstep.
#[derive(Debug, Clone, Default)]
pub struct GraphState {
    entities: EntityStore,
    relationships: RelationshipGraph,
    index: SearchIndex,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn relationships(&self) -> &RelationshipGraph {
        &self.relationships
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    pub fn memory(&self, id: &MemoryId) -> Result<&Memory> {
        self.entities.get(id)
    }

    pub(crate) fn create_memory(&mut self, new: NewMemory, now: DateTime<Utc>) -> Result<Memory> {
        let memory = self.entities.create(new, now)?;
        self.index.index(&memory);
        Ok(memory)
    }

    pub(crate) fn update_memory(
        &mut self,
        id: &MemoryId,
        expected_version: u64,
        patch: MemoryPatch,
        now: DateTime<Utc>,
    ) -> Result<Memory> {
        let memory = self.entities.update(id, expected_version, patch, now)?;
        self.index.reindex(&memory);
        Ok(memory)
    }

    pub(crate) fn append_observation(
        &mut self,
        id: &MemoryId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Memory> {
        let memory = self.entities.append_observation(id, text, now)?;
        self.index.reindex(&memory);
        Ok(memory)
    }

    pub(crate) fn absorb_observations(
        &mut self,
        id: &MemoryId,
        observations: &[String],
        now: DateTime<Utc>,
    ) -> Result<Memory> {
        let memory = self.entities.absorb_observations(id, observations, now)?;
        self.index.reindex(&memory);
        Ok(memory)
    }

    /// Delete a memory together with every relationship touching it.
    pub(crate) fn delete_memory(&mut self, id: &MemoryId) -> Result<(Memory, Vec<Relationship>)> {
        self.entities.get(id)?;
        let removed = self.relationships.cascade_remove(id);
        self.index.remove(id);
        let memory = self.entities.remove(id)?;
        if self.relationships.degree(id) != 0 {
            return Err(Error::consistency(format!(
                "relationships still reference deleted memory {}",
                id
            )));
        }
        Ok((memory, removed))
    }

    /// Create or merge a relationship. Both endpoints must exist.
    pub(crate) fn create_relationship(
        &mut self,
        new: &NewRelationship,
        gain: f64,
        now: DateTime<Utc>,
    ) -> Result<(Relationship, bool)> {
        self.entities.get(&new.source_id)?;
        self.entities.get(&new.target_id)?;
        self.relationships.create(new, gain, now)
    }

    pub(crate) fn delete_relationship(&mut self, id: &RelationshipId) -> Result<Relationship> {
        self.relationships.remove(id)
    }

    pub(crate) fn repoint_relationship(
        &mut self,
        id: &RelationshipId,
        from: MemoryId,
        to: MemoryId,
        gain: f64,
        now: DateTime<Utc>,
    ) -> Result<RepointOutcome> {
        self.entities.get(&to)?;
        self.relationships.repoint(id, from, to, gain, now)
    }

    /// Every memory and relationship, each ordered by id.
    pub fn export(&self) -> GraphSnapshot {
        GraphSnapshot {
            memories: self.entities.iter().cloned().collect(),
            relationships: self.relationships.iter().cloned().collect(),
        }
    }

    /// Rebuild state from a snapshot, rejecting dangling or malformed records.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        let mut state = Self::new();
        for memory in snapshot.memories {
            state.index.index(&memory);
            state.entities.insert_existing(memory)?;
        }
        for rel in snapshot.relationships {
            for end in [rel.source_id, rel.target_id] {
                if !state.entities.contains(&end) {
                    return Err(Error::consistency(format!(
                        "relationship {} references missing memory {}",
                        rel.id, end
                    )));
                }
            }
            state.relationships.insert_existing(rel)?;
        }
        Ok(state)
    }

    /// Counts and averages over the whole graph.
    pub fn stats(&self) -> GraphStats {
        let mut memories_by_kind = BTreeMap::new();
        let mut importance_sum = 0.0;
        for memory in self.entities.iter() {
            *memories_by_kind
                .entry(memory.kind.as_str().to_string())
                .or_insert(0) += 1;
            importance_sum += memory.importance;
        }
        let mut relationships_by_category = BTreeMap::new();
        let mut strength_sum = 0.0;
        let mut confidence_sum = 0.0;
        for rel in self.relationships.iter() {
            *relationships_by_category
                .entry(rel.category().as_str().to_string())
                .or_insert(0) += 1;
            strength_sum += rel.strength;
            confidence_sum += rel.confidence;
        }
        let mean = |sum: f64, n: usize| if n == 0 { 0.0 } else { sum / n as f64 };
        GraphStats {
            total_memories: self.entities.len(),
            memories_by_kind,
            total_relationships: self.relationships.len(),
            relationships_by_category,
            average_importance: mean(importance_sum, self.entities.len()),
            average_strength: mean(strength_sum, self.relationships.len()),
            average_confidence: mean(confidence_sum, self.relationships.len()),
        }
    }
}

/// Summary counts for a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_memories: usize,
    pub memories_by_kind: BTreeMap<String, usize>,
    pub total_relationships: usize,
    pub relationships_by_category: BTreeMap<String, usize>,
    pub average_importance: f64,
    pub average_strength: f64,
    pub average_confidence: f64,
}

/// A memory with every relationship touching it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryWithRelationships {
    pub memory: Memory,
    pub relationships: Vec<Relationship>,
}

/// A traversal bound to the snapshot it was planned on.
///
/// Iterate with [`TraversalPlan::iter`]; each call restarts the walk and
/// yields the same sequence, whatever writers do in the meantime.
#[derive(Debug, Clone)]
pub struct TraversalPlan {
    state: Arc<GraphState>,
    start: MemoryId,
    max_depth: usize,
    filter: EdgeFilter,
}

impl TraversalPlan {
    pub fn start(&self) -> MemoryId {
        self.start
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn iter(&self) -> TraversalIter<'_> {
        TraversalIter::new(
            &self.state.relationships,
            &self.state.entities,
            self.start,
            self.max_depth,
            self.filter.clone(),
        )
    }
}

impl<'a> IntoIterator for &'a TraversalPlan {
    type Item = crate::graph::TraversalStep;
    type IntoIter = TraversalIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Thread-safe handle to a knowledge graph.
///
/// Pass one handle (usually behind an `Arc`) into every operation; it is the
/// explicit context value that owns the graph for the duration of a call.
#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    state: RwLock<Arc<GraphState>>,
    config: EngineConfig,
}

impl KnowledgeGraph {
    /// Create an empty graph with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph with the given configuration.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: RwLock::new(Arc::new(GraphState::new())),
            config,
        })
    }

    /// Rebuild a graph from an exported snapshot.
    pub fn from_snapshot(snapshot: GraphSnapshot, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let state = GraphState::from_snapshot(snapshot)?;
        Ok(Self {
            state: RwLock::new(Arc::new(state)),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A consistent, immutable view of the current state.
    pub fn snapshot(&self) -> Result<Arc<GraphState>> {
        let guard = self
            .state
            .read()
            .map_err(|e| Error::Internal(format!("Failed to lock graph state: {}", e)))?;
        Ok(Arc::clone(&guard))
    }

    fn write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut GraphState) -> Result<T>,
    {
        let mut guard = self
            .state
            .write()
            .map_err(|e| Error::Internal(format!("Failed to lock graph state: {}", e)))?;
        f(Arc::make_mut(&mut guard))
    }

    fn gain(&self) -> f64 {
        self.config.evidence.confidence_gain
    }

    // ==================== Memory Operations ====================

    #[instrument(skip(self, new), fields(kind = %new.kind))]
    pub fn create_memory(&self, new: NewMemory) -> Result<Memory> {
        let memory = self.write(|state| state.create_memory(new, Utc::now()))?;
        debug!(id = %memory.id, "Created memory");
        Ok(memory)
    }

    pub fn get_memory(&self, id: &MemoryId) -> Result<Memory> {
        self.snapshot()?.memory(id).cloned()
    }

    /// A memory and its relationships, read from one snapshot.
    pub fn get_memory_with_relationships(&self, id: &MemoryId) -> Result<MemoryWithRelationships> {
        let state = self.snapshot()?;
        let memory = state.memory(id)?.clone();
        let relationships = state
            .relationships
            .neighbors(id, &EdgeFilter::default())
            .into_iter()
            .cloned()
            .collect();
        Ok(MemoryWithRelationships {
            memory,
            relationships,
        })
    }

    #[instrument(skip(self, patch), fields(id = %id))]
    pub fn update_memory(
        &self,
        id: &MemoryId,
        expected_version: u64,
        patch: MemoryPatch,
    ) -> Result<Memory> {
        self.write(|state| state.update_memory(id, expected_version, patch, Utc::now()))
    }

    #[instrument(skip(self, text), fields(id = %id))]
    pub fn append_observation(&self, id: &MemoryId, text: &str) -> Result<Memory> {
        self.write(|state| state.append_observation(id, text, Utc::now()))
    }

    pub(crate) fn absorb_observations(
        &self,
        id: &MemoryId,
        observations: &[String],
    ) -> Result<Memory> {
        self.write(|state| state.absorb_observations(id, observations, Utc::now()))
    }

    /// Delete a memory and cascade to its relationships. Returns the number
    /// of relationships removed.
    #[instrument(skip(self), fields(id = %id))]
    pub fn delete_memory(&self, id: &MemoryId) -> Result<usize> {
        let (_, removed) = self.write(|state| state.delete_memory(id))?;
        debug!(cascaded = removed.len(), "Deleted memory");
        Ok(removed.len())
    }

    pub fn list_memories(&self, query: &MemoryQuery) -> Result<Vec<Memory>> {
        Ok(self.snapshot()?.entities.list(query))
    }

    // ==================== Relationship Operations ====================

    /// Create a relationship, or merge the observation into the existing one.
    #[instrument(skip(self, new), fields(rel_type = %new.rel_type))]
    pub fn create_relationship(&self, new: NewRelationship) -> Result<Relationship> {
        let gain = self.gain();
        let (rel, created) =
            self.write(|state| state.create_relationship(&new, gain, Utc::now()))?;
        debug!(id = %rel.id, created, evidence = rel.evidence_count, "Recorded relationship");
        Ok(rel)
    }

    pub fn get_relationship(&self, id: &RelationshipId) -> Result<Relationship> {
        self.snapshot()?.relationships.get(id).cloned()
    }

    #[instrument(skip(self), fields(id = %id))]
    pub fn delete_relationship(&self, id: &RelationshipId) -> Result<Relationship> {
        self.write(|state| state.delete_relationship(id))
    }

    pub(crate) fn repoint_relationship(
        &self,
        id: &RelationshipId,
        from: MemoryId,
        to: MemoryId,
    ) -> Result<RepointOutcome> {
        let gain = self.gain();
        self.write(|state| state.repoint_relationship(id, from, to, gain, Utc::now()))
    }

    /// Live edges touching a memory, strongest first.
    pub fn neighbors(&self, id: &MemoryId, filter: &EdgeFilter) -> Result<Vec<Relationship>> {
        let state = self.snapshot()?;
        state.memory(id)?;
        Ok(state
            .relationships
            .neighbors(id, filter)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Plan a breadth-first walk. Depth is clamped to the configured maximum.
    pub fn traverse(
        &self,
        start: MemoryId,
        max_depth: usize,
        filter: EdgeFilter,
    ) -> Result<TraversalPlan> {
        let state = self.snapshot()?;
        let max_depth = max_depth.min(self.config.graph.max_traversal_depth);
        Traversal::new(&state.relationships, &state.entities, start, max_depth, filter.clone())?;
        Ok(TraversalPlan {
            state,
            start,
            max_depth,
            filter,
        })
    }

    /// Cheapest path by `1 - strength`, within the configured hop horizon.
    pub fn shortest_weighted_path(
        &self,
        source: MemoryId,
        target: MemoryId,
    ) -> Result<Vec<Relationship>> {
        let state = self.snapshot()?;
        state.memory(&source)?;
        state.memory(&target)?;
        shortest_weighted_path(
            &state.relationships,
            source,
            target,
            self.config.graph.max_path_hops,
        )
    }

    // ==================== Search ====================

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let state = self.snapshot()?;
        state
            .index
            .search(query, &state.relationships, &self.config.search)
            .into_iter()
            .map(|scored| {
                Ok(SearchHit {
                    memory: state.memory(&scored.id)?.clone(),
                    score: scored.score,
                })
            })
            .collect()
    }

    // ==================== Snapshot ====================

    pub fn stats(&self) -> Result<GraphStats> {
        Ok(self.snapshot()?.stats())
    }

    pub fn export(&self) -> Result<GraphSnapshot> {
        Ok(self.snapshot()?.export())
    }

    /// Replace the whole graph with a snapshot. On error the graph is unchanged.
    #[instrument(skip(self, snapshot), fields(memories = snapshot.memories.len(), relationships = snapshot.relationships.len()))]
    pub fn import(&self, snapshot: GraphSnapshot) -> Result<()> {
        let next = GraphState::from_snapshot(snapshot)?;
        let mut guard = self
            .state
            .write()
            .map_err(|e| Error::Internal(format!("Failed to lock graph state: {}", e)))?;
        *guard = Arc::new(next);
        info!("Imported graph snapshot");
        Ok(())
    }

    /// Export the current state into a snapshot store.
    pub fn save_to(&self, store: &dyn SnapshotStore) -> Result<()> {
        store.save(&self.export()?)
    }

    /// Build a graph from whatever a snapshot store holds.
    pub fn load_from(store: &dyn SnapshotStore, config: EngineConfig) -> Result<Self> {
        Self::from_snapshot(store.load()?, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{RelationshipCategory, RelationshipType};
    use crate::memory::MemoryKind;
    use pretty_assertions::assert_eq;

    fn scenario_a(kg: &KnowledgeGraph) -> (Memory, Memory) {
        let p1 = kg
            .create_memory(NewMemory::new(MemoryKind::Problem, "build fails on missing dep"))
            .unwrap();
        let s1 = kg
            .create_memory(NewMemory::new(MemoryKind::Solution, "pin dependency version"))
            .unwrap();
        (p1, s1)
    }

    #[test]
    fn test_delete_cascades_relationships() {
        let kg = KnowledgeGraph::new();
        let (p1, s1) = scenario_a(&kg);
        let rel = kg
            .create_relationship(
                NewRelationship::new(s1.id, p1.id, RelationshipType::Solves)
                    .with_strength(0.8)
                    .with_confidence(0.5),
            )
            .unwrap();

        assert_eq!(kg.delete_memory(&p1.id).unwrap(), 1);
        assert!(matches!(kg.get_relationship(&rel.id), Err(Error::NotFound { .. })));
        assert!(matches!(kg.get_memory(&p1.id), Err(Error::NotFound { .. })));
        assert_eq!(kg.get_memory(&s1.id).unwrap(), s1);
        assert!(kg.neighbors(&s1.id, &EdgeFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_create_merges() {
        let kg = KnowledgeGraph::new();
        let (p1, s1) = scenario_a(&kg);
        for strength in [0.8, 0.4] {
            kg.create_relationship(
                NewRelationship::new(s1.id, p1.id, RelationshipType::Solves).with_strength(strength),
            )
            .unwrap();
        }
        let rels = kg.neighbors(&p1.id, &EdgeFilter::default()).unwrap();
        assert_eq!(rels.len(), 1);
        assert!((rels[0].strength - 0.6).abs() < 1e-9);
        assert_eq!(rels[0].evidence_count, 2);
    }

    #[test]
    fn test_relationship_requires_endpoints() {
        let kg = KnowledgeGraph::new();
        let (p1, _) = scenario_a(&kg);
        let missing = MemoryId::new();
        assert!(matches!(
            kg.create_relationship(NewRelationship::new(missing, p1.id, RelationshipType::Solves)),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            kg.create_relationship(NewRelationship::new(p1.id, p1.id, RelationshipType::Causes)),
            Err(Error::Validation(_))
        ));
        assert_eq!(kg.stats().unwrap().total_relationships, 0);
    }

    #[test]
    fn test_update_conflict_leaves_memory_untouched() {
        let kg = KnowledgeGraph::new();
        let (p1, _) = scenario_a(&kg);
        let updated = kg
            .update_memory(&p1.id, 1, MemoryPatch::new().content("build fails in CI"))
            .unwrap();
        assert_eq!(updated.version, 2);

        let err = kg
            .update_memory(&p1.id, 1, MemoryPatch::new().content("stale write"))
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(kg.get_memory(&p1.id).unwrap(), updated);
    }

    #[test]
    fn test_snapshot_isolated_from_writers() {
        let kg = KnowledgeGraph::new();
        let (p1, s1) = scenario_a(&kg);
        kg.create_relationship(NewRelationship::new(s1.id, p1.id, RelationshipType::Solves))
            .unwrap();
        let plan = kg.traverse(p1.id, 2, EdgeFilter::default()).unwrap();
        let before = kg.snapshot().unwrap();

        kg.delete_memory(&s1.id).unwrap();

        assert_eq!(before.entities().len(), 2);
        assert_eq!(plan.iter().count(), 1);
        assert_eq!(kg.traverse(p1.id, 2, EdgeFilter::default()).unwrap().iter().count(), 0);
    }

    #[test]
    fn test_writers_finish_while_plan_held() {
        let kg = KnowledgeGraph::new();
        let (p1, s1) = scenario_a(&kg);
        kg.create_relationship(NewRelationship::new(s1.id, p1.id, RelationshipType::Solves))
            .unwrap();
        let plan = kg.traverse(p1.id, 2, EdgeFilter::default()).unwrap();

        std::thread::scope(|scope| {
            let writers: Vec<_> = (0..4)
                .map(|t| {
                    let kg = &kg;
                    scope.spawn(move || {
                        for i in 0..50 {
                            let m = kg
                                .create_memory(NewMemory::new(
                                    MemoryKind::Task,
                                    format!("writer {} task {}", t, i),
                                ))
                                .unwrap();
                            kg.create_relationship(NewRelationship::new(
                                m.id,
                                p1.id,
                                RelationshipType::RelatedTo,
                            ))
                            .unwrap();
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }
        });
        kg.update_memory(&p1.id, 1, MemoryPatch::new().content("build fails in CI"))
            .unwrap();

        let stats = kg.stats().unwrap();
        assert_eq!(stats.total_memories, 202);
        assert_eq!(stats.total_relationships, 201);

        let held: Vec<MemoryId> = plan.iter().map(|step| step.memory.id).collect();
        assert_eq!(held, vec![s1.id]);
        assert_eq!(kg.traverse(p1.id, 1, EdgeFilter::default()).unwrap().iter().count(), 201);
    }

    #[test]
    fn test_traverse_clamps_depth() {
        let kg = KnowledgeGraph::new();
        let (p1, _) = scenario_a(&kg);
        let plan = kg.traverse(p1.id, 100, EdgeFilter::default()).unwrap();
        assert_eq!(plan.max_depth(), kg.config().graph.max_traversal_depth);
    }

    #[test]
    fn test_observation_search() {
        let kg = KnowledgeGraph::new();
        let (p1, _) = scenario_a(&kg);
        kg.create_memory(NewMemory::new(MemoryKind::Task, "update changelog"))
            .unwrap();
        kg.append_observation(&p1.id, "happens only with the lockfile removed")
            .unwrap();

        let hits = kg.search(&SearchQuery::new("lockfile")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.id, p1.id);
        assert_eq!(hits[0].memory.version, 2);
    }

    #[test]
    fn test_export_import_round_trip() {
        let kg = KnowledgeGraph::new();
        let (p1, s1) = scenario_a(&kg);
        kg.create_relationship(NewRelationship::new(s1.id, p1.id, RelationshipType::Solves))
            .unwrap();
        kg.create_relationship(NewRelationship::new(p1.id, s1.id, RelationshipType::SimilarTo))
            .unwrap();

        let exported = kg.export().unwrap();
        let restored = KnowledgeGraph::from_snapshot(exported.clone(), EngineConfig::default())
            .unwrap();
        assert_eq!(restored.export().unwrap(), exported);
        assert_eq!(restored.stats().unwrap(), kg.stats().unwrap());
        assert_eq!(
            restored.search(&SearchQuery::new("dependency")).unwrap(),
            kg.search(&SearchQuery::new("dependency")).unwrap()
        );
    }

    #[test]
    fn test_import_rejects_dangling_relationship() {
        let kg = KnowledgeGraph::new();
        let (p1, s1) = scenario_a(&kg);
        kg.create_relationship(NewRelationship::new(s1.id, p1.id, RelationshipType::Solves))
            .unwrap();
        let mut exported = kg.export().unwrap();
        exported.memories.retain(|m| m.id != p1.id);

        assert!(matches!(kg.import(exported), Err(Error::Consistency(_))));
        assert_eq!(kg.stats().unwrap().total_memories, 2);
    }

    #[test]
    fn test_stats() {
        let kg = KnowledgeGraph::new();
        let (p1, s1) = scenario_a(&kg);
        kg.create_relationship(
            NewRelationship::new(s1.id, p1.id, RelationshipType::Solves).with_strength(0.6),
        )
        .unwrap();
        let stats = kg.stats().unwrap();
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.memories_by_kind.get("problem"), Some(&1));
        assert_eq!(
            stats.relationships_by_category.get(RelationshipCategory::Solution.as_str()),
            Some(&1)
        );
        assert!((stats.average_strength - 0.6).abs() < 1e-9);
        assert!((stats.average_importance - 0.5).abs() < 1e-9);
    }
}
