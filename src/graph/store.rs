//! Relationship storage with an adjacency index.
//!
//! Edges live in an id-keyed map; each memory id maps to the set of edge ids
//! touching it, and each effective `(source, target, type)` key maps to its
//! single live edge. Endpoint existence is checked by the caller, which owns
//! the entity store.

use chrono::{DateTime, Utc};
use im::{HashMap, OrdMap, OrdSet};

use crate::error::{Error, Result};
use crate::graph::evidence::fold_evidence;
use crate::graph::types::*;
use crate::memory::MemoryId;

/// Restricts which edges a query considers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeFilter {
    pub categories: Option<Vec<RelationshipCategory>>,
    pub types: Option<Vec<RelationshipType>>,
}

impl EdgeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn categories(mut self, categories: Vec<RelationshipCategory>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn category(self, category: RelationshipCategory) -> Self {
        self.categories(vec![category])
    }

    pub fn types(mut self, types: Vec<RelationshipType>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn matches(&self, rel: &Relationship) -> bool {
        if let Some(ref categories) = self.categories {
            if !categories.contains(&rel.category()) {
                return false;
            }
        }
        if let Some(ref types) = self.types {
            if !types.contains(&rel.rel_type) {
                return false;
            }
        }
        true
    }
}

/// What happened to an edge during a re-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepointOutcome {
    /// The edge now references the new endpoint.
    Moved(RelationshipId),
    /// The edge collided with an existing one and was folded into it.
    Merged(RelationshipId),
    /// The edge would have become a self-loop and was removed.
    Dropped,
}

/// Typed, weighted edges between memories.
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    edges: OrdMap<RelationshipId, Relationship>,
    adjacency: HashMap<MemoryId, OrdSet<RelationshipId>>,
    pairs: HashMap<EdgeKey, RelationshipId>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All edges, id ascending.
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.edges.values()
    }

    pub fn get(&self, id: &RelationshipId) -> Result<&Relationship> {
        self.edges
            .get(id)
            .ok_or_else(|| Error::relationship_not_found(id))
    }

    /// Live edge with the same effective endpoints and type, if any.
    pub fn find(
        &self,
        source: MemoryId,
        target: MemoryId,
        rel_type: RelationshipType,
    ) -> Option<&Relationship> {
        self.pairs
            .get(&EdgeKey::new(source, target, rel_type))
            .and_then(|id| self.edges.get(id))
    }

    /// Edges touching a memory, in edge-id order.
    pub fn touching<'a>(&'a self, memory_id: &MemoryId) -> impl Iterator<Item = &'a Relationship> {
        self.adjacency
            .get(memory_id)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.edges.get(id))
    }

    /// Edges touching a memory that pass the filter, strongest first, then id.
    pub fn neighbors(&self, memory_id: &MemoryId, filter: &EdgeFilter) -> Vec<&Relationship> {
        let mut rels: Vec<&Relationship> =
            self.touching(memory_id).filter(|r| filter.matches(r)).collect();
        rels.sort_by(|a, b| b.strength.total_cmp(&a.strength).then(a.id.cmp(&b.id)));
        rels
    }

    /// Number of live edges touching a memory.
    pub fn degree(&self, memory_id: &MemoryId) -> usize {
        self.adjacency.get(memory_id).map_or(0, |s| s.len())
    }

    /// Sum of strengths of live edges touching a memory.
    pub fn weighted_degree(&self, memory_id: &MemoryId) -> f64 {
        self.touching(memory_id).map(|r| r.strength).sum()
    }

    /// Create an edge, or fold the observation into the existing live edge
    /// with the same effective key. Returns the edge and whether it is new.
    pub(crate) fn create(
        &mut self,
        new: &NewRelationship,
        gain: f64,
        now: DateTime<Utc>,
    ) -> Result<(Relationship, bool)> {
        new.validate()?;
        let observed_at = new.observed_at.unwrap_or(now);
        let evidence = Evidence {
            polarity: new.polarity,
            strength: new.strength,
            confidence: new.confidence,
            observed_at,
        };

        if let Some(id) = self.pairs.get(&new.key()).copied() {
            let rel = self
                .edges
                .get_mut(&id)
                .ok_or_else(|| Error::consistency(format!("pair index points at missing edge {}", id)))?;
            rel.evidence.push(evidence);
            if new.context_note.is_some() {
                rel.context_note = new.context_note.clone();
            }
            refresh(rel, gain, now);
            return Ok((rel.clone(), false));
        }

        let mut rel = Relationship {
            id: RelationshipId::new(),
            source_id: new.source_id,
            target_id: new.target_id,
            rel_type: new.rel_type,
            strength: new.strength,
            confidence: new.confidence,
            evidence_count: 0,
            counter_evidence_count: 0,
            context_note: new.context_note.clone(),
            version: 0,
            evidence: vec![evidence],
            created_at: now,
            updated_at: now,
            last_validated: observed_at,
        };
        refresh(&mut rel, gain, now);
        self.link(rel.clone());
        Ok((rel, true))
    }

    /// Remove an edge by id.
    pub(crate) fn remove(&mut self, id: &RelationshipId) -> Result<Relationship> {
        let rel = self
            .edges
            .remove(id)
            .ok_or_else(|| Error::relationship_not_found(id))?;
        self.unlink(&rel);
        Ok(rel)
    }

    /// Remove every edge touching `memory_id`.
    pub(crate) fn cascade_remove(&mut self, memory_id: &MemoryId) -> Vec<Relationship> {
        let ids: Vec<RelationshipId> = self
            .adjacency
            .get(memory_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rel) = self.edges.remove(&id) {
                self.unlink(&rel);
                removed.push(rel);
            }
        }
        self.adjacency.remove(memory_id);
        removed
    }

    /// Move the `from` endpoint of an edge to `to`, keeping its evidence.
    pub(crate) fn repoint(
        &mut self,
        id: &RelationshipId,
        from: MemoryId,
        to: MemoryId,
        gain: f64,
        now: DateTime<Utc>,
    ) -> Result<RepointOutcome> {
        let rel = self.get(id)?;
        if !rel.touches(&from) {
            return Err(Error::validation(format!(
                "relationship {} does not touch memory {}",
                id, from
            )));
        }
        let mut moved = rel.clone();
        if moved.source_id == from {
            moved.source_id = to;
        }
        if moved.target_id == from {
            moved.target_id = to;
        }

        let old = self.remove(id)?;
        if moved.source_id == moved.target_id {
            return Ok(RepointOutcome::Dropped);
        }

        if let Some(existing_id) = self.pairs.get(&moved.key()).copied() {
            let existing = self.edges.get_mut(&existing_id).ok_or_else(|| {
                Error::consistency(format!("pair index points at missing edge {}", existing_id))
            })?;
            existing.evidence.extend(old.evidence);
            if existing.context_note.is_none() {
                existing.context_note = old.context_note;
            }
            existing.created_at = existing.created_at.min(old.created_at);
            refresh(existing, gain, now);
            return Ok(RepointOutcome::Merged(existing_id));
        }

        moved.version += 1;
        moved.updated_at = now;
        let new_id = moved.id;
        self.link(moved);
        Ok(RepointOutcome::Moved(new_id))
    }

    /// Insert a fully formed record (snapshot import).
    pub(crate) fn insert_existing(&mut self, rel: Relationship) -> Result<()> {
        check_unit("strength", rel.strength)?;
        check_unit("confidence", rel.confidence)?;
        if rel.source_id == rel.target_id && !rel.rel_type.allows_self_reference() {
            return Err(Error::validation(format!(
                "relationship {} is a self-loop",
                rel.id
            )));
        }
        if rel.evidence_count != rel.evidence.len() as u64 {
            return Err(Error::consistency(format!(
                "relationship {} evidence count {} does not match log length {}",
                rel.id,
                rel.evidence_count,
                rel.evidence.len()
            )));
        }
        if self.edges.contains_key(&rel.id) || self.pairs.contains_key(&rel.key()) {
            return Err(Error::consistency(format!(
                "duplicate relationship {} ({} {} {})",
                rel.id, rel.source_id, rel.rel_type, rel.target_id
            )));
        }
        self.link(rel);
        Ok(())
    }

    fn link(&mut self, rel: Relationship) {
        for end in [rel.source_id, rel.target_id] {
            self.adjacency
                .entry(end)
                .or_insert_with(OrdSet::new)
                .insert(rel.id);
        }
        self.pairs.insert(rel.key(), rel.id);
        self.edges.insert(rel.id, rel);
    }

    fn unlink(&mut self, rel: &Relationship) {
        for end in [rel.source_id, rel.target_id] {
            if let Some(set) = self.adjacency.get_mut(&end) {
                set.remove(&rel.id);
                if set.is_empty() {
                    self.adjacency.remove(&end);
                }
            }
        }
        if self.pairs.get(&rel.key()) == Some(&rel.id) {
            self.pairs.remove(&rel.key());
        }
    }
}

/// Recompute derived fields from the evidence log.
fn refresh(rel: &mut Relationship, gain: f64, now: DateTime<Utc>) {
    let summary = fold_evidence(&rel.evidence, gain);
    rel.strength = summary.strength;
    rel.confidence = summary.confidence;
    rel.evidence_count = rel.evidence.len() as u64;
    rel.counter_evidence_count = summary.contradicting;
    if let Some(latest) = rel.evidence.iter().map(|e| e.observed_at).max() {
        rel.last_validated = latest;
    }
    rel.version += 1;
    rel.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAIN: f64 = 0.2;

    fn ids() -> (MemoryId, MemoryId, MemoryId) {
        (MemoryId::new(), MemoryId::new(), MemoryId::new())
    }

    #[test]
    fn test_create_then_merge() {
        let (s1, p1, _) = ids();
        let mut graph = RelationshipGraph::new();
        let (first, created) = graph
            .create(
                &NewRelationship::new(s1, p1, RelationshipType::Solves)
                    .with_strength(0.8)
                    .with_confidence(0.5),
                GAIN,
                Utc::now(),
            )
            .unwrap();
        assert!(created);
        assert_eq!(first.version, 1);

        let (merged, created) = graph
            .create(
                &NewRelationship::new(s1, p1, RelationshipType::Solves)
                    .with_strength(0.4)
                    .with_confidence(0.5),
                GAIN,
                Utc::now(),
            )
            .unwrap();
        assert!(!created);
        assert_eq!(merged.id, first.id);
        assert_eq!(graph.len(), 1);
        assert!((merged.strength - 0.6).abs() < 1e-9);
        assert_eq!(merged.evidence_count, 2);
        assert!((merged.confidence - 0.6).abs() < 1e-9);
        assert_eq!(merged.version, 2);
    }

    #[test]
    fn test_symmetric_types_merge_across_orientation() {
        let (a, b, _) = ids();
        let mut graph = RelationshipGraph::new();
        graph
            .create(&NewRelationship::new(a, b, RelationshipType::SimilarTo), GAIN, Utc::now())
            .unwrap();
        let (_, created) = graph
            .create(&NewRelationship::new(b, a, RelationshipType::SimilarTo), GAIN, Utc::now())
            .unwrap();
        assert!(!created);
        assert_eq!(graph.len(), 1);

        // Directional types keep both orientations
        graph
            .create(&NewRelationship::new(a, b, RelationshipType::LeadsTo), GAIN, Utc::now())
            .unwrap();
        graph
            .create(&NewRelationship::new(b, a, RelationshipType::LeadsTo), GAIN, Utc::now())
            .unwrap();
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_contradicting_evidence_counts() {
        let (a, b, _) = ids();
        let mut graph = RelationshipGraph::new();
        graph
            .create(&NewRelationship::new(a, b, RelationshipType::Solves), GAIN, Utc::now())
            .unwrap();
        let (rel, _) = graph
            .create(
                &NewRelationship::new(a, b, RelationshipType::Solves).contradicting(),
                GAIN,
                Utc::now(),
            )
            .unwrap();
        assert_eq!(rel.evidence_count, 2);
        assert_eq!(rel.counter_evidence_count, 1);
        assert!(rel.confidence < 0.8);
    }

    #[test]
    fn test_neighbors_and_filters() {
        let (a, b, c) = ids();
        let mut graph = RelationshipGraph::new();
        graph
            .create(
                &NewRelationship::new(a, b, RelationshipType::Solves).with_strength(0.3),
                GAIN,
                Utc::now(),
            )
            .unwrap();
        graph
            .create(
                &NewRelationship::new(c, a, RelationshipType::SimilarTo).with_strength(0.9),
                GAIN,
                Utc::now(),
            )
            .unwrap();

        let all = graph.neighbors(&a, &EdgeFilter::new());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].rel_type, RelationshipType::SimilarTo);

        let similar = graph.neighbors(&a, &EdgeFilter::new().category(RelationshipCategory::Similarity));
        assert_eq!(similar.len(), 1);

        let solves = graph.neighbors(&a, &EdgeFilter::new().types(vec![RelationshipType::Solves]));
        assert_eq!(solves.len(), 1);
        assert_eq!(graph.degree(&a), 2);
        assert!((graph.weighted_degree(&a) - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_cascade_remove() {
        let (a, b, c) = ids();
        let mut graph = RelationshipGraph::new();
        graph
            .create(&NewRelationship::new(a, b, RelationshipType::Solves), GAIN, Utc::now())
            .unwrap();
        graph
            .create(&NewRelationship::new(c, a, RelationshipType::Causes), GAIN, Utc::now())
            .unwrap();
        let (kept, _) = graph
            .create(&NewRelationship::new(b, c, RelationshipType::Follows), GAIN, Utc::now())
            .unwrap();

        let removed = graph.cascade_remove(&a);
        assert_eq!(removed.len(), 2);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.degree(&a), 0);
        assert!(graph.iter().all(|r| !r.touches(&a)));
        assert!(graph.get(&kept.id).is_ok());
        assert!(graph.find(a, b, RelationshipType::Solves).is_none());
    }

    #[test]
    fn test_repoint_moves_merges_and_drops() {
        let (winner, loser, other) = ids();
        let mut graph = RelationshipGraph::new();
        let (moved, _) = graph
            .create(&NewRelationship::new(loser, other, RelationshipType::Causes), GAIN, Utc::now())
            .unwrap();
        let (dup, _) = graph
            .create(&NewRelationship::new(other, loser, RelationshipType::Solves), GAIN, Utc::now())
            .unwrap();
        let (existing, _) = graph
            .create(&NewRelationship::new(other, winner, RelationshipType::Solves), GAIN, Utc::now())
            .unwrap();
        let (self_loop, _) = graph
            .create(&NewRelationship::new(loser, winner, RelationshipType::SimilarTo), GAIN, Utc::now())
            .unwrap();

        assert_eq!(
            graph.repoint(&moved.id, loser, winner, GAIN, Utc::now()).unwrap(),
            RepointOutcome::Moved(moved.id)
        );
        assert_eq!(
            graph.repoint(&dup.id, loser, winner, GAIN, Utc::now()).unwrap(),
            RepointOutcome::Merged(existing.id)
        );
        assert_eq!(
            graph.repoint(&self_loop.id, loser, winner, GAIN, Utc::now()).unwrap(),
            RepointOutcome::Dropped
        );

        assert_eq!(graph.degree(&loser), 0);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.get(&existing.id).unwrap().evidence_count, 2);
        assert!(graph.find(winner, other, RelationshipType::Causes).is_some());
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut graph = RelationshipGraph::new();
        assert!(matches!(
            graph.remove(&RelationshipId::new()),
            Err(Error::NotFound { .. })
        ));
    }
}
