//! Read-only relationship analysis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::GraphState;
use crate::error::Result;
use crate::intelligence::cooccurrence::{self, CoOccurrenceCandidate};
use crate::intelligence::Intelligence;
use crate::memory::MemoryId;

/// Connectivity of one memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCentrality {
    pub memory_id: MemoryId,
    pub label: String,
    pub degree: usize,
    pub weighted_degree: f64,
}

/// Co-occurrence and centrality summary of the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipAnalysis {
    pub total_memories: usize,
    pub total_relationships: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub average_strength: f64,
    pub average_confidence: f64,
    pub contradicted: usize,
    pub most_connected: Vec<MemoryCentrality>,
    pub co_occurrence: Vec<CoOccurrenceCandidate>,
}

fn most_connected(state: &GraphState, top_n: usize) -> Vec<MemoryCentrality> {
    let mut ranked: Vec<MemoryCentrality> = state
        .entities()
        .iter()
        .map(|m| MemoryCentrality {
            memory_id: m.id,
            label: m.label(),
            degree: state.relationships().degree(&m.id),
            weighted_degree: state.relationships().weighted_degree(&m.id),
        })
        .filter(|c| c.degree > 0)
        .collect();
    ranked.sort_by(|a, b| {
        b.degree
            .cmp(&a.degree)
            .then(b.weighted_degree.total_cmp(&a.weighted_degree))
            .then(a.memory_id.cmp(&b.memory_id))
    });
    ranked.truncate(top_n);
    ranked
}

impl Intelligence<'_> {
    /// Summarize relationship structure without writing anything.
    pub fn analyze_relationships(&self) -> Result<RelationshipAnalysis> {
        let state = self.kg.snapshot()?;
        let config = self.config();
        let stats = state.stats();

        let mut by_type = BTreeMap::new();
        let mut contradicted = 0;
        for rel in state.relationships().iter() {
            *by_type.entry(rel.rel_type.as_str().to_string()).or_insert(0) += 1;
            if rel.counter_evidence_count > 0 {
                contradicted += 1;
            }
        }

        let window = config.co_occurrence_window()?;
        Ok(RelationshipAnalysis {
            total_memories: stats.total_memories,
            total_relationships: stats.total_relationships,
            by_category: stats.relationships_by_category,
            by_type,
            average_strength: stats.average_strength,
            average_confidence: stats.average_confidence,
            contradicted,
            most_connected: most_connected(&state, config.analysis_top_n),
            co_occurrence: cooccurrence::candidates(&state, window, config),
        })
    }
}
