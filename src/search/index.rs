//! Inverted index over memory text with graph-aware ranking.

use chrono::{DateTime, Utc};
use im::{OrdMap, OrdSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::SearchConfig;
use crate::graph::RelationshipGraph;
use crate::memory::{normalize_tags, Memory, MemoryContext, MemoryId, MemoryKind};
use crate::search::tokenize::{cosine, memory_terms, tokenize};

/// Search request: free text plus filters applied before scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub text: String,
    pub kinds: Option<Vec<MemoryKind>>,
    pub project: Option<String>,
    pub technology: Option<String>,
    pub tags: Option<Vec<String>>,
    pub min_importance: Option<f64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn kinds(mut self, kinds: Vec<MemoryKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn technology(mut self, technology: impl Into<String>) -> Self {
        self.technology = Some(technology.into());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(normalize_tags(&tags));
        self
    }

    pub fn min_importance(mut self, min: f64) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn created_after(mut self, after: DateTime<Utc>) -> Self {
        self.created_after = Some(after);
        self
    }

    pub fn created_before(mut self, before: DateTime<Utc>) -> Self {
        self.created_before = Some(before);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Components of a composite search score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub text: f64,
    pub centrality: f64,
    pub recency: f64,
    pub total: f64,
}

/// A ranked search result id with its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredMemory {
    pub id: MemoryId,
    pub score: ScoreBreakdown,
}

/// A ranked search result resolved to its memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub memory: Memory,
    pub score: ScoreBreakdown,
}

#[derive(Debug, Clone)]
struct IndexedDoc {
    kind: MemoryKind,
    context: MemoryContext,
    tags: Vec<String>,
    importance: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    terms: HashMap<String, u32>,
    length: u32,
}

impl IndexedDoc {
    fn passes(&self, query: &SearchQuery) -> bool {
        if let Some(ref kinds) = query.kinds {
            if !kinds.contains(&self.kind) {
                return false;
            }
        }
        if let Some(ref project) = query.project {
            if !self.context.matches_project(project) {
                return false;
            }
        }
        if let Some(ref technology) = query.technology {
            if !self.context.matches_technology(technology) {
                return false;
            }
        }
        if let Some(ref tags) = query.tags {
            if !tags.iter().any(|t| self.tags.contains(t)) {
                return false;
            }
        }
        if let Some(min) = query.min_importance {
            if self.importance < min {
                return false;
            }
        }
        if let Some(after) = query.created_after {
            if self.created_at < after {
                return false;
            }
        }
        if let Some(before) = query.created_before {
            if self.created_at > before {
                return false;
            }
        }
        true
    }
}

/// Derived, queryable projection of the entity store.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    docs: OrdMap<MemoryId, IndexedDoc>,
    postings: im::HashMap<String, OrdSet<MemoryId>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, id: &MemoryId) -> bool {
        self.docs.contains_key(id)
    }

    /// Add a memory. Re-adding an indexed memory replaces its entry.
    pub fn index(&mut self, memory: &Memory) {
        self.remove(&memory.id);
        let terms = memory_terms(memory);
        for term in terms.keys() {
            self.postings
                .entry(term.clone())
                .or_insert_with(OrdSet::new)
                .insert(memory.id);
        }
        let length = terms.values().sum();
        self.docs.insert(
            memory.id,
            IndexedDoc {
                kind: memory.kind,
                context: memory.context.clone(),
                tags: memory.tags.clone(),
                importance: memory.importance,
                created_at: memory.created_at,
                updated_at: memory.updated_at,
                terms,
                length,
            },
        );
    }

    /// Refresh the entry of a mutated memory.
    pub fn reindex(&mut self, memory: &Memory) {
        self.index(memory);
    }

    /// Drop a memory from the index.
    pub fn remove(&mut self, id: &MemoryId) {
        let Some(doc) = self.docs.remove(id) else {
            return;
        };
        for term in doc.terms.keys() {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }

    /// Rank memories for a query.
    ///
    /// Ordering is by composite score descending, then `updated_at`
    /// descending, then id ascending. Recency is measured against the newest
    /// indexed update, so identical state always ranks identically.
    pub fn search(
        &self,
        query: &SearchQuery,
        graph: &RelationshipGraph,
        config: &SearchConfig,
    ) -> Vec<ScoredMemory> {
        let query_terms: BTreeSet<String> = tokenize(&query.text).into_iter().collect();
        let limit = query
            .limit
            .unwrap_or(config.default_limit)
            .clamp(1, config.max_limit);
        let reference = self.docs.values().map(|d| d.updated_at).max();

        let candidates: Vec<MemoryId> = if query_terms.is_empty() {
            self.docs.keys().copied().collect()
        } else {
            let mut ids: BTreeSet<MemoryId> = BTreeSet::new();
            for term in &query_terms {
                if let Some(posting) = self.postings.get(term) {
                    ids.extend(posting.iter().copied());
                }
            }
            ids.into_iter().collect()
        };

        let mut scored: Vec<(ScoredMemory, DateTime<Utc>)> = candidates
            .into_iter()
            .filter_map(|id| {
                let doc = self.docs.get(&id)?;
                if !doc.passes(query) {
                    return None;
                }
                let text = text_score(&query_terms, doc);
                if !query_terms.is_empty() && text <= 0.0 {
                    return None;
                }
                let centrality = graph.degree(&id).min(config.degree_cap) as f64
                    / config.degree_cap as f64;
                let recency = reference.map_or(1.0, |r| {
                    let age_days = (r - doc.updated_at).num_seconds().max(0) as f64 / 86_400.0;
                    0.5f64.powf(age_days / config.recency_half_life_days)
                });
                let total = config.text_weight * text
                    + config.centrality_weight * centrality
                    + config.recency_weight * recency;
                Some((
                    ScoredMemory {
                        id,
                        score: ScoreBreakdown {
                            text,
                            centrality,
                            recency,
                            total,
                        },
                    },
                    doc.updated_at,
                ))
            })
            .collect();

        scored.sort_by(|(a, a_updated), (b, b_updated)| {
            b.score
                .total
                .total_cmp(&a.score.total)
                .then(b_updated.cmp(a_updated))
                .then(a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        scored.into_iter().map(|(s, _)| s).collect()
    }

    /// Cosine similarity between two indexed memories.
    pub fn similarity(&self, a: &MemoryId, b: &MemoryId) -> f64 {
        match (self.docs.get(a), self.docs.get(b)) {
            (Some(x), Some(y)) => cosine(&x.terms, &y.terms),
            _ => 0.0,
        }
    }

    /// Memories sharing at least one term with `id`, with their similarity,
    /// most similar first, then by id.
    pub fn similar_to(&self, id: &MemoryId) -> Vec<(MemoryId, f64)> {
        let Some(doc) = self.docs.get(id) else {
            return Vec::new();
        };
        let mut seen: HashSet<MemoryId> = HashSet::new();
        for term in doc.terms.keys() {
            if let Some(posting) = self.postings.get(term) {
                seen.extend(posting.iter().copied().filter(|other| other != id));
            }
        }
        let mut out: Vec<(MemoryId, f64)> = seen
            .into_iter()
            .filter_map(|other| {
                let sim = self.similarity(id, &other);
                (sim > 0.0).then_some((other, sim))
            })
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        out
    }
}

fn text_score(query_terms: &BTreeSet<String>, doc: &IndexedDoc) -> f64 {
    if query_terms.is_empty() || doc.length == 0 {
        return 0.0;
    }
    let mut matched = 0usize;
    let mut occurrences = 0u32;
    for term in query_terms {
        if let Some(tf) = doc.terms.get(term) {
            matched += 1;
            occurrences += tf;
        }
    }
    let coverage = matched as f64 / query_terms.len() as f64;
    let density = f64::from(occurrences) / f64::from(doc.length);
    0.8 * coverage + 0.2 * density
}
