//! Tunable engine configuration.
//!
//! Every constant that shapes scoring or evidence accumulation lives here with
//! a documented default. Configs deserialize from JSON with missing fields
//! falling back to defaults.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration for a [`KnowledgeGraph`](crate::KnowledgeGraph).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub evidence: EvidenceConfig,
    pub graph: GraphConfig,
    pub search: SearchConfig,
    pub intelligence: IntelligenceConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Slow-moving configuration: confidence grows cautiously and only very
    /// close duplicates are consolidated.
    pub fn conservative() -> Self {
        Self {
            evidence: EvidenceConfig {
                confidence_gain: 0.1,
            },
            intelligence: IntelligenceConfig {
                consolidation_threshold: 0.95,
                co_occurrence_support: 0.5,
                min_alternative_similarity: 0.4,
                ..IntelligenceConfig::default()
            },
            ..Self::default()
        }
    }

    /// Fast-moving configuration for small, rapidly changing graphs.
    pub fn aggressive() -> Self {
        Self {
            evidence: EvidenceConfig {
                confidence_gain: 0.35,
            },
            intelligence: IntelligenceConfig {
                consolidation_threshold: 0.7,
                co_occurrence_support: 0.2,
                min_alternative_similarity: 0.15,
                effectiveness_half_life_days: 7.0,
                ..IntelligenceConfig::default()
            },
            ..Self::default()
        }
    }

    /// Check that every parameter is inside its meaningful range.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::Config(format!("{} must be in [0, 1], got {}", name, v)))
            }
        };
        let positive = |name: &str, v: f64| -> Result<()> {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(Error::Config(format!("{} must be positive, got {}", name, v)))
            }
        };

        let e = &self.evidence;
        if !(e.confidence_gain > 0.0 && e.confidence_gain < 1.0) {
            return Err(Error::Config(format!(
                "evidence.confidence_gain must be in (0, 1), got {}",
                e.confidence_gain
            )));
        }

        let g = &self.graph;
        if g.max_traversal_depth == 0 || g.max_path_hops == 0 {
            return Err(Error::Config(
                "graph depth and hop limits must be at least 1".to_string(),
            ));
        }

        let s = &self.search;
        unit("search.text_weight", s.text_weight)?;
        unit("search.centrality_weight", s.centrality_weight)?;
        unit("search.recency_weight", s.recency_weight)?;
        positive("search.recency_half_life_days", s.recency_half_life_days)?;
        if s.degree_cap == 0 {
            return Err(Error::Config("search.degree_cap must be at least 1".to_string()));
        }
        if s.default_limit == 0 || s.default_limit > s.max_limit {
            return Err(Error::Config(format!(
                "search.default_limit must be in 1..={}, got {}",
                s.max_limit, s.default_limit
            )));
        }

        let i = &self.intelligence;
        positive(
            "intelligence.effectiveness_half_life_days",
            i.effectiveness_half_life_days,
        )?;
        unit("intelligence.neutral_effectiveness", i.neutral_effectiveness)?;
        unit("intelligence.co_occurrence_support", i.co_occurrence_support)?;
        positive(
            "intelligence.co_occurrence_window_days",
            i.co_occurrence_window_days,
        )?;
        i.co_occurrence_window()?;
        unit("intelligence.inferred_strength_floor", i.inferred_strength_floor)?;
        unit("intelligence.inferred_confidence", i.inferred_confidence)?;
        unit("intelligence.consolidation_threshold", i.consolidation_threshold)?;
        unit("intelligence.structural_weight", i.structural_weight)?;
        unit("intelligence.similarity_bonus_direct", i.similarity_bonus_direct)?;
        unit("intelligence.similarity_bonus_indirect", i.similarity_bonus_indirect)?;
        unit("intelligence.min_alternative_similarity", i.min_alternative_similarity)?;
        if i.max_consolidation_rounds == 0 {
            return Err(Error::Config(
                "intelligence.max_consolidation_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of the evidence-update rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Gain `k` applied per corroborating (or contradicting) observation.
    pub confidence_gain: f64,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            confidence_gain: 0.2,
        }
    }
}

/// Bounds on graph exploration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Requested traversal depths are clamped to this value.
    pub max_traversal_depth: usize,
    /// Shortest-path search horizon in hops.
    pub max_path_hops: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_traversal_depth: 5,
            max_path_hops: 6,
        }
    }
}

/// Search ranking weights and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub text_weight: f64,
    pub centrality_weight: f64,
    pub recency_weight: f64,
    /// Degree at which the centrality boost saturates.
    pub degree_cap: usize,
    pub recency_half_life_days: f64,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            text_weight: 0.7,
            centrality_weight: 0.15,
            recency_weight: 0.15,
            degree_cap: 10,
            recency_half_life_days: 30.0,
            default_limit: 20,
            max_limit: 100,
        }
    }
}

/// Parameters of the batch intelligence passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelligenceConfig {
    /// Half-life applied to evidence age when computing effectiveness.
    pub effectiveness_half_life_days: f64,
    /// Effectiveness reported for a solution with no evidence.
    pub neutral_effectiveness: f64,
    /// Minimum support for a co-occurring problem/solution pair.
    pub co_occurrence_support: f64,
    /// Largest gap between the last updates of a co-occurring pair.
    pub co_occurrence_window_days: f64,
    /// Lower bound on the strength of a synthesized relationship.
    pub inferred_strength_floor: f64,
    /// Confidence supplied with each synthesized observation.
    pub inferred_confidence: f64,
    /// Default `consolidate` threshold.
    pub consolidation_threshold: f64,
    /// Share of structural (neighbor overlap) similarity in consolidation.
    pub structural_weight: f64,
    /// Fixpoint iterations allowed in a single consolidation call.
    pub max_consolidation_rounds: usize,
    /// Bonus for a direct Similarity-category neighbor in `find_similar`.
    pub similarity_bonus_direct: f64,
    /// Bonus for a Similarity-category neighbor at depth 2.
    pub similarity_bonus_indirect: f64,
    /// Minimum similarity of a deprecation target.
    pub min_alternative_similarity: f64,
    /// Number of alternatives considered when deprecating.
    pub alternative_pool: usize,
    /// Most-connected memories reported by relationship analysis.
    pub analysis_top_n: usize,
}

impl IntelligenceConfig {
    /// `co_occurrence_window_days` as a duration. Fails if it does not fit.
    pub fn co_occurrence_window(&self) -> Result<Duration> {
        let secs = self.co_occurrence_window_days * 86_400.0;
        if !(secs.is_finite() && secs >= 0.0) {
            return Err(Error::Config(format!(
                "intelligence.co_occurrence_window_days out of range: {}",
                self.co_occurrence_window_days
            )));
        }
        Duration::try_seconds(secs as i64).ok_or_else(|| {
            Error::Config(format!(
                "intelligence.co_occurrence_window_days out of range: {}",
                self.co_occurrence_window_days
            ))
        })
    }
}

impl Default for IntelligenceConfig {
    fn default() -> Self {
        Self {
            effectiveness_half_life_days: 30.0,
            neutral_effectiveness: 0.5,
            co_occurrence_support: 0.3,
            co_occurrence_window_days: 30.0,
            inferred_strength_floor: 0.1,
            inferred_confidence: 0.3,
            consolidation_threshold: 0.85,
            structural_weight: 0.3,
            max_consolidation_rounds: 16,
            similarity_bonus_direct: 0.3,
            similarity_bonus_indirect: 0.15,
            min_alternative_similarity: 0.25,
            alternative_pool: 10,
            analysis_top_n: 10,
        }
    }
}
