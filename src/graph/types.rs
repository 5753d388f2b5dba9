//! Type definitions for typed, weighted relationships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::memory::MemoryId;

/// Unique identifier for a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(pub Uuid);

impl RelationshipId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::validation(format!("invalid relationship id '{}': {}", s, e)))
    }
}

impl Default for RelationshipId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Grouping of relationship types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipCategory {
    Causal,
    Solution,
    Context,
    Learning,
    Similarity,
    Workflow,
    Quality,
}

impl RelationshipCategory {
    pub const ALL: [RelationshipCategory; 7] = [
        Self::Causal,
        Self::Solution,
        Self::Context,
        Self::Learning,
        Self::Similarity,
        Self::Workflow,
        Self::Quality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Causal => "causal",
            Self::Solution => "solution",
            Self::Context => "context",
            Self::Learning => "learning",
            Self::Similarity => "similarity",
            Self::Workflow => "workflow",
            Self::Quality => "quality",
        }
    }

    /// Types belonging to this category.
    pub fn types(&self) -> impl Iterator<Item = RelationshipType> + '_ {
        RelationshipType::ALL
            .into_iter()
            .filter(move |t| t.category() == *self)
    }
}

impl std::fmt::Display for RelationshipCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| Error::validation(format!("unknown relationship category '{}'", s)))
    }
}

/// The closed set of relationship types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    // Causal
    Causes,
    Triggers,
    LeadsTo,
    Prevents,
    Breaks,
    // Solution
    Solves,
    Addresses,
    AlternativeTo,
    Improves,
    Replaces,
    // Context
    OccursIn,
    AppliesTo,
    WorksWith,
    Requires,
    UsedIn,
    // Learning
    BuildsOn,
    Contradicts,
    Confirms,
    Generalizes,
    Specializes,
    // Similarity
    SimilarTo,
    VariantOf,
    RelatedTo,
    AnalogyTo,
    OppositeOf,
    // Workflow
    Follows,
    DependsOn,
    Enables,
    Blocks,
    ParallelTo,
    // Quality
    EffectiveFor,
    IneffectiveFor,
    PreferredOver,
    DeprecatedBy,
    ValidatedBy,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 35] = [
        Self::Causes,
        Self::Triggers,
        Self::LeadsTo,
        Self::Prevents,
        Self::Breaks,
        Self::Solves,
        Self::Addresses,
        Self::AlternativeTo,
        Self::Improves,
        Self::Replaces,
        Self::OccursIn,
        Self::AppliesTo,
        Self::WorksWith,
        Self::Requires,
        Self::UsedIn,
        Self::BuildsOn,
        Self::Contradicts,
        Self::Confirms,
        Self::Generalizes,
        Self::Specializes,
        Self::SimilarTo,
        Self::VariantOf,
        Self::RelatedTo,
        Self::AnalogyTo,
        Self::OppositeOf,
        Self::Follows,
        Self::DependsOn,
        Self::Enables,
        Self::Blocks,
        Self::ParallelTo,
        Self::EffectiveFor,
        Self::IneffectiveFor,
        Self::PreferredOver,
        Self::DeprecatedBy,
        Self::ValidatedBy,
    ];

    pub fn category(&self) -> RelationshipCategory {
        use RelationshipCategory as C;
        match self {
            Self::Causes | Self::Triggers | Self::LeadsTo | Self::Prevents | Self::Breaks => {
                C::Causal
            }
            Self::Solves
            | Self::Addresses
            | Self::AlternativeTo
            | Self::Improves
            | Self::Replaces => C::Solution,
            Self::OccursIn | Self::AppliesTo | Self::WorksWith | Self::Requires | Self::UsedIn => {
                C::Context
            }
            Self::BuildsOn
            | Self::Contradicts
            | Self::Confirms
            | Self::Generalizes
            | Self::Specializes => C::Learning,
            Self::SimilarTo
            | Self::VariantOf
            | Self::RelatedTo
            | Self::AnalogyTo
            | Self::OppositeOf => C::Similarity,
            Self::Follows | Self::DependsOn | Self::Enables | Self::Blocks | Self::ParallelTo => {
                C::Workflow
            }
            Self::EffectiveFor
            | Self::IneffectiveFor
            | Self::PreferredOver
            | Self::DeprecatedBy
            | Self::ValidatedBy => C::Quality,
        }
    }

    /// Symmetric types are stored once and match either orientation.
    pub fn is_symmetric(&self) -> bool {
        matches!(
            self,
            Self::SimilarTo
                | Self::RelatedTo
                | Self::AnalogyTo
                | Self::OppositeOf
                | Self::Contradicts
        )
    }

    /// Evidence on these types counts against the source's effectiveness.
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            Self::IneffectiveFor | Self::Breaks | Self::DeprecatedBy
        )
    }

    /// No type permits self-reference.
    pub fn allows_self_reference(&self) -> bool {
        false
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Causes => "CAUSES",
            Self::Triggers => "TRIGGERS",
            Self::LeadsTo => "LEADS_TO",
            Self::Prevents => "PREVENTS",
            Self::Breaks => "BREAKS",
            Self::Solves => "SOLVES",
            Self::Addresses => "ADDRESSES",
            Self::AlternativeTo => "ALTERNATIVE_TO",
            Self::Improves => "IMPROVES",
            Self::Replaces => "REPLACES",
            Self::OccursIn => "OCCURS_IN",
            Self::AppliesTo => "APPLIES_TO",
            Self::WorksWith => "WORKS_WITH",
            Self::Requires => "REQUIRES",
            Self::UsedIn => "USED_IN",
            Self::BuildsOn => "BUILDS_ON",
            Self::Contradicts => "CONTRADICTS",
            Self::Confirms => "CONFIRMS",
            Self::Generalizes => "GENERALIZES",
            Self::Specializes => "SPECIALIZES",
            Self::SimilarTo => "SIMILAR_TO",
            Self::VariantOf => "VARIANT_OF",
            Self::RelatedTo => "RELATED_TO",
            Self::AnalogyTo => "ANALOGY_TO",
            Self::OppositeOf => "OPPOSITE_OF",
            Self::Follows => "FOLLOWS",
            Self::DependsOn => "DEPENDS_ON",
            Self::Enables => "ENABLES",
            Self::Blocks => "BLOCKS",
            Self::ParallelTo => "PARALLEL_TO",
            Self::EffectiveFor => "EFFECTIVE_FOR",
            Self::IneffectiveFor => "INEFFECTIVE_FOR",
            Self::PreferredOver => "PREFERRED_OVER",
            Self::DeprecatedBy => "DEPRECATED_BY",
            Self::ValidatedBy => "VALIDATED_BY",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| Error::validation(format!("unknown relationship type '{}'", s)))
    }
}

/// Whether an observation corroborates or contradicts a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidencePolarity {
    Supporting,
    Contradicting,
}

/// One observation contributing to a relationship's strength and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub polarity: EvidencePolarity,
    pub strength: f64,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

impl Evidence {
    pub fn supporting(strength: f64, confidence: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            polarity: EvidencePolarity::Supporting,
            strength,
            confidence,
            observed_at,
        }
    }

    pub fn contradicting(strength: f64, confidence: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            polarity: EvidencePolarity::Contradicting,
            strength,
            confidence,
            observed_at,
        }
    }

    pub fn is_supporting(&self) -> bool {
        self.polarity == EvidencePolarity::Supporting
    }
}

/// A typed, weighted edge between two memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: RelationshipId,
    pub source_id: MemoryId,
    pub target_id: MemoryId,
    #[serde(rename = "type")]
    pub rel_type: RelationshipType,
    pub strength: f64,
    pub confidence: f64,
    pub evidence_count: u64,
    pub counter_evidence_count: u64,
    pub context_note: Option<String>,
    /// Bumped on every merge or re-point.
    pub version: u64,
    /// Ordered observation log; `strength` and `confidence` derive from it.
    pub evidence: Vec<Evidence>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_validated: DateTime<Utc>,
}

impl Relationship {
    pub fn category(&self) -> RelationshipCategory {
        self.rel_type.category()
    }

    /// Whether the edge touches `memory_id`.
    pub fn touches(&self, memory_id: &MemoryId) -> bool {
        &self.source_id == memory_id || &self.target_id == memory_id
    }

    /// The endpoint opposite `memory_id`, if the edge touches it.
    pub fn other_end(&self, memory_id: &MemoryId) -> Option<MemoryId> {
        if &self.source_id == memory_id {
            Some(self.target_id)
        } else if &self.target_id == memory_id {
            Some(self.source_id)
        } else {
            None
        }
    }

    pub(crate) fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source_id, self.target_id, self.rel_type)
    }
}

/// Input to relationship creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRelationship {
    pub source_id: MemoryId,
    pub target_id: MemoryId,
    #[serde(rename = "type")]
    pub rel_type: RelationshipType,
    pub strength: f64,
    pub confidence: f64,
    #[serde(default)]
    pub context_note: Option<String>,
    #[serde(default = "default_polarity")]
    pub polarity: EvidencePolarity,
    /// When the evidence was observed; defaults to the time of the call.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

fn default_polarity() -> EvidencePolarity {
    EvidencePolarity::Supporting
}

impl NewRelationship {
    pub fn new(source_id: MemoryId, target_id: MemoryId, rel_type: RelationshipType) -> Self {
        Self {
            source_id,
            target_id,
            rel_type,
            strength: 0.5,
            confidence: 0.8,
            context_note: None,
            polarity: EvidencePolarity::Supporting,
            observed_at: None,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.context_note = Some(note.into());
        self
    }

    pub fn contradicting(mut self) -> Self {
        self.polarity = EvidencePolarity::Contradicting;
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }

    /// Check bounds and the self-reference rule.
    pub fn validate(&self) -> Result<()> {
        check_unit("strength", self.strength)?;
        check_unit("confidence", self.confidence)?;
        if self.source_id == self.target_id && !self.rel_type.allows_self_reference() {
            return Err(Error::validation(format!(
                "{} does not permit self-reference on {}",
                self.rel_type, self.source_id
            )));
        }
        Ok(())
    }

    pub(crate) fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source_id, self.target_id, self.rel_type)
    }
}

pub(crate) fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{} must be in [0, 1], got {}",
            name, value
        )))
    }
}

/// Effective identity of an edge: symmetric types normalize endpoint order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EdgeKey {
    a: MemoryId,
    b: MemoryId,
    rel_type: RelationshipType,
}

impl EdgeKey {
    pub(crate) fn new(source: MemoryId, target: MemoryId, rel_type: RelationshipType) -> Self {
        if rel_type.is_symmetric() && target < source {
            Self {
                a: target,
                b: source,
                rel_type,
            }
        } else {
            Self {
                a: source,
                b: target,
                rel_type,
            }
        }
    }
}
