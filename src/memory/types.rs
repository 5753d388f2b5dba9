//! Type definitions for memory records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum title length after trimming.
pub const MAX_TITLE_LEN: usize = 200;

/// Unique identifier for a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Generate a new random memory ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::validation(format!("invalid memory id '{}': {}", s, e)))
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of knowledge a memory holds. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A unit of work the agent performed
    Task,
    /// A reusable code idiom or snippet
    CodePattern,
    /// Something that went wrong
    Problem,
    /// Something that fixed a problem
    Solution,
    /// A project the agent worked in
    Project,
    /// A language, framework, or tool
    Technology,
}

impl MemoryKind {
    /// All kinds, in declaration order.
    pub const ALL: [MemoryKind; 6] = [
        Self::Task,
        Self::CodePattern,
        Self::Problem,
        Self::Solution,
        Self::Project,
        Self::Technology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::CodePattern => "code_pattern",
            Self::Problem => "problem",
            Self::Solution => "solution",
            Self::Project => "project",
            Self::Technology => "technology",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| Error::validation(format!("unknown memory kind '{}'", s)))
    }
}

/// Structured context tags used for filtering and co-occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryContext {
    pub project: Option<String>,
    pub technologies: Vec<String>,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub files: Vec<String>,
    pub session_id: Option<String>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_technology(mut self, technology: impl Into<String>) -> Self {
        self.technologies.push(technology.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.languages.push(language.into());
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.frameworks.push(framework.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Lowercased technology, language, and framework tags.
    pub fn technology_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .technologies
            .iter()
            .chain(&self.languages)
            .chain(&self.frameworks)
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Lowercased project name, if any.
    pub fn project_key(&self) -> Option<String> {
        self.project
            .as_ref()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
    }

    pub fn matches_project(&self, project: &str) -> bool {
        self.project_key().as_deref() == Some(project.trim().to_lowercase().as_str())
    }

    pub fn matches_technology(&self, technology: &str) -> bool {
        let wanted = technology.trim().to_lowercase();
        self.technology_tags().iter().any(|t| *t == wanted)
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A stored knowledge record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: MemoryId,
    pub kind: MemoryKind,
    pub title: Option<String>,
    pub content: String,
    /// Append-only annotations.
    pub observations: Vec<String>,
    pub context: MemoryContext,
    pub tags: Vec<String>,
    pub importance: f64,
    /// Bumped on every mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Title if present, otherwise a content prefix.
    pub fn label(&self) -> String {
        match self.title {
            Some(ref t) => t.clone(),
            None if self.content.chars().count() > 40 => {
                format!("{}...", self.content.chars().take(40).collect::<String>())
            }
            None => self.content.clone(),
        }
    }
}

/// Input to memory creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemory {
    pub kind: MemoryKind,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub context: MemoryContext,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub importance: Option<f64>,
}

impl NewMemory {
    pub fn new(kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            title: None,
            context: MemoryContext::default(),
            tags: Vec::new(),
            importance: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_context(mut self, context: MemoryContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }
}

/// Field changes applied by an update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub context: Option<MemoryContext>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<f64>,
}

impl MemoryPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn context(mut self, context: MemoryContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Filter for listing memories.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub kinds: Option<Vec<MemoryKind>>,
    pub tags: Option<Vec<String>>,
    pub project: Option<String>,
    pub min_importance: Option<f64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MemoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: Vec<MemoryKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(normalize_tags(&tags));
        self
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn min_importance(mut self, min: f64) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn created_between(mut self, after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.created_after = Some(after);
        self.created_before = Some(before);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check whether a memory passes every filter.
    pub fn matches(&self, memory: &Memory) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&memory.kind) {
                return false;
            }
        }
        if let Some(ref tags) = self.tags {
            if !tags.iter().any(|t| memory.tags.contains(t)) {
                return false;
            }
        }
        if let Some(ref project) = self.project {
            if !memory.context.matches_project(project) {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if memory.importance < min {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if memory.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if memory.created_at > before {
                return false;
            }
        }
        true
    }
}

/// Lowercase, trim, drop empties, and dedupe tags keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

pub(crate) fn validate_content(content: &str) -> Result<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::validation("memory content must not be empty"));
    }
    Ok(content.to_string())
}

pub(crate) fn validate_title(title: &str) -> Result<Option<String>> {
    let title = title.trim();
    if title.is_empty() {
        return Ok(None);
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::validation(format!(
            "memory title exceeds {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(Some(title.to_string()))
}

pub(crate) fn validate_importance(importance: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&importance) {
        return Err(Error::validation(format!(
            "importance must be in [0, 1], got {}",
            importance
        )));
    }
    Ok(importance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_round_trip() {
        for kind in MemoryKind::ALL {
            assert_eq!(kind.as_str().parse::<MemoryKind>().unwrap(), kind);
        }
        assert_eq!(" Solution ".parse::<MemoryKind>().unwrap(), MemoryKind::Solution);
    }

    #[test]
    fn test_unknown_kind_is_validation_error() {
        let err = "workflow".parse::<MemoryKind>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            " Rust ".to_string(),
            "".to_string(),
            "rust".to_string(),
            "CI".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["rust", "ci"]);
    }

    #[test]
    fn test_context_matching_is_case_insensitive() {
        let ctx = MemoryContext::new()
            .with_project("Billing")
            .with_language("Rust")
            .with_framework("Axum");
        assert!(ctx.matches_project("billing"));
        assert!(ctx.matches_technology("rust"));
        assert!(ctx.matches_technology("AXUM"));
        assert!(!ctx.matches_technology("python"));
        assert_eq!(ctx.technology_tags(), vec!["axum", "rust"]);
    }

    #[test]
    fn test_validate_title() {
        assert_eq!(validate_title("  ").unwrap(), None);
        assert_eq!(validate_title(" Fix ").unwrap(), Some("Fix".to_string()));
        assert!(validate_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn test_memory_id_parse() {
        let id = MemoryId::new();
        assert_eq!(MemoryId::parse(&id.to_string()).unwrap(), id);
        assert!(MemoryId::parse("not-a-uuid").is_err());
    }
}
