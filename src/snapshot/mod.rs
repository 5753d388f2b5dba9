//! Graph export format and pluggable snapshot storage.
//!
//! The engine keeps its state in memory. Durability is an injected concern:
//! anything implementing [`SnapshotStore`] can save and load a
//! [`GraphSnapshot`], which carries every memory and relationship and is
//! enough to rebuild the graph exactly.
//!
//! Record fields serialize in camelCase (`evidenceCount`, `updatedAt`,
//! `sourceId`). Memory kinds are snake_case strings and relationship types
//! SCREAMING_SNAKE strings (`"SOLVES"`).
//!
//! ## Example
//!
//! ```rust,ignore
//! use memgraph_core::snapshot::{SnapshotStore, SqliteSnapshotStore};
//!
//! let store = SqliteSnapshotStore::open("memories.db")?;
//! kg.save_to(&store)?;
//!
//! let restored = KnowledgeGraph::load_from(&store, EngineConfig::default())?;
//! ```

mod schema;
mod sqlite;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteSnapshotStore;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::Relationship;
use crate::memory::Memory;

/// Full graph export: all memories and all relationships, each ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub memories: Vec<Memory>,
    pub relationships: Vec<Relationship>,
}

impl GraphSnapshot {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty() && self.relationships.is_empty()
    }

    /// Restore canonical id order.
    pub fn sort(&mut self) {
        self.memories.sort_by(|a, b| a.id.cmp(&b.id));
        self.relationships.sort_by(|a, b| a.id.cmp(&b.id));
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut snapshot: Self = serde_json::from_str(json)?;
        snapshot.sort();
        Ok(snapshot)
    }
}

/// Storage seam for graph snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot.
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()>;

    /// Load the stored snapshot. An empty store yields an empty snapshot.
    fn load(&self) -> Result<GraphSnapshot>;
}

/// Stores a snapshot as a single JSON document.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()> {
        let json = snapshot.to_json()?;
        // Write beside the target and rename so readers never see a torn file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            Error::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), "Saved snapshot to JSON");
        Ok(())
    }

    fn load(&self) -> Result<GraphSnapshot> {
        if !self.path.exists() {
            return Ok(GraphSnapshot::default());
        }
        let json = fs::read_to_string(&self.path).map_err(|e| {
            Error::Storage(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        GraphSnapshot::from_json(&json)
    }
}
