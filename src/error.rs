//! Error types for memgraph-core.

use thiserror::Error;

/// Result type alias using memgraph-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during knowledge graph operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A referenced memory or relationship does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Malformed kind, type, bounds, or a forbidden self-loop
    #[error("Validation error: {0}")]
    Validation(String),

    /// Optimistic concurrency check failed
    #[error("Version conflict on memory {id}: expected {expected}, found {actual}")]
    Conflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    /// A cascade or merge invariant was violated. Never expected in normal operation.
    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// Snapshot storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not-found error for a memory.
    pub fn memory_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "memory",
            id: id.to_string(),
        }
    }

    /// Create a not-found error for a relationship.
    pub fn relationship_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "relationship",
            id: id.to_string(),
        }
    }

    /// Create a not-found error for a path query with no route.
    pub fn path_not_found(from: impl ToString, to: impl ToString) -> Self {
        Self::NotFound {
            entity: "path",
            id: format!("{} -> {}", from.to_string(), to.to_string()),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a version conflict error.
    pub fn conflict(id: impl ToString, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            id: id.to_string(),
            expected,
            actual,
        }
    }

    /// Create a consistency error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency(message.into())
    }

    /// Whether the caller can recover by re-reading and retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether a batch pass may skip the failing item and continue.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Validation(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
