//! Memory records and the entity store.
//!
//! A memory is a discrete knowledge record (task, code pattern, problem,
//! solution, project, or technology). Its `kind` never changes; every other
//! mutation bumps `version`, which callers pass back on update for optimistic
//! concurrency.
//!
//! ## Example
//!
//! ```rust,ignore
//! use memgraph_core::memory::{EntityStore, MemoryKind, MemoryPatch, NewMemory};
//!
//! let mut store = EntityStore::new();
//! let problem = store.create(NewMemory::new(MemoryKind::Problem, "build fails"), Utc::now())?;
//!
//! // A stale version is rejected with a Conflict error
//! store.update(&problem.id, problem.version, MemoryPatch::new().importance(0.9), Utc::now())?;
//! ```

mod store;
mod types;

pub use store::EntityStore;
pub use types::{
    normalize_tags, Memory, MemoryContext, MemoryId, MemoryKind, MemoryPatch, MemoryQuery,
    NewMemory, MAX_TITLE_LEN,
};
