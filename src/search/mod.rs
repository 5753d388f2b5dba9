//! Full-text search over memories, boosted by graph centrality and recency.
//!
//! The index is a derived projection of the entity store. Every store
//! mutation path in [`GraphState`](crate::engine::GraphState) calls
//! `index`, `reindex`, or `remove`; nothing polls.

mod index;
mod tokenize;

pub use index::{ScoreBreakdown, ScoredMemory, SearchHit, SearchIndex, SearchQuery};
pub use tokenize::{cosine, memory_terms, tokenize, MIN_TOKEN_LEN};
