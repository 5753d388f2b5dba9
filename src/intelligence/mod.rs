//! Batch passes that derive knowledge from the graph.
//!
//! Every pass reads a consistent snapshot, decides what to change, and then
//! writes through the same [`KnowledgeGraph`] operations any other caller
//! uses. There is no private state and no bypass: a synthesized relationship
//! goes through `create_relationship` and its merge rule, and a consolidated
//! memory is removed through `delete_memory` and its cascade.
//!
//! Passes can be cancelled between write steps with a [`CancelFlag`]. Each
//! write is consistent on its own, so a cancelled pass leaves a valid graph
//! and can simply be run again. Per-item `NotFound` and `Validation` errors
//! (for example a memory deleted by another caller mid-pass) are logged and
//! skipped.
//!
//! ## Example
//!
//! ```rust,ignore
//! use memgraph_core::intelligence::Intelligence;
//!
//! let intel = Intelligence::new(&kg);
//! let report = intel.consolidate(0.9)?;
//! println!("merged {} pairs in {} rounds", report.merged.len(), report.rounds);
//!
//! for suggestion in intel.suggest_similar_solutions(&problem.id, 5)? {
//!     println!("{:.2} {}", suggestion.score, suggestion.memory.label());
//! }
//! ```

mod analysis;
mod consolidate;
mod cooccurrence;
mod deprecate;
mod effectiveness;
mod similarity;

pub use analysis::{MemoryCentrality, RelationshipAnalysis};
pub use consolidate::{ConsolidationReport, MergedPair};
pub use cooccurrence::{CoOccurrenceCandidate, CoOccurrenceReport};
pub use deprecate::{Deprecation, DeprecationReport, SkippedSolution};
pub use effectiveness::{EffectivenessEstimate, SolutionEffectiveness};
pub use similarity::{SimilarMemory, SolutionSuggestion};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::config::IntelligenceConfig;
use crate::engine::KnowledgeGraph;
use crate::error::{Error, Result};
use crate::memory::{Memory, MemoryKind};

/// Cooperative cancellation for batch passes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Intelligence passes bound to one graph.
#[derive(Debug, Clone)]
pub struct Intelligence<'g> {
    kg: &'g KnowledgeGraph,
    cancel: CancelFlag,
}

impl<'g> Intelligence<'g> {
    pub fn new(kg: &'g KnowledgeGraph) -> Self {
        Self {
            kg,
            cancel: CancelFlag::new(),
        }
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn graph(&self) -> &'g KnowledgeGraph {
        self.kg
    }

    fn config(&self) -> &'g IntelligenceConfig {
        &self.kg.config().intelligence
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Turn a skippable per-item error into `None`, logging it; propagate the rest.
fn skip_item<T>(result: Result<T>, pass: &str, item: &dyn std::fmt::Display) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_skippable() => {
            warn!(pass, item = %item, error = %e, "Skipping item");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn require_kind(memory: &Memory, kind: MemoryKind) -> Result<()> {
    if memory.kind == kind {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "memory {} is a {}, expected {}",
            memory.id, memory.kind, kind
        )))
    }
}
