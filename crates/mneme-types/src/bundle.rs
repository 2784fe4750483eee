//! The per-request context bundle returned to the caller.

use serde::{Deserialize, Serialize};

use crate::intent::QueryIntent;
use crate::record::MemoryRecord;

/// A semantic match with its scoring components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    /// Raw vector similarity (0.0-1.0, higher = more similar).
    pub similarity: f32,
    /// Blended score: `similarity * recency_decay(age)`.
    pub score: f32,
}

/// Everything the response generator needs for one turn.
///
/// A bundle is always returned, even degraded: `complete=false` marks that a
/// backend was skipped due to unavailability or deadline, and `timed_out`
/// that the overall budget was hit. Absence of data is an empty bundle,
/// never an error surfaced to the end user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Recent turns in chronological order.
    pub recent: Vec<MemoryRecord>,
    /// Ranked semantic candidates (empty for temporal intents).
    pub semantic: Vec<ScoredMemory>,
    /// Optional condensed summary of older context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// The intent this bundle was assembled for.
    pub intent: QueryIntent,
    /// True if the overall deadline was hit before all backends answered.
    pub timed_out: bool,
    /// False if any backend was skipped (unavailable or out of budget).
    pub complete: bool,
}

impl ContextBundle {
    /// An empty bundle for the given intent.
    pub fn empty(intent: QueryIntent) -> Self {
        Self {
            recent: Vec::new(),
            semantic: Vec::new(),
            summary: None,
            intent,
            timed_out: false,
            complete: true,
        }
    }

    /// Whether the bundle carries no records at all.
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty() && self.semantic.is_empty()
    }
}
