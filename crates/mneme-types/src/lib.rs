//! Shared types for the Mneme memory engine.
//!
//! This crate defines the data model passed between the engine's components:
//! memory records, owner/channel keys, classified query intents, and the
//! context bundle returned to the response-generation layer.

pub mod bundle;
pub mod intent;
pub mod record;

pub use bundle::{ContextBundle, ScoredMemory};
pub use intent::{IntentKind, QueryIntent, QueryScope};
pub use record::{ChannelKey, MemoryKind, MemoryRecord, Metadata, OwnerKey, Role};

/// Unique identifier used across the engine.
pub type Id = uuid::Uuid;

/// Wall-clock timestamp used across the engine.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a new unique identifier.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4()
}

/// Current wall-clock time.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}
