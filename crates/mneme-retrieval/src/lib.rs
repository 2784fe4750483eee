//! Retrieval orchestration for the Mneme memory engine.
//!
//! Given an incoming conversational turn, [`RetrievalOrchestrator`]
//! classifies its intent, fans out to the hybrid cache and the durable
//! stores under a latency budget, and returns a [`ContextBundle`] for the
//! response generator. After the response is produced, the caller hands the
//! finished records back through `store()`.
//!
//! ```ignore
//! use mneme_retrieval::{ContextRequest, EngineConfig, RetrievalOrchestrator};
//!
//! let engine = RetrievalOrchestrator::new(config, chronicle, index);
//!
//! let bundle = engine
//!     .assemble_context(&ContextRequest::new("alice", "muse", "general", utterance)
//!         .with_embedding(embedding))
//!     .await?;
//!
//! // ... generate a response from bundle ...
//!
//! engine.store(record).await?;
//! ```

mod bridge;
mod config;
mod error;
mod guard;
mod intent;
mod orchestrator;
mod sequence;
mod summary;

pub use bridge::DurableBridge;
pub use config::{EngineConfig, TemporalScopeMode};
pub use error::{Result, RetrievalError, ValidationError};
pub use guard::ConsistencyGuard;
pub use intent::QueryIntentClassifier;
pub use orchestrator::{ContextRequest, RetrievalOrchestrator};
pub use sequence::SequenceAllocator;
pub use summary::{Summarizer, TruncatingSummarizer};

// Re-export the bundle types callers consume.
pub use mneme_types::{ContextBundle, MemoryRecord, QueryIntent, ScoredMemory};
