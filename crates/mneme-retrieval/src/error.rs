//! Error taxonomy for the retrieval layer.
//!
//! Only validation errors propagate to the caller: every per-backend
//! failure is recovered locally into a degraded-but-valid bundle, so no
//! per-request error ever leaves the end user without a response.

use thiserror::Error;

pub use mneme_memory::ValidationError;

/// Errors surfaced by the retrieval layer.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Malformed record or query. Rejected immediately; the caller's fault.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A backend was unreachable after bounded retries. Used internally to
    /// mark a branch degraded; not surfaced from `assemble_context`.
    #[error("Backend unavailable ({backend}): {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// The overall latency budget was consumed. Used internally; the caller
    /// sees a partial bundle with `timed_out=true` instead.
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;
