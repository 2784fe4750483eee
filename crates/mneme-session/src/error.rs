//! Error types for the session crate.

/// Error type for cache and session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The durable backend behind the cache failed.
    #[error("Durable backend error: {0}")]
    Durable(String),
}

/// Result type for cache and session operations.
pub type Result<T> = std::result::Result<T, Error>;
