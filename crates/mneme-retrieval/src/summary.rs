//! The optional summarizer collaborator.
//!
//! The real summarizer lives outside the engine (usually an LLM call); the
//! contract is ordered records in, bounded-length string out, with
//! deterministic truncation. A deterministic transcript summarizer ships
//! in-tree for tests and degraded operation.

use async_trait::async_trait;

use mneme_types::MemoryRecord;

/// Produces a bounded summary of ordered records.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `records` (chronological order) into at most `max_len`
    /// characters. Must be deterministic for the same input.
    async fn summarize(&self, records: &[MemoryRecord], max_len: usize) -> String;
}

/// Deterministic transcript summarizer: formats turns oldest-first and
/// truncates on a character boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncatingSummarizer;

#[async_trait]
impl Summarizer for TruncatingSummarizer {
    async fn summarize(&self, records: &[MemoryRecord], max_len: usize) -> String {
        let transcript = records
            .iter()
            .map(|r| format!("{}: {}", r.role.as_str(), r.content))
            .collect::<Vec<_>>()
            .join("\n");

        truncate_chars(&transcript, max_len)
    }
}

/// Truncate to `max_len` characters, never splitting a code point.
fn truncate_chars(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    s.chars().take(max_len).collect()
}
