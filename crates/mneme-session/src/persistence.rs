//! Durable hooks decoupling the cache from its backing stores.
//!
//! The cache calls these methods to rebuild cold buffers and to propagate
//! writes; wiring them to the chronological log and semantic index happens
//! in the retrieval layer, so the cache itself has no storage dependency.

use async_trait::async_trait;

use mneme_types::{ChannelKey, MemoryRecord};

use crate::error::Result;

/// Bridge between the cache and the durable stores.
#[async_trait]
pub trait DurableHook: Send + Sync + 'static {
    /// Fetch the most recent records for a channel, newest first, bounded.
    ///
    /// Called on a cache miss or expiry; the caller reverses the result
    /// into chronological order.
    async fn bootstrap(&self, channel: &ChannelKey, limit: usize) -> Result<Vec<MemoryRecord>>;

    /// Persist one record durably. Must be idempotent by record id, since
    /// the cache retries failed write-throughs.
    async fn persist(&self, record: &MemoryRecord) -> Result<()>;
}

/// A no-op hook for in-memory only caching.
#[derive(Debug, Clone, Default)]
pub struct NoDurable;

#[async_trait]
impl DurableHook for NoDurable {
    async fn bootstrap(&self, _channel: &ChannelKey, _limit: usize) -> Result<Vec<MemoryRecord>> {
        Ok(Vec::new())
    }

    async fn persist(&self, _record: &MemoryRecord) -> Result<()> {
        Ok(())
    }
}
