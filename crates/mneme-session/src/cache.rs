//! The hybrid fast-path cache over recent turns.
//!
//! Bounded LRU of per-channel buffers with TTL expiry. A cold or expired
//! buffer is rebuilt from the chronological log before anything is served,
//! so the cache can never be the source of stale post-restart context.
//! Writes land in the buffer synchronously (read-your-writes) and propagate
//! to the durable stores asynchronously with bounded retry.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;
use tracing::{debug, error, trace, warn};

use mneme_types::{ChannelKey, MemoryRecord};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::persistence::DurableHook;
use crate::retry::{RetryPolicy, with_retry};
use crate::ttl::TtlTracker;

/// A bounded, chronologically ordered buffer of one channel's recent turns.
#[derive(Debug, Clone, Default)]
pub struct TurnBuffer {
    records: Vec<MemoryRecord>,
}

impl TurnBuffer {
    fn from_chronological(records: Vec<MemoryRecord>) -> Self {
        Self { records }
    }

    /// Insert a record keeping `(timestamp, sequence)` order, replacing any
    /// prior record with the same id.
    fn insert(&mut self, record: MemoryRecord) {
        self.records.retain(|r| r.id != record.id);
        self.records.push(record);
        self.records.sort_by_key(|r| (r.timestamp, r.sequence));
    }

    /// Merge freshly bootstrapped records into this buffer, deduping by id.
    fn merge(&mut self, fetched: Vec<MemoryRecord>) {
        for record in fetched {
            if !self.records.iter().any(|r| r.id == record.id) {
                self.records.push(record);
            }
        }
        self.records.sort_by_key(|r| (r.timestamp, r.sequence));
    }

    fn trim_to(&mut self, limit: usize) {
        if self.records.len() > limit {
            let excess = self.records.len() - limit;
            self.records.drain(..excess);
        }
    }

    /// The newest `limit` records, in chronological order.
    fn tail(&self, limit: usize) -> Vec<MemoryRecord> {
        let start = self.records.len().saturating_sub(limit);
        self.records[start..].to_vec()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Inner state protected by RwLock.
struct CacheInner {
    lru: LruCache<String, TurnBuffer>,
    ttl: TtlTracker,
}

impl CacheInner {
    /// Drop an expired buffer so it can never be served.
    fn evict_if_expired(&mut self, key: &str) {
        if self.ttl.is_expired(key) && self.lru.pop(key).is_some() {
            debug!(channel = %key, "Buffer expired, dropping from cache");
            self.ttl.remove(key);
        }
    }

    /// Insert a buffer, handling LRU eviction of some other channel.
    fn insert(&mut self, key: String, buffer: TurnBuffer) {
        if let Some((evicted_key, _)) = self.lru.push(key.clone(), buffer)
            && evicted_key != key
        {
            debug!(channel = %evicted_key, "Evicting LRU channel buffer");
            self.ttl.remove(&evicted_key);
        }
        self.ttl.touch(&key);
    }
}

/// Hybrid cache: bounded in-memory buffers with durable bootstrap and
/// asynchronous write-through.
///
/// TTL timers reset on writes and rebuilds, not on reads, so an idle
/// channel's buffer ages out and the next read re-syncs with the log.
pub struct HybridCache<H: DurableHook> {
    inner: Arc<RwLock<CacheInner>>,
    hook: Arc<H>,
    config: CacheConfig,
    retry: RetryPolicy,
}

impl<H: DurableHook> HybridCache<H> {
    /// Create a new cache over the given durable hook.
    pub fn new(config: CacheConfig, retry: RetryPolicy, hook: H) -> Self {
        let cap =
            NonZeroUsize::new(config.max_channels).unwrap_or_else(|| NonZeroUsize::new(1).unwrap());

        let inner = CacheInner {
            lru: LruCache::new(cap),
            ttl: TtlTracker::new(config.ttl),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
            hook: Arc::new(hook),
            config,
            retry,
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current number of cached channel buffers.
    pub async fn len(&self) -> usize {
        self.inner.read().await.lru.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.lru.is_empty()
    }

    /// The newest `limit` turns for a channel, in chronological order.
    ///
    /// Serves from the buffer when warm; a miss or expiry triggers one
    /// bounded descending range query against the log, reversed into
    /// chronological order and cached before returning.
    pub async fn get_recent(
        &self,
        channel: &ChannelKey,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let key = channel.to_string();

        {
            let mut inner = self.inner.write().await;
            inner.evict_if_expired(&key);
            if let Some(buffer) = inner.lru.get(&key) {
                trace!(channel = %key, "Buffer hit");
                return Ok(buffer.tail(limit));
            }
        }

        debug!(channel = %key, "Buffer miss, bootstrapping from log");
        let buffer = self.bootstrap(channel).await?;
        Ok(buffer.tail(limit))
    }

    /// Append a turn to its channel buffer and propagate it durably.
    ///
    /// The buffer reflects the record immediately (read-your-writes); the
    /// durable write-through runs in a detached task with bounded retry and
    /// is never cancelled. A cold buffer is bootstrapped first so reads
    /// never see a partial suffix of history.
    pub async fn put(&self, record: MemoryRecord) -> Result<()> {
        let key = record.channel().to_string();

        let appended = {
            let mut inner = self.inner.write().await;
            inner.evict_if_expired(&key);
            match inner.lru.get_mut(&key) {
                Some(buffer) => {
                    buffer.insert(record.clone());
                    buffer.trim_to(self.config.recent_limit);
                    inner.ttl.touch(&key);
                    true
                }
                None => false,
            }
        };

        if !appended {
            // Cold channel: rebuild from the log first, then append. The
            // record is not durable yet, so the bootstrap cannot contain it.
            let chan = record.channel();
            match self.bootstrap(&chan).await {
                Ok(_) => {
                    let mut inner = self.inner.write().await;
                    if let Some(buffer) = inner.lru.get_mut(&key) {
                        buffer.insert(record.clone());
                        buffer.trim_to(self.config.recent_limit);
                    }
                    inner.ttl.touch(&key);
                }
                Err(e) => {
                    // Log unavailable: serve just-happened data anyway.
                    warn!(channel = %key, error = %e, "Bootstrap failed on put, caching record alone");
                    let mut inner = self.inner.write().await;
                    let mut buffer = TurnBuffer::default();
                    buffer.insert(record.clone());
                    inner.insert(key.clone(), buffer);
                }
            }
        }

        self.spawn_write_through(record);
        Ok(())
    }

    /// Drop a channel's buffer, forcing the next read to bootstrap.
    pub async fn invalidate(&self, channel: &ChannelKey) {
        let key = channel.to_string();
        let mut inner = self.inner.write().await;
        inner.ttl.remove(&key);
        if inner.lru.pop(&key).is_some() {
            debug!(channel = %key, "Buffer invalidated");
        }
    }

    /// Cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        CacheStats {
            size: inner.lru.len(),
            capacity: self.config.max_channels,
            ttl_tracked: inner.ttl.len(),
        }
    }

    /// Rebuild a channel's buffer from the log and cache it. Any records
    /// that were put concurrently are merged in, deduped by id.
    async fn bootstrap(&self, channel: &ChannelKey) -> Result<TurnBuffer> {
        let key = channel.to_string();

        let newest_first = with_retry(&self.retry, "chronicle bootstrap", || {
            self.hook.bootstrap(channel, self.config.bootstrap_limit)
        })
        .await?;

        let mut chronological = newest_first;
        chronological.reverse();

        let mut inner = self.inner.write().await;
        let mut buffer = match inner.lru.pop(&key) {
            Some(mut existing) => {
                existing.merge(chronological);
                existing
            }
            None => TurnBuffer::from_chronological(chronological),
        };
        buffer.trim_to(self.config.recent_limit);

        debug!(channel = %key, size = buffer.len(), "Buffer bootstrapped");
        let snapshot = buffer.clone();
        inner.insert(key, buffer);
        Ok(snapshot)
    }

    fn spawn_write_through(&self, record: MemoryRecord) {
        let hook = Arc::clone(&self.hook);
        let retry = self.retry.clone();
        tokio::spawn(async move {
            if let Err(e) = with_retry(&retry, "durable write-through", || hook.persist(&record)).await
            {
                error!(record_id = %record.id, error = %e, "Durable write-through failed after retries");
            }
        });
    }
}

impl<H: DurableHook> Clone for HybridCache<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            hook: Arc::clone(&self.hook),
            config: self.config.clone(),
            retry: self.retry.clone(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Current number of cached channel buffers.
    pub size: usize,

    /// Maximum capacity.
    pub capacity: usize,

    /// Number of channels being tracked for TTL.
    pub ttl_tracked: usize,
}
