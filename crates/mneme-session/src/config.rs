//! Configuration for the hybrid cache.

use std::time::Duration;

/// Default maximum number of channel buffers to cache.
pub const DEFAULT_MAX_CHANNELS: usize = 10_000;

/// Default TTL for a channel buffer before it must be rebuilt from the log.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default number of recent turns kept per channel.
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// Default number of records fetched from the log on a cold start.
pub const DEFAULT_BOOTSTRAP_LIMIT: usize = 50;

/// Configuration for the hybrid cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of channel buffers before LRU eviction.
    pub max_channels: usize,

    /// Time-to-live for a buffer. Expired buffers are never served; the
    /// next read bootstraps from the chronological log. `None` disables
    /// time-based expiry (buffers still evict by LRU).
    pub ttl: Option<Duration>,

    /// Bound `N` on the number of recent turns kept per channel.
    pub recent_limit: usize,

    /// Bound on the single range query issued to rebuild a cold buffer.
    pub bootstrap_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_channels: DEFAULT_MAX_CHANNELS,
            ttl: Some(DEFAULT_TTL),
            recent_limit: DEFAULT_RECENT_LIMIT,
            bootstrap_limit: DEFAULT_BOOTSTRAP_LIMIT,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of channel buffers.
    pub fn with_max_channels(mut self, max: usize) -> Self {
        self.max_channels = max;
        self
    }

    /// Set the buffer TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Disable time-based expiry.
    pub fn without_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }

    /// Set the per-channel recent turn bound.
    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    /// Set the cold-start bootstrap limit.
    pub fn with_bootstrap_limit(mut self, limit: usize) -> Self {
        self.bootstrap_limit = limit;
        self
    }
}
