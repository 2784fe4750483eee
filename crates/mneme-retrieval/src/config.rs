//! Engine configuration.
//!
//! Passed as a struct at construction; no dynamic reload.

use std::time::Duration;

use mneme_session::{CacheConfig, RetryPolicy};

/// What "today" means for temporal queries with no explicit scope cue.
///
/// The source material for this engine carried two mutually inconsistent
/// notions; both are supported and the session window is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemporalScopeMode {
    /// The rolling session window bounded by the inactivity threshold.
    #[default]
    SessionWindow,
    /// The current UTC calendar day.
    CalendarDay,
}

/// Configuration for the retrieval orchestrator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hybrid cache tunables (TTL, bound N, bootstrap limit).
    pub cache: CacheConfig,

    /// Retry policy for durable backend calls.
    pub retry: RetryPolicy,

    /// Inactivity gap that starts a new session window.
    pub inactivity_threshold: Duration,

    /// Budget for each individual backend call.
    pub sub_timeout: Duration,

    /// Overall budget for one `assemble_context` call.
    pub deadline: Duration,

    /// Number of semantic candidates requested from the index.
    pub semantic_top_k: usize,

    /// Time constant of the recency decay applied to semantic scores.
    pub decay_tau: Duration,

    /// Floor of the recency decay, so old-but-on-topic memories are never
    /// decayed to zero.
    pub decay_floor: f32,

    /// Maximum length (chars) of the optional summary.
    pub summary_max_len: usize,

    /// Default scope for temporal queries without an explicit cue.
    pub scope_mode: TemporalScopeMode,

    /// Maximum records returned for windowed temporal queries.
    pub temporal_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            inactivity_threshold: Duration::from_secs(30 * 60),
            sub_timeout: Duration::from_millis(300),
            deadline: Duration::from_secs(1),
            semantic_top_k: 8,
            decay_tau: Duration::from_secs(3600),
            decay_floor: 0.05,
            summary_max_len: 512,
            scope_mode: TemporalScopeMode::SessionWindow,
            temporal_limit: 50,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the inactivity threshold for session boundaries.
    pub fn with_inactivity_threshold(mut self, threshold: Duration) -> Self {
        self.inactivity_threshold = threshold;
        self
    }

    /// Set the per-backend-call timeout.
    pub fn with_sub_timeout(mut self, timeout: Duration) -> Self {
        self.sub_timeout = timeout;
        self
    }

    /// Set the overall deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the semantic top-k.
    pub fn with_semantic_top_k(mut self, k: usize) -> Self {
        self.semantic_top_k = k;
        self
    }

    /// Set the recency decay time constant.
    pub fn with_decay_tau(mut self, tau: Duration) -> Self {
        self.decay_tau = tau;
        self
    }

    /// Set the recency decay floor (clamped to 0.0-1.0).
    pub fn with_decay_floor(mut self, floor: f32) -> Self {
        self.decay_floor = floor.clamp(0.0, 1.0);
        self
    }

    /// Set the summary length bound.
    pub fn with_summary_max_len(mut self, max_len: usize) -> Self {
        self.summary_max_len = max_len;
        self
    }

    /// Set the default temporal scope mode.
    pub fn with_scope_mode(mut self, mode: TemporalScopeMode) -> Self {
        self.scope_mode = mode;
        self
    }

    /// Set the windowed temporal result limit.
    pub fn with_temporal_limit(mut self, limit: usize) -> Self {
        self.temporal_limit = limit;
        self
    }
}
