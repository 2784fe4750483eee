//! The retrieval orchestrator: one bounded-latency `assemble_context` call
//! over three retrieval models that must never be conflated.
//!
//! Temporal intents are answered with a single scoped range query against
//! the chronological log; the semantic index is never consulted for them,
//! since similarity does not imply recency. Semantic intents fan out to the cache
//! and the index concurrently, each under its own sub-timeout, and merge
//! with a recency-decayed score. Every backend is an independent failure
//! domain: unavailability or timeout degrades that branch only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, warn};

use mneme_memory::{
    ChronicleBackend, Order, RangeQuery, SearchFilters, SemanticBackend, SemanticMatch,
    validate_record,
};
use mneme_session::{HybridCache, SessionBoundaryTracker, SessionWindow, with_retry};
use mneme_types::{
    ChannelKey, ContextBundle, IntentKind, MemoryRecord, OwnerKey, QueryIntent, QueryScope,
    ScoredMemory, Timestamp,
};

use crate::bridge::DurableBridge;
use crate::config::EngineConfig;
use crate::error::{Result, RetrievalError, ValidationError};
use crate::guard::ConsistencyGuard;
use crate::intent::QueryIntentClassifier;
use crate::sequence::SequenceAllocator;
use crate::summary::Summarizer;

/// One incoming turn to assemble context for.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub user_id: String,
    pub namespace: String,
    pub channel_id: String,
    pub utterance: String,
    /// Embedding of the utterance, produced by the external provider.
    /// Without it, semantic search is skipped and only recent turns are
    /// assembled.
    pub query_embedding: Option<Vec<f32>>,
}

impl ContextRequest {
    pub fn new(
        user_id: impl Into<String>,
        namespace: impl Into<String>,
        channel_id: impl Into<String>,
        utterance: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            namespace: namespace.into(),
            channel_id: channel_id.into(),
            utterance: utterance.into(),
            query_embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.query_embedding = Some(embedding);
        self
    }

    fn owner(&self) -> OwnerKey {
        OwnerKey::new(&self.user_id, &self.namespace)
    }

    fn channel(&self) -> ChannelKey {
        ChannelKey::new(&self.user_id, &self.namespace, &self.channel_id)
    }
}

/// Composes the cache, log, index, boundary tracker, classifier and guard
/// into the engine's two entry points: `assemble_context` and `store`.
///
/// All state is owned by the orchestrator and injected at construction, so
/// multiple isolated instances can coexist and tests are deterministic.
pub struct RetrievalOrchestrator {
    chronicle: Arc<dyn ChronicleBackend>,
    semantic: Arc<dyn SemanticBackend>,
    cache: HybridCache<DurableBridge>,
    boundary: SessionBoundaryTracker,
    classifier: QueryIntentClassifier,
    guard: ConsistencyGuard,
    sequences: SequenceAllocator,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: EngineConfig,
}

impl RetrievalOrchestrator {
    /// Build an orchestrator over the given backends.
    pub fn new(
        config: EngineConfig,
        chronicle: Arc<dyn ChronicleBackend>,
        semantic: Arc<dyn SemanticBackend>,
    ) -> Self {
        let bridge = DurableBridge::new(Arc::clone(&chronicle), Arc::clone(&semantic));
        let cache = HybridCache::new(config.cache.clone(), config.retry.clone(), bridge);

        Self {
            chronicle,
            semantic,
            cache,
            boundary: SessionBoundaryTracker::new(config.inactivity_threshold),
            classifier: QueryIntentClassifier::new(config.scope_mode),
            guard: ConsistencyGuard::new(),
            sequences: SequenceAllocator::new(),
            summarizer: None,
            config,
        }
    }

    /// Attach the optional summarizer collaborator.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Assemble the context bundle for an incoming turn.
    ///
    /// Always returns a bundle within the configured deadline: backends
    /// that miss their budget or are unavailable degrade their branch
    /// (`timed_out` / `complete=false`), they never fail the call. Only
    /// validation errors propagate.
    pub async fn assemble_context(&self, request: &ContextRequest) -> Result<ContextBundle> {
        Self::validate_request(request)?;

        let started = Instant::now();
        let now = mneme_types::now();
        let owner = request.owner();

        let observed = self.boundary.observe(&owner, now);
        let intent = self.classifier.classify(&request.utterance);
        debug!(
            user_id = %request.user_id,
            kind = ?intent.kind,
            scope = ?intent.scope,
            "Assembling context"
        );

        let mut bundle = if intent.kind.is_temporal() || intent.kind == IntentKind::SessionScoped {
            self.assemble_temporal(&owner, intent, observed.window, now, started)
                .await
        } else {
            self.assemble_semantic(request, intent, now, started).await
        };

        let before = bundle.recent.len();
        bundle.recent = self
            .guard
            .filter_visible(std::mem::take(&mut bundle.recent), &request.user_id);
        if bundle.recent.len() < before {
            // Filtering broke the turn sequence; restore strict alternation
            // by dropping, never merging.
            bundle.recent = self
                .guard
                .repair_alternation(std::mem::take(&mut bundle.recent));
        }
        bundle
            .semantic
            .retain(|s| self.guard.is_visible(&s.record, &request.user_id));

        self.attach_summary(&mut bundle, started).await;
        Ok(bundle)
    }

    /// Store a fully-populated record produced by the caller.
    ///
    /// Stamps the per-owner sequence, lands the record in the cache
    /// synchronously (read-your-writes), and lets the durable write-through
    /// run in the background with bounded retry; writes are never
    /// cancelled. Returns the assigned sequence.
    pub async fn store(&self, mut record: MemoryRecord) -> Result<u64> {
        validate_record(&record)?;

        let owner = record.owner();
        self.boundary.observe(&owner, record.timestamp);

        let seq = self
            .sequences
            .next(&owner, self.chronicle.as_ref(), &self.config.retry)
            .await;
        record.sequence = seq;

        if let Err(e) = self.cache.put(record).await {
            // The cache degrades internally; an error here means even the
            // degraded path failed. The write-through task was still spawned.
            warn!(error = %e, "Cache put degraded");
        }

        Ok(seq)
    }

    /// Drop a channel's cache buffer, forcing the next read to rebuild from
    /// the log. Exposed for operational hygiene and restart semantics.
    pub async fn invalidate_channel(&self, channel: &ChannelKey) {
        self.cache.invalidate(channel).await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Temporal path
    // ─────────────────────────────────────────────────────────────────────

    /// One scoped range query against the log. The semantic index is not
    /// touched on this path.
    async fn assemble_temporal(
        &self,
        owner: &OwnerKey,
        intent: QueryIntent,
        window: SessionWindow,
        now: Timestamp,
        started: Instant,
    ) -> ContextBundle {
        let since = match intent.scope {
            QueryScope::Session => Some(window.started_at),
            QueryScope::CalendarDay => Some(day_start(now)),
            QueryScope::AllTime => None,
        };

        let (order, limit) = match intent.kind {
            IntentKind::TemporalFirst => (Order::Asc, 1),
            IntentKind::TemporalLast => (Order::Desc, intent.offset.unwrap_or(1)),
            _ => (Order::Asc, self.config.temporal_limit),
        };

        let mut query = RangeQuery::new(owner.clone()).order(order).limit(limit);
        if let Some(since) = since {
            query = query.since(since);
        }

        let mut bundle = ContextBundle::empty(intent);
        let budget = self.sub_budget(started);

        let result = run_bounded(
            "chronicle",
            budget,
            with_retry(&self.config.retry, "chronicle range", || {
                self.chronicle.range(&query)
            }),
        )
        .await;

        match result {
            Ok(records) => {
                bundle.recent = if intent.relative {
                    // "n messages ago": the n-th most recent stored turn,
                    // or nothing if history is shorter than n.
                    records.into_iter().nth(limit - 1).into_iter().collect()
                } else {
                    let mut records = records;
                    if order == Order::Desc {
                        records.reverse();
                    }
                    records
                };
            }
            Err(RetrievalError::DeadlineExceeded) => {
                warn!(budget_ms = budget.as_millis() as u64, "Temporal query timed out");
                bundle.timed_out = true;
                bundle.complete = false;
            }
            Err(e) => {
                warn!(error = %e, "Chronicle degraded for temporal query");
                bundle.complete = false;
            }
        }

        bundle
    }

    // ─────────────────────────────────────────────────────────────────────
    // Semantic path
    // ─────────────────────────────────────────────────────────────────────

    /// Concurrent fan-out: recent turns from the cache, ranked memories
    /// from the index, each under its own sub-timeout.
    async fn assemble_semantic(
        &self,
        request: &ContextRequest,
        intent: QueryIntent,
        now: Timestamp,
        started: Instant,
    ) -> ContextBundle {
        let owner = request.owner();
        let channel = request.channel();
        let budget = self.sub_budget(started);

        let recent_fut = run_bounded(
            "turn-cache",
            budget,
            self.cache.get_recent(&channel, self.config.cache.recent_limit),
        );

        let filters = SearchFilters::new();
        let semantic_fut = async {
            let embedding = request.query_embedding.as_deref()?;
            Some(
                run_bounded(
                    "semantic-index",
                    budget,
                    with_retry(&self.config.retry, "semantic search", || {
                        self.semantic.search(
                            &owner,
                            embedding,
                            self.config.semantic_top_k,
                            &filters,
                        )
                    }),
                )
                .await,
            )
        };

        let (recent_res, semantic_res) = tokio::join!(recent_fut, semantic_fut);

        let mut bundle = ContextBundle::empty(intent);

        match recent_res {
            Ok(records) => {
                bundle.recent = records;
            }
            Err(RetrievalError::DeadlineExceeded) => {
                warn!("Recent-turn fetch timed out");
                bundle.timed_out = true;
                bundle.complete = false;
            }
            Err(e) => {
                warn!(error = %e, "Recent-turn cache degraded");
                bundle.complete = false;
            }
        }

        match semantic_res {
            // No embedding provided: semantic search has nothing to rank by.
            None => {}
            Some(Ok(matches)) => {
                bundle.semantic = self.score_matches(matches, now);
            }
            Some(Err(RetrievalError::DeadlineExceeded)) => {
                warn!("Semantic search timed out");
                bundle.timed_out = true;
                bundle.complete = false;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Semantic index degraded");
                bundle.complete = false;
            }
        }

        bundle
    }

    /// Blend similarity with recency: `score = similarity * decay(age)`.
    /// Near-tied similarities resolve toward recency; exact score ties sort
    /// by `(timestamp, sequence)` descending.
    fn score_matches(&self, matches: Vec<SemanticMatch>, now: Timestamp) -> Vec<ScoredMemory> {
        let tau = self.config.decay_tau.as_secs_f32().max(1.0);
        let floor = self.config.decay_floor;

        let mut scored: Vec<ScoredMemory> = matches
            .into_iter()
            .map(|m| {
                let age_secs = (now - m.record.timestamp).num_seconds().max(0) as f32;
                let decay = floor + (1.0 - floor) * (-age_secs / tau).exp();
                ScoredMemory {
                    similarity: m.similarity,
                    score: m.similarity * decay,
                    record: m.record,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    (b.record.timestamp, b.record.sequence)
                        .cmp(&(a.record.timestamp, a.record.sequence))
                })
        });
        scored
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    async fn attach_summary(&self, bundle: &mut ContextBundle, started: Instant) {
        let Some(summarizer) = &self.summarizer else {
            return;
        };
        if bundle.recent.is_empty() {
            return;
        }

        let remaining = self.config.deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return;
        }

        match timeout(
            remaining,
            summarizer.summarize(&bundle.recent, self.config.summary_max_len),
        )
        .await
        {
            Ok(summary) if !summary.is_empty() => bundle.summary = Some(summary),
            Ok(_) => {}
            Err(_) => debug!("Summary skipped: out of deadline budget"),
        }
    }

    /// Per-call budget: the configured sub-timeout, capped by what is left
    /// of the overall deadline.
    fn sub_budget(&self, started: Instant) -> Duration {
        self.config
            .sub_timeout
            .min(self.config.deadline.saturating_sub(started.elapsed()))
    }

    fn validate_request(request: &ContextRequest) -> Result<()> {
        if request.user_id.is_empty() {
            return Err(ValidationError::EmptyUserId.into());
        }
        if request.namespace.is_empty() {
            return Err(ValidationError::EmptyNamespace.into());
        }
        if request.channel_id.is_empty() {
            return Err(ValidationError::EmptyChannelId.into());
        }
        if request.utterance.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        if let Some(embedding) = &request.query_embedding {
            let invalid = embedding
                .iter()
                .filter(|v| v.is_nan() || v.is_infinite())
                .count();
            if invalid > 0 {
                return Err(ValidationError::InvalidEmbeddingValues { count: invalid }.into());
            }
        }
        Ok(())
    }
}

/// Run one backend future under its budget, folding the outcome into the
/// engine's error taxonomy: a miss on the budget is `DeadlineExceeded`, any
/// backend error (post-retry) is `BackendUnavailable`.
async fn run_bounded<T, E>(
    backend: &'static str,
    budget: Duration,
    fut: impl std::future::Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    E: std::fmt::Display,
{
    match timeout(budget, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RetrievalError::BackendUnavailable {
            backend,
            reason: e.to_string(),
        }),
        Err(_) => Err(RetrievalError::DeadlineExceeded),
    }
}

/// Start of the current UTC calendar day.
fn day_start(now: Timestamp) -> Timestamp {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc()
}
