//! Per-owner monotonic sequence allocation.
//!
//! Sequences break timestamp ties, so two turns from the same user arriving
//! concurrently (duplicate delivery, multi-device) must never receive the
//! same number. Allocation is an atomic increment on a per-owner counter,
//! seeded once from the chronological log's high-water mark.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use mneme_session::{RetryPolicy, with_retry};
use mneme_types::OwnerKey;

use mneme_memory::ChronicleBackend;

/// Allocates strictly increasing sequence numbers per owner.
pub struct SequenceAllocator {
    counters: Mutex<HashMap<OwnerKey, Arc<AtomicU64>>>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next sequence for an owner.
    ///
    /// The first allocation for an owner seeds the counter from the log. If
    /// the log is unreachable, allocation starts at 0 with a warning:
    /// ordering is `(timestamp, sequence)`, so a reset counter only affects
    /// tie-breaks within a single timestamp.
    pub async fn next(
        &self,
        owner: &OwnerKey,
        chronicle: &dyn ChronicleBackend,
        retry: &RetryPolicy,
    ) -> u64 {
        if let Some(counter) = self.counters.lock().get(owner) {
            return counter.fetch_add(1, Ordering::SeqCst) + 1;
        }

        let seed = match with_retry(retry, "chronicle sequence seed", || {
            chronicle.latest_sequence(owner)
        })
        .await
        {
            Ok(seed) => seed,
            Err(e) => {
                warn!(
                    user_id = %owner.user_id,
                    namespace = %owner.namespace,
                    error = %e,
                    "Seeding sequence counter failed, starting at 0"
                );
                0
            }
        };

        // Another task may have seeded this owner while we were waiting on
        // the log; the existing counter wins.
        let counter = {
            let mut counters = self.counters.lock();
            Arc::clone(
                counters
                    .entry(owner.clone())
                    .or_insert_with(|| Arc::new(AtomicU64::new(seed))),
            )
        };

        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}
