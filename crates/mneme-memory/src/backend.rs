//! Backend traits for pluggable persistence.
//!
//! The retrieval layer talks to the durable stores through these traits so
//! different storage implementations (SQLite, remote stores, mocks) can be
//! used interchangeably. The two stores are independent failure domains: an
//! unavailable semantic index must never block a chronological query and
//! vice versa.

use async_trait::async_trait;

use mneme_types::{MemoryRecord, OwnerKey};

use crate::chronicle::{ChronicleStore, RangeQuery};
use crate::error::Result;
use crate::index::{SearchFilters, SemanticIndex, SemanticMatch};

/// Durable ordered-range-scan store keyed by `(owner, timestamp, sequence)`.
///
/// All implementations must be `Send + Sync` to allow sharing across tasks.
#[async_trait]
pub trait ChronicleBackend: Send + Sync {
    /// Append a record, idempotently by id. Returns the record's sequence.
    async fn append(&self, record: &MemoryRecord) -> Result<u64>;

    /// The highest sequence durably recorded for an owner (0 if none).
    async fn latest_sequence(&self, owner: &OwnerKey) -> Result<u64>;

    /// Scan a time range in exact `(timestamp, sequence)` order.
    async fn range(&self, query: &RangeQuery) -> Result<Vec<MemoryRecord>>;
}

/// Per-namespace k-nearest-neighbor index over embedded records.
#[async_trait]
pub trait SemanticBackend: Send + Sync {
    /// Upsert a record and its embedding, idempotently by id.
    async fn upsert(&self, record: &MemoryRecord) -> Result<()>;

    /// Rank an owner's records by similarity to the query embedding.
    async fn search(
        &self,
        owner: &OwnerKey,
        query_embedding: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SemanticMatch>>;
}

// SQLite operations are short and run behind an in-process mutex, so the
// async impls call them inline rather than hopping to a blocking pool.

#[async_trait]
impl ChronicleBackend for ChronicleStore {
    async fn append(&self, record: &MemoryRecord) -> Result<u64> {
        ChronicleStore::append(self, record)
    }

    async fn latest_sequence(&self, owner: &OwnerKey) -> Result<u64> {
        ChronicleStore::latest_sequence(self, owner)
    }

    async fn range(&self, query: &RangeQuery) -> Result<Vec<MemoryRecord>> {
        ChronicleStore::range(self, query)
    }
}

#[async_trait]
impl SemanticBackend for SemanticIndex {
    async fn upsert(&self, record: &MemoryRecord) -> Result<()> {
        SemanticIndex::upsert(self, record)
    }

    async fn search(
        &self,
        owner: &OwnerKey,
        query_embedding: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SemanticMatch>> {
        SemanticIndex::search(self, owner, query_embedding, k, filters)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory mocks (testing)
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(any(test, feature = "testing"))]
pub use mock::{MockChronicle, MockSemanticIndex};

#[cfg(any(test, feature = "testing"))]
mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::chronicle::Order;

    /// In-memory chronicle for tests. Counts calls so orchestration tests
    /// can assert which backends were consulted.
    #[derive(Debug, Default)]
    pub struct MockChronicle {
        records: Mutex<Vec<MemoryRecord>>,
        range_calls: AtomicUsize,
        append_calls: AtomicUsize,
    }

    impl MockChronicle {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of `range` calls made so far.
        pub fn range_calls(&self) -> usize {
            self.range_calls.load(Ordering::SeqCst)
        }

        /// Number of `append` calls made so far.
        pub fn append_calls(&self) -> usize {
            self.append_calls.load(Ordering::SeqCst)
        }

        /// All records for an owner in chronological order.
        pub fn records_for(&self, owner: &OwnerKey) -> Vec<MemoryRecord> {
            let mut records: Vec<_> = self
                .records
                .lock()
                .iter()
                .filter(|r| r.user_id == owner.user_id && r.namespace == owner.namespace)
                .cloned()
                .collect();
            records.sort_by_key(|r| (r.timestamp, r.sequence));
            records
        }
    }

    #[async_trait]
    impl ChronicleBackend for MockChronicle {
        async fn append(&self, record: &MemoryRecord) -> Result<u64> {
            self.append_calls.fetch_add(1, Ordering::SeqCst);
            let mut records = self.records.lock();
            records.retain(|r| r.id != record.id);
            records.push(record.clone());
            Ok(record.sequence)
        }

        async fn latest_sequence(&self, owner: &OwnerKey) -> Result<u64> {
            Ok(self
                .records
                .lock()
                .iter()
                .filter(|r| r.user_id == owner.user_id && r.namespace == owner.namespace)
                .map(|r| r.sequence)
                .max()
                .unwrap_or(0))
        }

        async fn range(&self, query: &RangeQuery) -> Result<Vec<MemoryRecord>> {
            self.range_calls.fetch_add(1, Ordering::SeqCst);
            let mut records: Vec<_> = self
                .records
                .lock()
                .iter()
                .filter(|r| {
                    r.user_id == query.owner.user_id
                        && r.namespace == query.owner.namespace
                        && query
                            .channel_id
                            .as_deref()
                            .is_none_or(|c| r.channel_id == c)
                        && query.since.is_none_or(|s| r.timestamp >= s)
                        && query.until.is_none_or(|u| r.timestamp <= u)
                })
                .cloned()
                .collect();

            records.sort_by_key(|r| (r.timestamp, r.sequence));
            if query.order == Order::Desc {
                records.reverse();
            }
            records.truncate(query.limit);
            Ok(records)
        }
    }

    /// In-memory brute-force semantic index for tests.
    #[derive(Debug, Default)]
    pub struct MockSemanticIndex {
        records: Mutex<Vec<MemoryRecord>>,
        search_calls: AtomicUsize,
    }

    impl MockSemanticIndex {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of `search` calls made so far.
        pub fn search_calls(&self) -> usize {
            self.search_calls.load(Ordering::SeqCst)
        }

        pub fn len(&self) -> usize {
            self.records.lock().len()
        }

        pub fn is_empty(&self) -> bool {
            self.records.lock().is_empty()
        }
    }

    fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }

    #[async_trait]
    impl SemanticBackend for MockSemanticIndex {
        async fn upsert(&self, record: &MemoryRecord) -> Result<()> {
            if record.embedding.is_none() {
                return Err(crate::error::MemoryError::InvalidData(
                    "record has no embedding".into(),
                ));
            }
            let mut records = self.records.lock();
            records.retain(|r| r.id != record.id);
            records.push(record.clone());
            Ok(())
        }

        async fn search(
            &self,
            owner: &OwnerKey,
            query_embedding: &[f32],
            k: usize,
            filters: &SearchFilters,
        ) -> Result<Vec<SemanticMatch>> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);

            let mut matches: Vec<SemanticMatch> = self
                .records
                .lock()
                .iter()
                .filter(|r| r.user_id == owner.user_id && r.namespace == owner.namespace)
                .filter(|r| filters_match(filters, r))
                .filter_map(|r| {
                    let embedding = r.embedding.as_deref()?;
                    let distance = l2_distance(embedding, query_embedding);
                    Some(SemanticMatch {
                        record: r.clone(),
                        distance,
                        similarity: 1.0 / (1.0 + distance),
                    })
                })
                .collect();

            matches.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        (b.record.timestamp, b.record.sequence)
                            .cmp(&(a.record.timestamp, a.record.sequence))
                    })
            });
            matches.truncate(k);
            Ok(matches)
        }
    }

    fn filters_match(filters: &SearchFilters, record: &MemoryRecord) -> bool {
        if let Some(channel) = &filters.channel_id
            && record.channel_id != *channel
        {
            return false;
        }
        if !filters.kinds.is_empty() && !filters.kinds.contains(&record.kind) {
            return false;
        }
        if let Some(since) = filters.since
            && record.timestamp < since
        {
            return false;
        }
        filters
            .tags
            .iter()
            .all(|(key, value)| record.metadata.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use mneme_types::Role;

    fn turn(user: &str, content: &str, seq: u64) -> MemoryRecord {
        let mut r = MemoryRecord::turn(user, "bot", "chan", Role::User, content);
        r.sequence = seq;
        r
    }

    #[tokio::test]
    async fn test_mock_chronicle_round_trip() {
        let chronicle = MockChronicle::new();
        let base = Utc::now();

        for i in 0..3u64 {
            let r = turn("u1", &format!("t{i}"), i + 1).at(base + Duration::seconds(i as i64));
            chronicle.append(&r).await.unwrap();
        }

        let owner = OwnerKey::new("u1", "bot");
        let all = chronicle.range(&RangeQuery::new(owner.clone())).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].content, "t0");
        assert_eq!(chronicle.latest_sequence(&owner).await.unwrap(), 3);
        assert_eq!(chronicle.range_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_chronicle_idempotent_append() {
        let chronicle = MockChronicle::new();
        let r = turn("u1", "once", 1);
        chronicle.append(&r).await.unwrap();
        chronicle.append(&r).await.unwrap();

        let owner = OwnerKey::new("u1", "bot");
        assert_eq!(chronicle.records_for(&owner).len(), 1);
    }

    #[tokio::test]
    async fn test_mock_semantic_search() {
        let index = MockSemanticIndex::new();

        let near = turn("u1", "near", 1).with_embedding(vec![1.0, 0.0]);
        let far = turn("u1", "far", 2).with_embedding(vec![0.0, 1.0]);
        index.upsert(&near).await.unwrap();
        index.upsert(&far).await.unwrap();

        let owner = OwnerKey::new("u1", "bot");
        let matches = index
            .search(&owner, &[1.0, 0.0], 10, &SearchFilters::new())
            .await
            .unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].record.content, "near");
        assert_eq!(index.search_calls(), 1);
    }
}
