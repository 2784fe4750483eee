//! The durable, append-only chronological log.
//!
//! Records are keyed by `(user_id, namespace, timestamp, sequence)` and
//! ordering is exact: timestamps are stored as integer microseconds and ties
//! are broken by the per-owner sequence counter. Appends are idempotent by
//! record id, so write-through retries are safe.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info};

use mneme_types::{MemoryKind, MemoryRecord, Metadata, OwnerKey, Role, Timestamp};

use crate::error::{MemoryError, Result};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Range Queries
// ─────────────────────────────────────────────────────────────────────────────

/// Result ordering for a range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// A scoped query over the chronological log.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    /// The owner whose records to scan.
    pub owner: OwnerKey,
    /// Optional channel filter.
    pub channel_id: Option<String>,
    /// Inclusive lower time bound.
    pub since: Option<Timestamp>,
    /// Inclusive upper time bound.
    pub until: Option<Timestamp>,
    /// Result ordering by `(timestamp, sequence)`.
    pub order: Order,
    /// Maximum number of records to return.
    pub limit: usize,
}

impl RangeQuery {
    /// Query the whole log for an owner, ascending.
    pub fn new(owner: OwnerKey) -> Self {
        Self {
            owner,
            channel_id: None,
            since: None,
            until: None,
            order: Order::Asc,
            limit: 100,
        }
    }

    /// Restrict to one channel.
    pub fn in_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Set the inclusive lower time bound.
    pub fn since(mut self, ts: Timestamp) -> Self {
        self.since = Some(ts);
        self
    }

    /// Set the inclusive upper time bound.
    pub fn until(mut self, ts: Timestamp) -> Self {
        self.until = Some(ts);
        self
    }

    /// Set the result ordering.
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Set the result limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chronicle Store
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed chronological log.
///
/// Uses WAL mode for better concurrent read performance. All access goes
/// through a single mutex-guarded connection.
pub struct ChronicleStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for ChronicleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChronicleStore").finish_non_exhaustive()
    }
}

impl ChronicleStore {
    /// Open or create a chronicle at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|_| {
                    MemoryError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        info!("Chronicle opened at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory chronicle (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Chronicle schema up to date (version {})", current_version);
            return Ok(());
        }

        conn.execute_batch(
            r#"
            -- Turn records, ordered by (ts_micros, seq) within an owner
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                role TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                ts_micros INTEGER NOT NULL,
                seq INTEGER NOT NULL
            );

            -- Owner-scoped chronological scans
            CREATE INDEX IF NOT EXISTS idx_records_owner_ts
                ON records(user_id, namespace, ts_micros, seq);

            -- Channel-scoped chronological scans (cache bootstrap)
            CREATE INDEX IF NOT EXISTS idx_records_channel_ts
                ON records(user_id, namespace, channel_id, ts_micros, seq);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Chronicle schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Append a record. Idempotent by id: re-appending the same record id
    /// replaces the previous row, so there is exactly one logical record at
    /// one position in chronological order.
    ///
    /// Returns the record's sequence number.
    pub fn append(&self, record: &MemoryRecord) -> Result<u64> {
        let conn = self.conn.lock().unwrap();

        let metadata_json = serde_json::to_string(&record.metadata)?;
        let embedding_json = record
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
            INSERT INTO records (id, user_id, namespace, channel_id, role, kind, content,
                                 embedding, metadata, ts_micros, seq)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                namespace = excluded.namespace,
                channel_id = excluded.channel_id,
                role = excluded.role,
                kind = excluded.kind,
                content = excluded.content,
                embedding = excluded.embedding,
                metadata = excluded.metadata,
                ts_micros = excluded.ts_micros,
                seq = excluded.seq
            "#,
            params![
                record.id.to_string(),
                record.user_id,
                record.namespace,
                record.channel_id,
                record.role.as_str(),
                record.kind.as_str(),
                record.content,
                embedding_json,
                metadata_json,
                record.timestamp.timestamp_micros(),
                record.sequence as i64,
            ],
        )?;

        debug!(record_id = %record.id, seq = record.sequence, "Appended record");
        Ok(record.sequence)
    }

    /// The highest sequence number durably recorded for an owner, or 0.
    ///
    /// Used to seed the in-process sequence allocator after a restart.
    pub fn latest_sequence(&self, owner: &OwnerKey) -> Result<u64> {
        let conn = self.conn.lock().unwrap();

        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM records WHERE user_id = ?1 AND namespace = ?2",
            params![owner.user_id, owner.namespace],
            |row| row.get(0),
        )?;

        Ok(max as u64)
    }

    /// Scan a time range, ordered exactly by `(timestamp, sequence)`.
    pub fn range(&self, query: &RangeQuery) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            r#"
            SELECT id, user_id, namespace, channel_id, role, kind, content,
                   embedding, metadata, ts_micros, seq
            FROM records
            WHERE user_id = ?1 AND namespace = ?2
            "#,
        );

        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(query.owner.user_id.clone()),
            Box::new(query.owner.namespace.clone()),
        ];

        if let Some(channel) = &query.channel_id {
            params_vec.push(Box::new(channel.clone()));
            sql.push_str(&format!(" AND channel_id = ?{}", params_vec.len()));
        }
        if let Some(since) = query.since {
            params_vec.push(Box::new(since.timestamp_micros()));
            sql.push_str(&format!(" AND ts_micros >= ?{}", params_vec.len()));
        }
        if let Some(until) = query.until {
            params_vec.push(Box::new(until.timestamp_micros()));
            sql.push_str(&format!(" AND ts_micros <= ?{}", params_vec.len()));
        }

        let dir = query.order.as_sql();
        params_vec.push(Box::new(query.limit as i64));
        sql.push_str(&format!(
            " ORDER BY ts_micros {dir}, seq {dir} LIMIT ?{}",
            params_vec.len()
        ));

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|b| b.as_ref()).collect();
        let mut rows = stmt.query(params_refs.as_slice())?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_record(row)?);
        }

        Ok(records)
    }

    /// The earliest record in a scope (`range` with `limit=1`, ascending).
    pub fn first_in(&self, query: RangeQuery) -> Result<Option<MemoryRecord>> {
        let records = self.range(&query.order(Order::Asc).limit(1))?;
        Ok(records.into_iter().next())
    }

    /// The latest record in a scope (`range` with `limit=1`, descending).
    pub fn last_in(&self, query: RangeQuery) -> Result<Option<MemoryRecord>> {
        let records = self.range(&query.order(Order::Desc).limit(1))?;
        Ok(records.into_iter().next())
    }

    /// Count records for an owner.
    pub fn count(&self, owner: &OwnerKey) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE user_id = ?1 AND namespace = ?2",
            params![owner.user_id, owner.namespace],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    /// Convert a database row to a record.
    ///
    /// Expected column order: id, user_id, namespace, channel_id, role, kind,
    /// content, embedding, metadata, ts_micros, seq
    fn row_to_record(row: &rusqlite::Row) -> Result<MemoryRecord> {
        let id_str: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        let namespace: String = row.get(2)?;
        let channel_id: String = row.get(3)?;
        let role_str: String = row.get(4)?;
        let kind_str: String = row.get(5)?;
        let content: String = row.get(6)?;
        let embedding_json: Option<String> = row.get(7)?;
        let metadata_json: String = row.get(8)?;
        let ts_micros: i64 = row.get(9)?;
        let seq: i64 = row.get(10)?;

        let id = uuid::Uuid::parse_str(&id_str)?;
        let role = Role::parse(&role_str)
            .ok_or_else(|| MemoryError::InvalidData(format!("Unknown role: {role_str}")))?;
        let kind = MemoryKind::parse(&kind_str)
            .ok_or_else(|| MemoryError::InvalidData(format!("Unknown kind: {kind_str}")))?;
        let embedding: Option<Vec<f32>> = embedding_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let metadata: Metadata = serde_json::from_str(&metadata_json)?;
        let timestamp = chrono::DateTime::from_timestamp_micros(ts_micros)
            .ok_or_else(|| MemoryError::InvalidData(format!("Bad timestamp: {ts_micros}")))?;

        Ok(MemoryRecord {
            id,
            user_id,
            namespace,
            channel_id,
            role,
            kind,
            content,
            embedding,
            timestamp,
            sequence: seq as u64,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(user: &str, content: &str, seq: u64, ts: Timestamp) -> MemoryRecord {
        let mut r = MemoryRecord::turn(user, "bot", "chan", Role::User, content).at(ts);
        r.sequence = seq;
        r
    }

    #[test]
    fn test_append_and_range() {
        let store = ChronicleStore::open_in_memory().unwrap();
        let base = Utc::now();

        for i in 0..5u64 {
            let r = record("u1", &format!("turn {i}"), i + 1, base + Duration::seconds(i as i64));
            store.append(&r).unwrap();
        }

        let owner = OwnerKey::new("u1", "bot");
        let all = store.range(&RangeQuery::new(owner.clone())).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "turn 0");
        assert_eq!(all[4].content, "turn 4");

        let desc = store
            .range(&RangeQuery::new(owner).order(Order::Desc).limit(2))
            .unwrap();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc[0].content, "turn 4");
    }

    #[test]
    fn test_append_idempotent() {
        let store = ChronicleStore::open_in_memory().unwrap();
        let r = record("u1", "hello", 1, Utc::now());

        store.append(&r).unwrap();
        store.append(&r).unwrap();
        store.append(&r).unwrap();

        let owner = OwnerKey::new("u1", "bot");
        assert_eq!(store.count(&owner).unwrap(), 1);

        let all = store.range(&RangeQuery::new(owner)).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, r.id);
    }

    #[test]
    fn test_sequence_breaks_timestamp_ties() {
        let store = ChronicleStore::open_in_memory().unwrap();
        let ts = Utc::now();

        // Same timestamp, different sequences, inserted out of order
        store.append(&record("u1", "second", 2, ts)).unwrap();
        store.append(&record("u1", "first", 1, ts)).unwrap();
        store.append(&record("u1", "third", 3, ts)).unwrap();

        let owner = OwnerKey::new("u1", "bot");
        let all = store.range(&RangeQuery::new(owner)).unwrap();
        let contents: Vec<&str> = all.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_range_time_bounds() {
        let store = ChronicleStore::open_in_memory().unwrap();
        let base = Utc::now();

        for i in 0..10u64 {
            let r = record("u1", &format!("t{i}"), i + 1, base + Duration::minutes(i as i64));
            store.append(&r).unwrap();
        }

        let owner = OwnerKey::new("u1", "bot");
        let windowed = store
            .range(
                &RangeQuery::new(owner)
                    .since(base + Duration::minutes(3))
                    .until(base + Duration::minutes(6)),
            )
            .unwrap();

        let contents: Vec<&str> = windowed.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["t3", "t4", "t5", "t6"]);
    }

    #[test]
    fn test_owner_and_channel_scoping() {
        let store = ChronicleStore::open_in_memory().unwrap();
        let ts = Utc::now();

        store.append(&record("alice", "from alice", 1, ts)).unwrap();
        store.append(&record("bob", "from bob", 1, ts)).unwrap();

        let mut dm = MemoryRecord::turn("alice", "bot", "dm", Role::User, "private").at(ts);
        dm.sequence = 2;
        store.append(&dm).unwrap();

        let alice = OwnerKey::new("alice", "bot");
        let all = store.range(&RangeQuery::new(alice.clone())).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.user_id == "alice"));

        let chan_only = store
            .range(&RangeQuery::new(alice).in_channel("chan"))
            .unwrap();
        assert_eq!(chan_only.len(), 1);
        assert_eq!(chan_only[0].content, "from alice");
    }

    #[test]
    fn test_first_and_last_in() {
        let store = ChronicleStore::open_in_memory().unwrap();
        let base = Utc::now();

        for i in 0..3u64 {
            let r = record("u1", &format!("t{i}"), i + 1, base + Duration::seconds(i as i64));
            store.append(&r).unwrap();
        }

        let owner = OwnerKey::new("u1", "bot");
        let first = store.first_in(RangeQuery::new(owner.clone())).unwrap().unwrap();
        assert_eq!(first.content, "t0");

        let last = store.last_in(RangeQuery::new(owner.clone())).unwrap().unwrap();
        assert_eq!(last.content, "t2");

        let none = store
            .first_in(RangeQuery::new(OwnerKey::new("nobody", "bot")))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_latest_sequence() {
        let store = ChronicleStore::open_in_memory().unwrap();
        let owner = OwnerKey::new("u1", "bot");
        assert_eq!(store.latest_sequence(&owner).unwrap(), 0);

        store.append(&record("u1", "a", 7, Utc::now())).unwrap();
        assert_eq!(store.latest_sequence(&owner).unwrap(), 7);
    }

    #[test]
    fn test_metadata_round_trip() {
        let store = ChronicleStore::open_in_memory().unwrap();
        let mut r = MemoryRecord::turn("u1", "bot", "chan", Role::Assistant, "reply")
            .with_tag("emotion", "calm")
            .with_embedding(vec![0.5, -0.5]);
        r.sequence = 1;
        store.append(&r).unwrap();

        let owner = OwnerKey::new("u1", "bot");
        let fetched = store.range(&RangeQuery::new(owner)).unwrap();
        assert_eq!(
            fetched[0].metadata.get("emotion"),
            Some(&serde_json::json!("calm"))
        );
        assert_eq!(fetched[0].embedding.as_deref(), Some(&[0.5f32, -0.5][..]));
        assert_eq!(fetched[0].role, Role::Assistant);
    }
}
