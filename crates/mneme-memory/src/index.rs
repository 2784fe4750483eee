//! The namespace-isolated semantic index.
//!
//! A self-contained SQLite database: embeddings in a vec0 table partitioned
//! by owner key, plus a side table carrying the full record so the index can
//! answer searches even when the chronological log is down. The index is
//! never consulted for temporal intents: similarity does not imply recency.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info};

use mneme_types::{MemoryKind, MemoryRecord, Metadata, OwnerKey, Role, Timestamp};

use crate::error::{MemoryError, Result};
use crate::validation::validate_embedding;
use crate::vector;

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Search Types
// ─────────────────────────────────────────────────────────────────────────────

/// Optional filters applied to a semantic search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict to one channel.
    pub channel_id: Option<String>,
    /// Restrict to these record kinds (empty = all kinds).
    pub kinds: Vec<MemoryKind>,
    /// Inclusive lower time bound.
    pub since: Option<Timestamp>,
    /// Metadata tags that must match exactly (collaborator-supplied, opaque).
    pub tags: Vec<(String, serde_json::Value)>,
}

impl SearchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn since(mut self, ts: Timestamp) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(channel) = &self.channel_id
            && record.channel_id != *channel
        {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&record.kind) {
            return false;
        }
        if let Some(since) = self.since
            && record.timestamp < since
        {
            return false;
        }
        self.tags
            .iter()
            .all(|(key, value)| record.metadata.get(key) == Some(value))
    }
}

/// A single semantic search match.
#[derive(Debug, Clone)]
pub struct SemanticMatch {
    /// The matched record (embedding not rehydrated).
    pub record: MemoryRecord,
    /// Vector distance (lower = more similar).
    pub distance: f32,
    /// Similarity score (0.0-1.0, higher = more similar).
    pub similarity: f32,
}

/// Statistics about the semantic index.
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Number of indexed records.
    pub record_count: usize,
    /// Number of stored embeddings.
    pub embedding_count: usize,
    /// Configured embedding dimensions.
    pub dims: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Semantic Index
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite + sqlite-vec backed similarity search over embedded records.
pub struct SemanticIndex {
    conn: Mutex<Connection>,
    dims: usize,
}

impl std::fmt::Debug for SemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndex")
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

impl SemanticIndex {
    /// Open or create an index at the given path.
    pub fn open(path: impl AsRef<Path>, dims: usize) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|_| {
                    MemoryError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
                })?;
            }
        }

        vector::init_vector_extension();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let index = Self {
            conn: Mutex::new(conn),
            dims,
        };
        index.initialize()?;

        info!("Semantic index opened at {:?} ({} dims)", path, dims);
        Ok(index)
    }

    /// Create an in-memory index (useful for testing).
    pub fn open_in_memory(dims: usize) -> Result<Self> {
        vector::init_vector_extension();
        let conn = Connection::open_in_memory()?;
        let index = Self {
            conn: Mutex::new(conn),
            dims,
        };
        index.initialize()?;
        Ok(index)
    }

    /// Configured embedding dimensions.
    pub fn dims(&self) -> usize {
        self.dims
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            conn.execute_batch(
                r#"
                -- Full record rows so search results need no other backend
                CREATE TABLE IF NOT EXISTS semantic_records (
                    record_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    namespace TEXT NOT NULL,
                    channel_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    content TEXT NOT NULL,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    ts_micros INTEGER NOT NULL,
                    seq INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_semantic_owner
                    ON semantic_records(user_id, namespace, ts_micros);
                "#,
            )?;

            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        vector::create_vector_table(&conn, self.dims)?;
        Ok(())
    }

    /// Upsert a record and its embedding. Idempotent by record id.
    ///
    /// The record must carry an embedding of the configured dimensions.
    pub fn upsert(&self, record: &MemoryRecord) -> Result<()> {
        let embedding = record
            .embedding
            .as_deref()
            .ok_or_else(|| MemoryError::InvalidData("record has no embedding".into()))?;
        validate_embedding(embedding, self.dims).map_err(MemoryError::from)?;

        let conn = self.conn.lock().unwrap();
        let metadata_json = serde_json::to_string(&record.metadata)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO semantic_records
                (record_id, user_id, namespace, channel_id, role, kind, content,
                 metadata, ts_micros, seq)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.id.to_string(),
                record.user_id,
                record.namespace,
                record.channel_id,
                record.role.as_str(),
                record.kind.as_str(),
                record.content,
                metadata_json,
                record.timestamp.timestamp_micros(),
                record.sequence as i64,
            ],
        )?;

        vector::store_embedding(
            &conn,
            &record.id.to_string(),
            &record.owner().to_string(),
            embedding,
        )?;

        debug!(record_id = %record.id, "Indexed record");
        Ok(())
    }

    /// Search an owner's records by vector similarity.
    ///
    /// Ranking is by similarity; ties are broken by descending recency,
    /// never the reverse. Fetches extra candidates so post-filters don't
    /// starve the result set.
    pub fn search(
        &self,
        owner: &OwnerKey,
        query_embedding: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SemanticMatch>> {
        validate_embedding(query_embedding, self.dims).map_err(MemoryError::from)?;

        let conn = self.conn.lock().unwrap();
        let hits = vector::search_similar(
            &conn,
            &owner.to_string(),
            query_embedding,
            k.saturating_mul(2).max(k + 8),
        )?;

        let mut matches = Vec::new();
        for hit in hits {
            let record = match Self::get_record(&conn, &hit.record_id)? {
                Some(r) => r,
                None => continue, // embedding without a side row
            };

            if !filters.matches(&record) {
                continue;
            }

            let similarity = 1.0 / (1.0 + hit.distance);
            matches.push(SemanticMatch {
                record,
                distance: hit.distance,
                similarity,
            });
        }

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

    /// Plain-text search fallback for callers with no query embedding.
    pub fn text_search(
        &self,
        owner: &OwnerKey,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();

        let pattern = format!("%{query}%");
        let mut stmt = conn.prepare(
            r#"
            SELECT record_id, user_id, namespace, channel_id, role, kind, content,
                   metadata, ts_micros, seq
            FROM semantic_records
            WHERE user_id = ?1 AND namespace = ?2 AND content LIKE ?3
            ORDER BY ts_micros DESC, seq DESC
            LIMIT ?4
            "#,
        )?;

        let mut rows = stmt.query(params![
            owner.user_id,
            owner.namespace,
            pattern,
            limit as i64
        ])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_record(row)?);
        }

        Ok(records)
    }

    /// Index statistics.
    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.conn.lock().unwrap();

        let record_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM semantic_records", [], |row| row.get(0))?;
        let embedding_count = vector::count_embeddings(&conn, None)?;

        Ok(IndexStats {
            record_count: record_count as usize,
            embedding_count,
            dims: self.dims,
        })
    }

    fn get_record(conn: &Connection, record_id: &str) -> Result<Option<MemoryRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT record_id, user_id, namespace, channel_id, role, kind, content,
                   metadata, ts_micros, seq
            FROM semantic_records
            WHERE record_id = ?1
            "#,
        )?;

        let mut rows = stmt.query(params![record_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_record(row)?))
        } else {
            Ok(None)
        }
    }

    /// Expected column order: record_id, user_id, namespace, channel_id,
    /// role, kind, content, metadata, ts_micros, seq
    fn row_to_record(row: &rusqlite::Row) -> Result<MemoryRecord> {
        let id_str: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        let namespace: String = row.get(2)?;
        let channel_id: String = row.get(3)?;
        let role_str: String = row.get(4)?;
        let kind_str: String = row.get(5)?;
        let content: String = row.get(6)?;
        let metadata_json: String = row.get(7)?;
        let ts_micros: i64 = row.get(8)?;
        let seq: i64 = row.get(9)?;

        let id = uuid::Uuid::parse_str(&id_str)?;
        let role = Role::parse(&role_str)
            .ok_or_else(|| MemoryError::InvalidData(format!("Unknown role: {role_str}")))?;
        let kind = MemoryKind::parse(&kind_str)
            .ok_or_else(|| MemoryError::InvalidData(format!("Unknown kind: {kind_str}")))?;
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
            embedding: None,
            timestamp,
            sequence: seq as u64,
            metadata,
        })
    }
}
