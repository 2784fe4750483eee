//! Vector storage and similarity search using sqlite-vec.
//!
//! Embeddings live in a vec0 virtual table partitioned by owner key, so a
//! nearest-neighbor scan can never cross a `(user_id, namespace)` boundary.

use rusqlite::{Connection, params};
use tracing::{debug, info};
use zerocopy::IntoBytes;

use crate::error::Result;

/// Default embedding dimensions (MiniLM-L6-v2 produces 384-dim vectors).
pub const DEFAULT_EMBEDDING_DIMS: usize = 384;

/// Initialize sqlite-vec extension for a connection.
///
/// This must be called before using any vector operations.
/// Note: `sqlite3_auto_extension` applies globally to all connections.
pub fn init_vector_extension() {
    use rusqlite::ffi::sqlite3_auto_extension;
    use sqlite_vec::sqlite3_vec_init;

    unsafe {
        #[allow(clippy::missing_transmute_annotations)]
        sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
    }
}

/// Check if sqlite-vec extension is loaded.
pub fn check_vector_extension(conn: &Connection) -> Result<String> {
    let version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
    Ok(version)
}

/// Create the vector embeddings table.
///
/// The owner key is a vec0 partition key: KNN queries constrained on it are
/// isolated to that partition.
pub fn create_vector_table(conn: &Connection, dims: usize) -> Result<()> {
    let sql = format!(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS turn_embeddings USING vec0(
            record_id TEXT PRIMARY KEY,
            owner_key TEXT PARTITION KEY,
            embedding float[{dims}]
        )
        "#
    );

    conn.execute_batch(&sql)?;

    info!("Created turn_embeddings table with {} dimensions", dims);
    Ok(())
}

/// Store an embedding for a record.
///
/// If an embedding already exists for this record, it is replaced.
pub fn store_embedding(
    conn: &Connection,
    record_id: &str,
    owner_key: &str,
    embedding: &[f32],
) -> Result<()> {
    // vec0 doesn't support INSERT OR REPLACE, so delete first if exists
    conn.execute(
        "DELETE FROM turn_embeddings WHERE record_id = ?1",
        params![record_id],
    )?;

    conn.execute(
        "INSERT INTO turn_embeddings (record_id, owner_key, embedding) VALUES (?1, ?2, ?3)",
        params![record_id, owner_key, embedding.as_bytes()],
    )?;

    debug!("Stored embedding for record {}", record_id);
    Ok(())
}

/// Result of a similarity search.
#[derive(Debug, Clone)]
pub struct SimilarityHit {
    /// The record id.
    pub record_id: String,
    /// Distance from the query vector (lower = more similar).
    pub distance: f32,
}

/// Search an owner's partition for records similar to a query embedding.
///
/// Returns the top-k most similar records ordered by distance (ascending).
pub fn search_similar(
    conn: &Connection,
    owner_key: &str,
    query_embedding: &[f32],
    limit: usize,
) -> Result<Vec<SimilarityHit>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT record_id, distance
        FROM turn_embeddings
        WHERE embedding MATCH ?1
          AND owner_key = ?2
        ORDER BY distance
        LIMIT ?3
        "#,
    )?;

    let mut rows = stmt.query(params![query_embedding.as_bytes(), owner_key, limit as i64])?;

    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        results.push(SimilarityHit {
            record_id: row.get(0)?,
            distance: row.get(1)?,
        });
    }

    debug!(
        "Found {} similar records (limit: {})",
        results.len(),
        limit
    );
    Ok(results)
}

/// Get the count of stored embeddings, optionally for one owner.
pub fn count_embeddings(conn: &Connection, owner_key: Option<&str>) -> Result<usize> {
    let count: i64 = match owner_key {
        Some(owner) => conn.query_row(
            "SELECT COUNT(*) FROM turn_embeddings WHERE owner_key = ?1",
            params![owner],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM turn_embeddings", [], |row| row.get(0))?,
    };
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_connection() -> Connection {
        init_vector_extension();
        let conn = Connection::open_in_memory().unwrap();
        create_vector_table(&conn, 4).unwrap(); // Small dims for testing
        conn
    }

    #[test]
    fn test_vector_extension_loads() {
        init_vector_extension();
        let conn = Connection::open_in_memory().unwrap();
        let version = check_vector_extension(&conn).unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn test_store_and_count() {
        let conn = create_test_connection();

        store_embedding(&conn, "r1", "alice/bot", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        store_embedding(&conn, "r2", "bob/bot", &[0.0, 1.0, 0.0, 0.0]).unwrap();

        assert_eq!(count_embeddings(&conn, None).unwrap(), 2);
        assert_eq!(count_embeddings(&conn, Some("alice/bot")).unwrap(), 1);
    }

    #[test]
    fn test_similarity_search_ordering() {
        let conn = create_test_connection();

        store_embedding(&conn, "exact", "o", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        store_embedding(&conn, "close", "o", &[0.9, 0.1, 0.0, 0.0]).unwrap();
        store_embedding(&conn, "far", "o", &[0.0, 0.0, 1.0, 0.0]).unwrap();

        let results = search_similar(&conn, "o", &[1.0, 0.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].record_id, "exact");
        assert!(results[0].distance < 0.01);
        assert_eq!(results[1].record_id, "close");
        assert_eq!(results[2].record_id, "far");
    }

    #[test]
    fn test_partition_isolation() {
        let conn = create_test_connection();

        store_embedding(&conn, "mine", "alice/bot", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        store_embedding(&conn, "theirs", "bob/bot", &[1.0, 0.0, 0.0, 0.0]).unwrap();

        let results = search_similar(&conn, "alice/bot", &[1.0, 0.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record_id, "mine");
    }

    #[test]
    fn test_update_embedding() {
        let conn = create_test_connection();

        store_embedding(&conn, "r1", "o", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        store_embedding(&conn, "r1", "o", &[0.0, 1.0, 0.0, 0.0]).unwrap();

        assert_eq!(count_embeddings(&conn, None).unwrap(), 1);

        let results = search_similar(&conn, "o", &[0.0, 1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].record_id, "r1");
        assert!(results[0].distance < 0.01);
    }
}
