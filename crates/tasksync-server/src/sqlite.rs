//! SQLite document store using rusqlite.
//!
//! One row per document in `collaborative_documents`, plus the append-only
//! `collaborative_updates` log. WAL mode by default. All calls run on the
//! blocking pool so a slow disk never stalls the async runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;

use crate::error::StoreError;
use crate::store::{DocumentStore, StoredSnapshot, UpdateLogEntry};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Use write-ahead logging. Defaults to true.
    pub wal: bool,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            wal: true,
            busy_timeout_ms: 5000,
        }
    }
}

/// SQLite-backed [`DocumentStore`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database at `path` with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn, &config)?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), StoreError> {
        let journal = if config.wal { "WAL" } else { "DELETE" };
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA synchronous = NORMAL;",
            journal, config.busy_timeout_ms,
        ))?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS collaborative_documents (
                document_id   TEXT PRIMARY KEY,
                state_vector  BLOB NOT NULL,
                full_state    BLOB NOT NULL,
                updated_at    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS collaborative_updates (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id   TEXT NOT NULL,
                author_id     TEXT NOT NULL,
                update_bytes  BLOB NOT NULL,
                created_at    INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_updates_document
                ON collaborative_updates(document_id, id);",
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut conn.lock())).await?
    }
}

fn to_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

fn read_snapshot(conn: &Connection, document_id: &str) -> Result<Option<StoredSnapshot>, StoreError> {
    let row = conn
        .query_row(
            "SELECT full_state, state_vector, updated_at
             FROM collaborative_documents WHERE document_id = ?1",
            params![document_id],
            |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(full_state, state_vector, updated_at)| {
        Ok(StoredSnapshot {
            full_state,
            state_vector,
            updated_at: from_millis(updated_at)?,
        })
    })
    .transpose()
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, document_id: &str) -> Result<Option<StoredSnapshot>, StoreError> {
        let document_id = document_id.to_string();
        self.with_conn(move |conn| read_snapshot(conn, &document_id))
            .await
    }

    async fn put(&self, document_id: &str, snapshot: StoredSnapshot) -> Result<(), StoreError> {
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO collaborative_documents (document_id, state_vector, full_state, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(document_id) DO UPDATE SET
                    state_vector = excluded.state_vector,
                    full_state = excluded.full_state,
                    updated_at = excluded.updated_at",
                params![
                    document_id,
                    snapshot.state_vector,
                    snapshot.full_state,
                    to_millis(&snapshot.updated_at)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_if_absent(
        &self,
        document_id: &str,
        snapshot: StoredSnapshot,
    ) -> Result<Option<StoredSnapshot>, StoreError> {
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(existing) = read_snapshot(&tx, &document_id)? {
                return Ok(Some(existing));
            }
            tx.execute(
                "INSERT INTO collaborative_documents (document_id, state_vector, full_state, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    document_id,
                    snapshot.state_vector,
                    snapshot.full_state,
                    to_millis(&snapshot.updated_at)
                ],
            )?;
            tx.commit()?;
            Ok(None)
        })
        .await
    }

    async fn append_log(&self, entry: UpdateLogEntry) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO collaborative_updates (document_id, author_id, update_bytes, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.document_id,
                    entry.author_id,
                    entry.update,
                    to_millis(&entry.created_at)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn log_entries(&self, document_id: &str) -> Result<Vec<UpdateLogEntry>, StoreError> {
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT author_id, update_bytes, created_at
                 FROM collaborative_updates WHERE document_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![document_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (author_id, update, created_at) = row?;
                entries.push(UpdateLogEntry {
                    document_id: document_id.clone(),
                    author_id,
                    update,
                    created_at: from_millis(created_at)?,
                });
            }
            Ok(entries)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("list-1").await.unwrap().is_none());

        let snapshot = StoredSnapshot::new(vec![1, 2, 3], vec![4]);
        store.put("list-1", snapshot.clone()).await.unwrap();

        let loaded = store.get("list-1").await.unwrap().unwrap();
        assert_eq!(loaded.full_state, snapshot.full_state);
        assert_eq!(loaded.state_vector, snapshot.state_vector);
        assert_eq!(
            loaded.updated_at.timestamp_millis(),
            snapshot.updated_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("d", StoredSnapshot::new(vec![1], vec![])).await.unwrap();
        store.put("d", StoredSnapshot::new(vec![2], vec![])).await.unwrap();
        assert_eq!(store.get("d").await.unwrap().unwrap().full_state, vec![2]);
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store
            .insert_if_absent("d", StoredSnapshot::new(vec![1], vec![]))
            .await
            .unwrap();
        assert!(first.is_none());

        let existing = store
            .insert_if_absent("d", StoredSnapshot::new(vec![2], vec![]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(existing.full_state, vec![1]);
    }

    #[tokio::test]
    async fn test_update_log_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..3u8 {
            store
                .append_log(UpdateLogEntry::new("d", format!("user-{}", i), vec![i]))
                .await
                .unwrap();
        }
        let entries = store.log_entries("d").await.unwrap();
        let authors: Vec<_> = entries.iter().map(|e| e.author_id.as_str()).collect();
        assert_eq!(authors, vec!["user-0", "user-1", "user-2"]);
        assert!(store.log_entries("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("d", StoredSnapshot::new(vec![7], vec![8])).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("d").await.unwrap().unwrap().full_state, vec![7]);
    }
}
