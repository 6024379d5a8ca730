//! Suggestion persistence
//!
//! - `save`: every row of a batch in one transaction, `delivered = 0`
//! - `mark_delivered`: flips only rows still undelivered, also transactional
//! - `batch` / `recent`: read helpers for clients and status endpoints
//!
//! A save that returns `Err` has committed nothing. Writers bound their own
//! time: the SQLite store waits for the write lock at most `write_timeout`
//! and rolls back instead of committing once that deadline has passed.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{millis_to_datetime, open_connection, with_connection, SharedConnection};
use crate::error::{ForesightError, Result};
use crate::types::{Suggestion, SuggestionBatch};
use crate::utility::UtilityScore;

/// Durable store for suggestion batches
#[async_trait]
pub trait SuggestionStore: Send + Sync {
    /// Persist every suggestion of the batch atomically; returns their ids.
    ///
    /// Callers treat the result as final and do not abandon the call, so an
    /// implementation must enforce its own deadline.
    async fn save(&self, batch: &SuggestionBatch) -> Result<Vec<Uuid>>;

    /// Flip `delivered` for the listed ids that are still undelivered;
    /// returns how many rows changed
    async fn mark_delivered(&self, ids: &[Uuid]) -> Result<usize>;

    /// Suggestions of one batch, best first
    async fn batch(&self, batch_id: Uuid) -> Result<Vec<Suggestion>>;

    /// Most recently created suggestions
    async fn recent(&self, limit: usize) -> Result<Vec<Suggestion>>;
}

/// SQLite WAL implementation of [`SuggestionStore`]
#[derive(Clone)]
pub struct SqliteSuggestionStore {
    conn: SharedConnection,
    write_timeout: Duration,
}

/// Default bound on one `save`
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str = "id, title, description, category, rationale, expected_utility,
     probability_useful, utility_json, trigger_id, batch_id, delivered, created_at";

impl SqliteSuggestionStore {
    /// Open (or create) the database and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_connection(path.as_ref())?;
        Self::migrate(&conn)?;
        conn.busy_timeout(DEFAULT_WRITE_TIMEOUT)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// Bound `save` (lock wait included) by `timeout`
    pub fn with_write_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.conn.lock().busy_timeout(timeout)?;
        self.write_timeout = timeout;
        Ok(self)
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Idempotent DDL
    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS suggestions (
                id                 TEXT PRIMARY KEY,
                title              TEXT NOT NULL CHECK (length(title) <= 200),
                description        TEXT NOT NULL CHECK (length(description) <= 1000),
                category           TEXT NOT NULL CHECK (length(category) <= 100),
                rationale          TEXT NOT NULL CHECK (length(rationale) <= 500),
                expected_utility   REAL NOT NULL,
                probability_useful REAL NOT NULL,
                utility_json       TEXT,
                trigger_id         INTEGER,
                batch_id           TEXT NOT NULL,
                delivered          INTEGER NOT NULL DEFAULT 0,
                created_at         INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_suggestions_batch
                ON suggestions(batch_id, expected_utility DESC);
            CREATE INDEX IF NOT EXISTS idx_suggestions_created
                ON suggestions(created_at DESC);
            ",
        )?;
        Ok(())
    }

    fn insert_batch(
        conn: &mut Connection,
        suggestions: &[Suggestion],
        deadline: Instant,
    ) -> Result<Vec<Uuid>> {
        // Dropping the transaction without commit rolls back.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO suggestions
                 (id, title, description, category, rationale, expected_utility,
                  probability_useful, utility_json, trigger_id, batch_id, delivered, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11)",
            )?;
            for s in suggestions {
                let utility_json = s.utility.as_ref().map(serde_json::to_string).transpose()?;
                stmt.execute(params![
                    s.id.to_string(),
                    s.title,
                    s.description,
                    s.category,
                    s.rationale,
                    s.expected_utility,
                    s.probability_useful,
                    utility_json,
                    s.trigger_id,
                    s.batch_id.to_string(),
                    s.created_at.timestamp_millis(),
                ])?;
            }
        }
        if Instant::now() >= deadline {
            return Err(ForesightError::PersistenceFailed(
                "write deadline passed before commit; rolled back".into(),
            ));
        }
        tx.commit()?;
        Ok(suggestions.iter().map(|s| s.id).collect())
    }

    fn row_to_suggestion(row: &Row<'_>) -> rusqlite::Result<Suggestion> {
        let id: String = row.get(0)?;
        let batch_id: String = row.get(9)?;
        let utility_json: Option<String> = row.get(7)?;
        Ok(Suggestion {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            title: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            rationale: row.get(4)?,
            expected_utility: row.get(5)?,
            probability_useful: row.get(6)?,
            utility: utility_json.and_then(|j| serde_json::from_str::<UtilityScore>(&j).ok()),
            trigger_id: row.get(8)?,
            batch_id: Uuid::parse_str(&batch_id).unwrap_or_default(),
            delivered: row.get::<_, i64>(10)? != 0,
            created_at: millis_to_datetime(row.get(11)?),
        })
    }

    /// Row counts, for status endpoints
    pub async fn stats(&self) -> Result<serde_json::Value> {
        with_connection(&self.conn, |conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM suggestions", [], |r| r.get(0))?;
            let delivered: i64 = conn.query_row(
                "SELECT COUNT(*) FROM suggestions WHERE delivered = 1",
                [],
                |r| r.get(0),
            )?;
            let batches: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT batch_id) FROM suggestions",
                [],
                |r| r.get(0),
            )?;
            Ok(serde_json::json!({
                "suggestions": total,
                "delivered": delivered,
                "batches": batches,
                "wal_mode": true
            }))
        })
        .await
    }

    /// Look up one suggestion by id
    pub async fn get(&self, id: Uuid) -> Result<Option<Suggestion>> {
        with_connection(&self.conn, move |conn| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM suggestions WHERE id = ?1");
            Ok(conn
                .query_row(&sql, params![id.to_string()], Self::row_to_suggestion)
                .optional()?)
        })
        .await
    }
}

#[async_trait]
impl SuggestionStore for SqliteSuggestionStore {
    async fn save(&self, batch: &SuggestionBatch) -> Result<Vec<Uuid>> {
        let suggestions = batch.suggestions().to_vec();
        let batch_id = batch.batch_id();
        let deadline = Instant::now() + self.write_timeout;
        with_connection(&self.conn, move |conn| {
            Self::insert_batch(conn, &suggestions, deadline).map_err(|e| {
                ForesightError::PersistenceFailed(format!("batch {batch_id}: {e}"))
            })
        })
        .await
    }

    async fn mark_delivered(&self, ids: &[Uuid]) -> Result<usize> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        with_connection(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let mut changed = 0;
            {
                let mut stmt =
                    tx.prepare("UPDATE suggestions SET delivered = 1 WHERE id = ?1 AND delivered = 0")?;
                for id in &ids {
                    changed += stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    async fn batch(&self, batch_id: Uuid) -> Result<Vec<Suggestion>> {
        with_connection(&self.conn, move |conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM suggestions WHERE batch_id = ?1
                 ORDER BY expected_utility DESC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![batch_id.to_string()], Self::row_to_suggestion)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Suggestion>> {
        with_connection(&self.conn, move |conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM suggestions
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit as i64], Self::row_to_suggestion)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

/// In-memory suggestion store for testing
#[derive(Debug, Default)]
pub struct InMemorySuggestionStore {
    rows: RwLock<Vec<Suggestion>>,
}

impl InMemorySuggestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored row, in insertion order
    pub fn all(&self) -> Vec<Suggestion> {
        self.rows.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl SuggestionStore for InMemorySuggestionStore {
    async fn save(&self, batch: &SuggestionBatch) -> Result<Vec<Uuid>> {
        let mut rows = self.rows.write();
        rows.extend(batch.suggestions().iter().cloned().map(|mut s| {
            s.delivered = false;
            s
        }));
        Ok(batch.ids())
    }

    async fn mark_delivered(&self, ids: &[Uuid]) -> Result<usize> {
        let mut rows = self.rows.write();
        let mut changed = 0;
        for row in rows.iter_mut().filter(|r| !r.delivered && ids.contains(&r.id)) {
            row.delivered = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn batch(&self, batch_id: Uuid) -> Result<Vec<Suggestion>> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|s| s.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Suggestion>> {
        Ok(self.rows.read().iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candidate, Priority, Scored};
    use std::time::Duration;

    fn temp_store() -> SqliteSuggestionStore {
        SqliteSuggestionStore::open(":memory:").expect("in-memory SQLite should open")
    }

    fn sample_batch(n: usize) -> SuggestionBatch {
        let suggestions = (0..n)
            .map(|i| {
                let candidate = Candidate {
                    title: format!("Suggestion {i}"),
                    description: "Try the thing".into(),
                    category: "coding".into(),
                    rationale: "Seen in context".into(),
                    priority: Priority::Medium,
                };
                Suggestion::from_candidate(
                    &candidate,
                    Scored::Utility(UtilityScore {
                        benefit: i as f64,
                        ..UtilityScore::NEUTRAL
                    }),
                )
            })
            .collect();
        SuggestionBatch::new(Some(42), suggestions, Duration::from_millis(5), 2)
    }

    #[tokio::test]
    async fn test_save_and_read_batch() {
        let store = temp_store();
        let batch = sample_batch(5);
        let ids = store.save(&batch).await.expect("save should succeed");
        assert_eq!(ids, batch.ids());

        let rows = store.batch(batch.batch_id()).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| !r.delivered && r.trigger_id == Some(42)));
        assert_eq!(rows[0].title, "Suggestion 4");
        assert!(rows[0].utility.is_some());
    }

    #[tokio::test]
    async fn test_mark_delivered_flips_once() {
        let store = temp_store();
        let batch = sample_batch(3);
        let ids = store.save(&batch).await.unwrap();

        assert_eq!(store.mark_delivered(&ids).await.unwrap(), 3);
        assert_eq!(store.mark_delivered(&ids).await.unwrap(), 0);

        let row = store.get(ids[0]).await.unwrap().expect("row exists");
        assert!(row.delivered);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_no_rows() {
        let store = temp_store();
        let batch = sample_batch(3);
        store.save(&batch).await.unwrap();

        // Same ids again: the first insert of the second save violates the
        // primary key and the whole transaction rolls back.
        let err = store.save(&batch).await.unwrap_err();
        assert_eq!(err.error_type(), "persistence_failed");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats["suggestions"], 3);
        assert_eq!(stats["batches"], 1);
    }

    #[tokio::test]
    async fn test_save_rolls_back_when_lock_outlasts_write_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foresight.db");
        let store = SqliteSuggestionStore::open(&path)
            .unwrap()
            .with_write_timeout(Duration::from_millis(200))
            .unwrap();

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder_path = path.clone();
        let holder = std::thread::spawn(move || {
            let conn = Connection::open(&holder_path).unwrap();
            conn.execute_batch("BEGIN IMMEDIATE").unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(800));
            conn.execute_batch("COMMIT").unwrap();
        });
        locked_rx.recv().unwrap();

        let err = store.save(&sample_batch(5)).await.unwrap_err();
        assert_eq!(err.error_type(), "persistence_failed");

        holder.join().unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats["suggestions"], 0);
    }

    #[tokio::test]
    async fn test_save_past_deadline_commits_nothing() {
        let store = temp_store().with_write_timeout(Duration::ZERO).unwrap();
        let err = store.save(&sample_batch(3)).await.unwrap_err();
        assert_eq!(err.error_type(), "persistence_failed");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats["suggestions"], 0);
    }

    #[tokio::test]
    async fn test_recent_newest_first() {
        let store = temp_store();
        let first = sample_batch(2);
        let second = sample_batch(2);
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let recent = store.recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].batch_id, second.batch_id());
    }

    #[tokio::test]
    async fn test_file_backed_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("foresight.db");
        let batch = sample_batch(1);
        {
            let store = SqliteSuggestionStore::open(&path).unwrap();
            store.save(&batch).await.unwrap();
        }
        let store = SqliteSuggestionStore::open(&path).unwrap();
        assert_eq!(store.batch(batch.batch_id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemorySuggestionStore::new();
        let batch = sample_batch(2);
        let ids = store.save(&batch).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.mark_delivered(&ids[..1]).await.unwrap(), 1);
        assert_eq!(store.mark_delivered(&ids).await.unwrap(), 1);
        assert_eq!(store.recent(1).await.unwrap()[0].id, ids[1]);
    }
}
