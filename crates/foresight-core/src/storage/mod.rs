//! Persistent Storage Layer: SQLite WAL
//!
//! Two stores share one connection recipe:
//!
//! ```text
//! ┌──────────────────────────────┬─────────────────────────────────┐
//! │ SqliteSuggestionStore        │ SqliteCorpus (read-only)        │
//! │  suggestions (batch rows)    │  facts · evidence · fact_evidence│
//! └──────────────────────────────┴─────────────────────────────────┘
//!         ↓ WAL mode: concurrent reads, serialized writes
//! ```
//!
//! Connections are blocking, so every async method hops onto the blocking
//! pool with `spawn_blocking` and holds the connection mutex only there.
//!
//! # Example
//!
//! ```no_run
//! use foresight_core::storage::SqliteSuggestionStore;
//!
//! # fn example() -> foresight_core::Result<()> {
//! let store = SqliteSuggestionStore::open(".foresight/foresight.db")?;
//! # Ok(())
//! # }
//! ```

pub mod corpus_store;
pub mod suggestion_store;

pub use corpus_store::SqliteCorpus;
pub use suggestion_store::{InMemorySuggestionStore, SqliteSuggestionStore, SuggestionStore};

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ForesightError, Result, ResultExt};

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

/// Open (or create) a SQLite database in WAL mode
pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    let in_memory = path.as_os_str() == ":memory:";
    if !in_memory {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)
        .map_err(ForesightError::from)
        .with_context(|| format!("Opening SQLite '{}'", path.display()))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(ForesightError::from)
    .context("Configuring SQLite pragmas")?;

    Ok(conn)
}

/// Run `f` against the shared connection on the blocking pool
pub(crate) async fn with_connection<T, F>(conn: &SharedConnection, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock();
        f(&mut guard)
    })
    .await
    .map_err(|e| ForesightError::PersistenceFailed(format!("storage task aborted: {e}")))?
}

pub(crate) fn millis_to_datetime(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
