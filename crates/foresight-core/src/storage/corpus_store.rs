//! SQLite-backed fact corpus and search
//!
//! Reads the upstream `facts`, `evidence` and `fact_evidence` tables. The
//! pipeline never writes here; the `insert_*` helpers exist for loading
//! fixtures and demo data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;

use super::{millis_to_datetime, open_connection, with_connection, SharedConnection};
use crate::corpus::{rank_facts, FactCorpus, SearchHit, SearchRequest, SearchService};
use crate::error::Result;
use crate::types::{Evidence, EvidenceId, Fact, FactId};

/// Upper bound on facts scanned per search
const SEARCH_SCAN_LIMIT: i64 = 2000;

/// Fact corpus stored in SQLite
#[derive(Clone)]
pub struct SqliteCorpus {
    conn: SharedConnection,
}

impl SqliteCorpus {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_connection(path.as_ref())?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS facts (
                id          INTEGER PRIMARY KEY,
                text        TEXT NOT NULL,
                reasoning   TEXT NOT NULL DEFAULT '',
                confidence  REAL NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS evidence (
                id            INTEGER PRIMARY KEY,
                content       TEXT NOT NULL,
                content_type  TEXT NOT NULL,
                created_at    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fact_evidence (
                fact_id      INTEGER NOT NULL REFERENCES facts(id),
                evidence_id  INTEGER NOT NULL REFERENCES evidence(id),
                PRIMARY KEY (fact_id, evidence_id)
            );

            CREATE INDEX IF NOT EXISTS idx_facts_created ON facts(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_evidence_type_created
                ON evidence(content_type, created_at DESC);
            ",
        )?;
        Ok(())
    }

    pub async fn insert_fact(&self, fact: Fact) -> Result<()> {
        with_connection(&self.conn, move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO facts (id, text, reasoning, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    fact.id,
                    fact.text,
                    fact.reasoning,
                    fact.confidence,
                    fact.created_at.timestamp_millis()
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn insert_evidence(&self, evidence: Evidence) -> Result<()> {
        with_connection(&self.conn, move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO evidence (id, content, content_type, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    evidence.id,
                    evidence.content,
                    evidence.content_type,
                    evidence.created_at.timestamp_millis()
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn link(&self, fact_id: FactId, evidence_id: EvidenceId) -> Result<()> {
        with_connection(&self.conn, move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO fact_evidence (fact_id, evidence_id) VALUES (?1, ?2)",
                params![fact_id, evidence_id],
            )?;
            Ok(())
        })
        .await
    }

    fn row_to_fact(row: &Row<'_>) -> rusqlite::Result<Fact> {
        Ok(Fact {
            id: row.get(0)?,
            text: row.get(1)?,
            reasoning: row.get(2)?,
            confidence: row.get(3)?,
            created_at: millis_to_datetime(row.get(4)?),
        })
    }

    fn row_to_evidence(row: &Row<'_>) -> rusqlite::Result<Evidence> {
        Ok(Evidence {
            id: row.get(0)?,
            content: row.get(1)?,
            content_type: row.get(2)?,
            created_at: millis_to_datetime(row.get(3)?),
        })
    }

    fn attached(conn: &Connection, fact_id: FactId) -> rusqlite::Result<Vec<Evidence>> {
        let mut stmt = conn.prepare_cached(
            "SELECT e.id, e.content, e.content_type, e.created_at
             FROM evidence e JOIN fact_evidence fe ON fe.evidence_id = e.id
             WHERE fe.fact_id = ?1
             ORDER BY e.created_at DESC",
        )?;
        let rows = stmt.query_map(params![fact_id], Self::row_to_evidence)?;
        rows.collect()
    }

    fn query_facts(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> rusqlite::Result<Vec<Fact>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_fact)?;
        rows.collect()
    }
}

#[async_trait]
impl FactCorpus for SqliteCorpus {
    async fn fact(&self, id: FactId) -> Result<Option<Fact>> {
        with_connection(&self.conn, move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, text, reasoning, confidence, created_at FROM facts WHERE id = ?1",
                    params![id],
                    Self::row_to_fact,
                )
                .optional()?)
        })
        .await
    }

    async fn evidence_for(&self, fact_id: FactId) -> Result<Vec<Evidence>> {
        with_connection(&self.conn, move |conn| Ok(Self::attached(conn, fact_id)?)).await
    }

    async fn most_evidenced_facts(&self, limit: usize) -> Result<Vec<Fact>> {
        with_connection(&self.conn, move |conn| {
            Ok(Self::query_facts(
                conn,
                "SELECT f.id, f.text, f.reasoning, f.confidence, f.created_at
                 FROM facts f JOIN fact_evidence fe ON fe.fact_id = f.id
                 GROUP BY f.id
                 ORDER BY COUNT(fe.evidence_id) DESC, f.id ASC
                 LIMIT ?1",
                params![limit as i64],
            )?)
        })
        .await
    }

    async fn recent_facts(&self, limit: usize) -> Result<Vec<Fact>> {
        with_connection(&self.conn, move |conn| {
            Ok(Self::query_facts(
                conn,
                "SELECT id, text, reasoning, confidence, created_at FROM facts
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
                params![limit as i64],
            )?)
        })
        .await
    }

    async fn recent_evidence(
        &self,
        content_type: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Evidence>> {
        let content_type = content_type.to_string();
        with_connection(&self.conn, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, content_type, created_at FROM evidence
                 WHERE content_type = ?1 AND created_at >= ?2
                 ORDER BY created_at DESC LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![content_type, since.timestamp_millis(), limit as i64],
                Self::row_to_evidence,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

#[async_trait]
impl SearchService for SqliteCorpus {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let request = request.clone();
        with_connection(&self.conn, move |conn| {
            let facts = Self::query_facts(
                conn,
                "SELECT id, text, reasoning, confidence, created_at FROM facts
                 ORDER BY created_at DESC LIMIT ?1",
                params![SEARCH_SCAN_LIMIT],
            )?;
            let mut hits = Vec::new();
            for (fact, score) in rank_facts(facts, &request, Utc::now()) {
                let evidence = if request.include_evidence {
                    Self::attached(conn, fact.id)?
                } else {
                    Vec::new()
                };
                hits.push(SearchHit { fact, score, evidence });
            }
            Ok(hits)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seeded() -> SqliteCorpus {
        let corpus = SqliteCorpus::open(":memory:").expect("in-memory SQLite should open");
        let now = Utc::now();
        for (id, text, age) in [
            (1, "Working on a Rust parser", 2),
            (2, "Prefers terminal editors", 1),
            (3, "Reads Rust async docs", 0),
        ] {
            corpus
                .insert_fact(Fact {
                    id,
                    text: text.into(),
                    reasoning: "observed".into(),
                    confidence: 8.0,
                    created_at: now - Duration::hours(age),
                })
                .await
                .unwrap();
        }
        for (id, kind, secs) in [(10, "input_text", 30), (11, "input_text", 900), (12, "screenshot", 5)] {
            corpus
                .insert_evidence(Evidence {
                    id,
                    content: format!("content {id}"),
                    content_type: kind.into(),
                    created_at: now - Duration::seconds(secs),
                })
                .await
                .unwrap();
        }
        corpus.link(1, 10).await.unwrap();
        corpus.link(1, 11).await.unwrap();
        corpus.link(3, 12).await.unwrap();
        corpus
    }

    #[tokio::test]
    async fn test_fact_lookup() {
        let corpus = seeded().await;
        assert_eq!(corpus.fact(2).await.unwrap().unwrap().text, "Prefers terminal editors");
        assert!(corpus.fact(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fallback_queries() {
        let corpus = seeded().await;
        let evidenced: Vec<FactId> =
            corpus.most_evidenced_facts(10).await.unwrap().iter().map(|f| f.id).collect();
        assert_eq!(evidenced, vec![1, 3]);

        let recent: Vec<FactId> = corpus.recent_facts(10).await.unwrap().iter().map(|f| f.id).collect();
        assert_eq!(recent, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_evidence_queries() {
        let corpus = seeded().await;
        let attached = corpus.evidence_for(1).await.unwrap();
        assert_eq!(attached.iter().map(|e| e.id).collect::<Vec<_>>(), vec![10, 11]);

        let since = Utc::now() - Duration::minutes(5);
        let recent = corpus.recent_evidence("input_text", since, 3).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, 10);
    }

    #[tokio::test]
    async fn test_search_attaches_evidence() {
        let corpus = seeded().await;
        let hits = corpus.search(&SearchRequest::new("rust", 20)).await.unwrap();
        let ids: Vec<FactId> = hits.iter().map(|h| h.fact.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(hits[1].evidence.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }
}
