//! SQLite relational store
//!
//! A single connection guarded by an async mutex. A transaction owns the
//! guard for its whole lifetime, so transactions are serialized and the
//! conditional entity update never actually loses a race on this backend.
//! Statements run on tokio's blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{render_sql, RelationalStore, RelationalTx, RELATED_ENTITIES_SQL, RELATIONAL, TOP_ENTITIES_SQL};
use crate::models::{
    normalize_name, DocumentEntity, DocumentRecord, Entity, EntityKey, EntityStatistics,
    EntityType, GraphMutation, Metadata, NewEntity, RelatedEntity, SyncRecord, SyncState,
    TopEntity,
};
use crate::ontology::error::{OntologyError, OntologyResult};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        source_url TEXT NOT NULL,
        summary TEXT NOT NULL DEFAULT '',
        topics TEXT NOT NULL DEFAULT '[]',
        revision INTEGER NOT NULL DEFAULT 0,
        processed_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS entities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        normalized_name TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        confidence_score REAL NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (normalized_name, entity_type)
    );

    CREATE INDEX IF NOT EXISTS idx_entities_normalized_name
        ON entities(normalized_name);

    CREATE TABLE IF NOT EXISTS document_entities (
        document_id TEXT NOT NULL REFERENCES documents(id),
        entity_id INTEGER NOT NULL REFERENCES entities(id),
        mention_count INTEGER NOT NULL,
        contexts TEXT NOT NULL DEFAULT '[]',
        sentiment REAL,
        sentiment_samples INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (document_id, entity_id)
    );

    CREATE INDEX IF NOT EXISTS idx_document_entities_entity
        ON document_entities(entity_id);

    CREATE TABLE IF NOT EXISTS document_sync (
        document_id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        revision INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        payload TEXT,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_document_sync_state
        ON document_sync(state, updated_at);

    CREATE TABLE IF NOT EXISTS ingestion_jobs (
        job_id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        completed_at TEXT NOT NULL
    );
"#;

const ENTITY_COLUMNS: &str =
    "id, name, normalized_name, entity_type, confidence_score, metadata, version, created_at, updated_at";

const ASSOCIATION_COLUMNS: &str =
    "document_id, entity_id, mention_count, contexts, sentiment, sentiment_samples, updated_at";

const SYNC_COLUMNS: &str = "document_id, state, revision, attempts, last_error, payload, updated_at";

/// Map a rusqlite error, treating lock contention as unavailability
pub(crate) fn db_err(err: rusqlite::Error) -> OntologyError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
            ) =>
        {
            OntologyError::unavailable(RELATIONAL, err)
        }
        _ => OntologyError::store(RELATIONAL, err),
    }
}

fn conversion_err(idx: usize, reason: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(OntologyError::Serialization {
            reason: reason.to_string(),
        }),
    )
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, format!("invalid timestamp '{raw}': {e}")))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        normalized_name: row.get(2)?,
        entity_type: EntityType::parse(&row.get::<_, String>(3)?).unwrap_or(EntityType::Other),
        confidence_score: row.get(4)?,
        metadata: json_column(row, 5)?,
        version: row.get(6)?,
        created_at: ts_column(row, 7)?,
        updated_at: ts_column(row, 8)?,
    })
}

fn association_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentEntity> {
    Ok(DocumentEntity {
        document_id: row.get(0)?,
        entity_id: row.get(1)?,
        mention_count: row.get(2)?,
        contexts: json_column(row, 3)?,
        sentiment: row.get(4)?,
        sentiment_samples: row.get(5)?,
        updated_at: ts_column(row, 6)?,
    })
}

fn sync_from_row(row: &Row<'_>) -> rusqlite::Result<SyncRecord> {
    let state: String = row.get(1)?;
    let payload: Option<String> = row.get(5)?;
    let payload = match payload {
        Some(raw) => Some(
            serde_json::from_str::<GraphMutation>(&raw).map_err(|e| conversion_err(5, e))?,
        ),
        None => None,
    };

    Ok(SyncRecord {
        document_id: row.get(0)?,
        state: SyncState::parse(&state)
            .ok_or_else(|| conversion_err(1, format!("unknown sync state '{state}'")))?,
        revision: row.get(2)?,
        attempts: row.get(3)?,
        last_error: row.get(4)?,
        payload,
        updated_at: ts_column(row, 6)?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> OntologyResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn load_sync_record(conn: &Connection, document_id: &str) -> OntologyResult<Option<SyncRecord>> {
    conn.query_row(
        &format!("SELECT {SYNC_COLUMNS} FROM document_sync WHERE document_id = ?1"),
        params![document_id],
        sync_from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Run blocking SQLite work on the blocking pool while holding the connection
///
/// A caller that stops waiting (store timeout, cancellation) gets control back
/// at once; the statement finishes in the background and then releases the
/// connection.
pub(crate) async fn run_blocking<T, F>(
    store: &'static str,
    conn: Arc<Mutex<Connection>>,
    f: F,
) -> OntologyResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> OntologyResult<T> + Send + 'static,
{
    let mut conn = conn.lock_owned().await;
    tokio::task::spawn_blocking(move || f(&mut conn))
        .await
        .map_err(|e| OntologyError::unavailable(store, format!("blocking task failed: {e}")))?
}

// ============================================================================
// Transaction
// ============================================================================

/// Connection owned by an open transaction; rolls back unless committed
struct TxConn {
    conn: OwnedMutexGuard<Connection>,
    committed: bool,
}

impl Drop for TxConn {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "SQLite rollback failed");
            }
        }
    }
}

/// Open SQLite transaction holding the connection
///
/// Each statement runs on the blocking pool with the connection moved into
/// the task. If the caller abandons a statement, the transaction is rolled
/// back when that statement returns.
pub struct SqliteTx {
    inner: Option<TxConn>,
}

impl SqliteTx {
    async fn run<T, F>(&mut self, f: F) -> OntologyResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut TxConn) -> OntologyResult<T> + Send + 'static,
    {
        let tx = self.inner.take().ok_or_else(|| {
            OntologyError::unavailable(RELATIONAL, "transaction abandoned by an earlier statement")
        })?;

        let (tx, result) = tokio::task::spawn_blocking(move || {
            let mut tx = tx;
            let result = f(&mut tx);
            (tx, result)
        })
        .await
        .map_err(|e| OntologyError::unavailable(RELATIONAL, format!("blocking task failed: {e}")))?;

        self.inner = Some(tx);
        result
    }
}

#[async_trait]
impl RelationalTx for SqliteTx {
    async fn upsert_document(&mut self, document: &DocumentRecord) -> OntologyResult<i64> {
        let topics = to_json(&document.topics)?;
        let document = document.clone();
        self.run(move |tx| {
            tx.conn
                .query_row(
                    r#"
                    INSERT INTO documents (id, source_url, summary, topics, revision, processed_at)
                    VALUES (?1, ?2, ?3, ?4, 1, ?5)
                    ON CONFLICT(id) DO UPDATE SET
                        source_url = excluded.source_url,
                        summary = excluded.summary,
                        topics = excluded.topics,
                        revision = documents.revision + 1,
                        processed_at = excluded.processed_at
                    RETURNING revision
                    "#,
                    params![
                        document.id,
                        document.source_url,
                        document.summary,
                        topics,
                        Utc::now().to_rfc3339()
                    ],
                    |row| row.get(0),
                )
                .map_err(db_err)
        })
        .await
    }

    async fn find_entity(&mut self, key: &EntityKey) -> OntologyResult<Option<Entity>> {
        let key = key.clone();
        self.run(move |tx| {
            tx.conn
                .query_row(
                    &format!(
                        "SELECT {ENTITY_COLUMNS} FROM entities WHERE normalized_name = ?1 AND entity_type = ?2"
                    ),
                    params![key.normalized_name, key.entity_type.as_str()],
                    entity_from_row,
                )
                .optional()
                .map_err(db_err)
        })
        .await
    }

    async fn insert_entity(&mut self, entity: &NewEntity) -> OntologyResult<Option<Entity>> {
        let metadata = to_json(&entity.metadata)?;
        let entity = entity.clone();
        self.run(move |tx| {
            tx.conn
                .query_row(
                    &format!(
                        r#"
                        INSERT INTO entities
                            (name, normalized_name, entity_type, confidence_score, metadata, version, created_at, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
                        ON CONFLICT(normalized_name, entity_type) DO NOTHING
                        RETURNING {ENTITY_COLUMNS}
                        "#
                    ),
                    params![
                        entity.name,
                        entity.key.normalized_name,
                        entity.key.entity_type.as_str(),
                        entity.confidence_score,
                        metadata,
                        Utc::now().to_rfc3339()
                    ],
                    entity_from_row,
                )
                .optional()
                .map_err(db_err)
        })
        .await
    }

    async fn update_entity_metadata(
        &mut self,
        entity_id: i64,
        expected_version: i64,
        metadata: &Metadata,
        confidence_score: f64,
    ) -> OntologyResult<bool> {
        let metadata = to_json(metadata)?;
        let updated = self
            .run(move |tx| {
                tx.conn
                    .execute(
                        r#"
                        UPDATE entities
                        SET metadata = ?1, confidence_score = ?2, version = version + 1, updated_at = ?3
                        WHERE id = ?4 AND version = ?5
                        "#,
                        params![
                            metadata,
                            confidence_score,
                            Utc::now().to_rfc3339(),
                            entity_id,
                            expected_version
                        ],
                    )
                    .map_err(db_err)
            })
            .await?;
        Ok(updated == 1)
    }

    async fn find_association(
        &mut self,
        document_id: &str,
        entity_id: i64,
    ) -> OntologyResult<Option<DocumentEntity>> {
        let document_id = document_id.to_string();
        self.run(move |tx| {
            tx.conn
                .query_row(
                    &format!(
                        "SELECT {ASSOCIATION_COLUMNS} FROM document_entities WHERE document_id = ?1 AND entity_id = ?2"
                    ),
                    params![document_id, entity_id],
                    association_from_row,
                )
                .optional()
                .map_err(db_err)
        })
        .await
    }

    async fn save_association(&mut self, association: &DocumentEntity) -> OntologyResult<()> {
        let contexts = to_json(&association.contexts)?;
        let association = association.clone();
        self.run(move |tx| {
            tx.conn
                .execute(
                    r#"
                    INSERT INTO document_entities
                        (document_id, entity_id, mention_count, contexts, sentiment, sentiment_samples, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(document_id, entity_id) DO UPDATE SET
                        mention_count = excluded.mention_count,
                        contexts = excluded.contexts,
                        sentiment = excluded.sentiment,
                        sentiment_samples = excluded.sentiment_samples,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        association.document_id,
                        association.entity_id,
                        association.mention_count,
                        contexts,
                        association.sentiment,
                        association.sentiment_samples,
                        association.updated_at.to_rfc3339()
                    ],
                )
                .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn find_sync_record(&mut self, document_id: &str) -> OntologyResult<Option<SyncRecord>> {
        let document_id = document_id.to_string();
        self.run(move |tx| load_sync_record(&tx.conn, &document_id)).await
    }

    async fn save_sync_record(&mut self, record: &SyncRecord) -> OntologyResult<()> {
        let payload = record.payload.as_ref().map(to_json).transpose()?;
        let record = record.clone();
        self.run(move |tx| {
            tx.conn
                .execute(
                    r#"
                    INSERT INTO document_sync
                        (document_id, state, revision, attempts, last_error, payload, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(document_id) DO UPDATE SET
                        state = excluded.state,
                        revision = excluded.revision,
                        attempts = excluded.attempts,
                        last_error = excluded.last_error,
                        payload = excluded.payload,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        record.document_id,
                        record.state.as_str(),
                        record.revision,
                        record.attempts,
                        record.last_error,
                        payload,
                        record.updated_at.to_rfc3339()
                    ],
                )
                .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn commit(mut self: Box<Self>) -> OntologyResult<()> {
        self.run(|tx| {
            tx.conn.execute_batch("COMMIT").map_err(db_err)?;
            tx.committed = true;
            Ok(())
        })
        .await
    }
}

// ============================================================================
// Store
// ============================================================================

/// SQLite implementation of [`RelationalStore`]
#[derive(Clone)]
pub struct SqliteRelationalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRelationalStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> OntologyResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OntologyError::unavailable(RELATIONAL, e))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(db_err)?;

        let store = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), "SQLite relational store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> OntologyResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> OntologyResult<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> OntologyResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> OntologyResult<T> + Send + 'static,
    {
        run_blocking(RELATIONAL, Arc::clone(&self.conn), f).await
    }
}

fn query_all<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> OntologyResult<Vec<T>>
where
    P: rusqlite::Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params, map)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

#[async_trait]
impl RelationalStore for SqliteRelationalStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn begin(&self) -> OntologyResult<Box<dyn RelationalTx>> {
        let conn = Arc::clone(&self.conn).lock_owned().await;
        let tx = tokio::task::spawn_blocking(move || -> OntologyResult<TxConn> {
            conn.execute_batch("BEGIN IMMEDIATE").map_err(db_err)?;
            Ok(TxConn {
                conn,
                committed: false,
            })
        })
        .await
        .map_err(|e| OntologyError::unavailable(RELATIONAL, format!("blocking task failed: {e}")))??;

        Ok(Box::new(SqliteTx { inner: Some(tx) }))
    }

    async fn sync_record(&self, document_id: &str) -> OntologyResult<Option<SyncRecord>> {
        let document_id = document_id.to_string();
        self.with_conn(move |conn| load_sync_record(conn, &document_id)).await
    }

    async fn update_sync_state(
        &self,
        document_id: &str,
        expected_revision: i64,
        state: SyncState,
        attempts: u32,
        last_error: Option<&str>,
    ) -> OntologyResult<bool> {
        let document_id = document_id.to_string();
        let last_error = last_error.map(str::to_string);
        let updated = self
            .with_conn(move |conn| {
                conn.execute(
                    r#"
                    UPDATE document_sync
                    SET state = ?1,
                        attempts = ?2,
                        last_error = ?3,
                        payload = CASE WHEN ?1 = 'GRAPH_SYNCED' THEN NULL ELSE payload END,
                        updated_at = ?4
                    WHERE document_id = ?5 AND revision = ?6
                    "#,
                    params![
                        state.as_str(),
                        attempts,
                        last_error,
                        Utc::now().to_rfc3339(),
                        document_id,
                        expected_revision
                    ],
                )
                .map_err(db_err)
            })
            .await?;
        Ok(updated == 1)
    }

    async fn pending_graph_syncs(&self, limit: usize) -> OntologyResult<Vec<SyncRecord>> {
        self.with_conn(move |conn| {
            query_all(
                conn,
                &format!(
                    r#"
                    SELECT {SYNC_COLUMNS} FROM document_sync
                    WHERE state IN ('RELATIONAL_COMMITTED', 'GRAPH_PENDING')
                    ORDER BY updated_at ASC, document_id ASC
                    LIMIT ?1
                    "#
                ),
                params![limit as i64],
                sync_from_row,
            )
        })
        .await
    }

    async fn count_sync_state(&self, state: SyncState) -> OntologyResult<i64> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM document_sync WHERE state = ?1",
                params![state.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
        .await
    }

    async fn is_job_completed(&self, job_id: &str) -> OntologyResult<bool> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM ingestion_jobs WHERE job_id = ?1)",
                params![job_id],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
        .await
    }

    async fn complete_job(&self, job_id: &str, document_id: &str) -> OntologyResult<()> {
        let job_id = job_id.to_string();
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO ingestion_jobs (job_id, document_id, completed_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(job_id) DO NOTHING
                "#,
                params![job_id, document_id, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn document(&self, document_id: &str) -> OntologyResult<Option<DocumentRecord>> {
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, source_url, summary, topics FROM documents WHERE id = ?1",
                params![document_id],
                |row| {
                    Ok(DocumentRecord {
                        id: row.get(0)?,
                        source_url: row.get(1)?,
                        summary: row.get(2)?,
                        topics: json_column(row, 3)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn entity(&self, entity_id: i64) -> OntologyResult<Option<Entity>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"),
                params![entity_id],
                entity_from_row,
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn find_entities_by_name(&self, name: &str) -> OntologyResult<Vec<Entity>> {
        let normalized = normalize_name(name);
        self.with_conn(move |conn| {
            query_all(
                conn,
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE normalized_name = ?1 ORDER BY id"),
                params![normalized],
                entity_from_row,
            )
        })
        .await
    }

    async fn associations_for_document(
        &self,
        document_id: &str,
    ) -> OntologyResult<Vec<DocumentEntity>> {
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {ASSOCIATION_COLUMNS} FROM document_entities WHERE document_id = ?1 ORDER BY entity_id"
                ),
                params![document_id],
                association_from_row,
            )
        })
        .await
    }

    async fn associations_for_entity(&self, entity_id: i64) -> OntologyResult<Vec<DocumentEntity>> {
        self.with_conn(move |conn| {
            query_all(
                conn,
                &format!(
                    r#"
                    SELECT {ASSOCIATION_COLUMNS} FROM document_entities
                    WHERE entity_id = ?1
                    ORDER BY mention_count DESC, document_id ASC
                    "#
                ),
                params![entity_id],
                association_from_row,
            )
        })
        .await
    }

    async fn related_entities(&self, name: &str, limit: usize) -> OntologyResult<Vec<RelatedEntity>> {
        let normalized = normalize_name(name);
        self.with_conn(move |conn| {
            query_all(
                conn,
                &render_sql(RELATED_ENTITIES_SQL, "?1", "?2"),
                params![normalized, limit as i64],
                |row| {
                    Ok(RelatedEntity {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        entity_type: EntityType::parse(&row.get::<_, String>(2)?)
                            .unwrap_or(EntityType::Other),
                        co_occurrence_count: row.get(3)?,
                    })
                },
            )
        })
        .await
    }

    async fn entity_statistics(&self, top_n: usize) -> OntologyResult<EntityStatistics> {
        self.with_conn(move |conn| {
            let mut stats = EntityStatistics::default();

            let counts = query_all(
                conn,
                "SELECT entity_type, COUNT(*) FROM entities GROUP BY entity_type",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )?;
            for (entity_type, count) in counts {
                stats.total_entities += count;
                stats.counts_by_type.insert(entity_type, count);
            }

            stats.total_mentions = conn
                .query_row(
                    "SELECT COALESCE(SUM(mention_count), 0) FROM document_entities",
                    [],
                    |row| row.get(0),
                )
                .map_err(db_err)?;

            stats.top_entities = query_all(
                conn,
                &render_sql(TOP_ENTITIES_SQL, "", "?1"),
                params![top_n as i64],
                |row| {
                    Ok(TopEntity {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        entity_type: EntityType::parse(&row.get::<_, String>(2)?)
                            .unwrap_or(EntityType::Other),
                        mention_count: row.get(3)?,
                    })
                },
            )?;

            Ok(stats)
        })
        .await
    }
}
