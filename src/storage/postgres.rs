//! PostgreSQL relational store
//!
//! Connection pooling via deadpool. Each transaction checks out one pooled
//! client and returns it when committed or dropped, so no connection is held
//! across unrelated documents.

use async_trait::async_trait;
use deadpool_postgres::{
    Config as PoolConfig, ManagerConfig, Object, Pool, PoolConfig as PoolSize, RecyclingMethod,
    Runtime,
};
use serde::de::DeserializeOwned;
use tokio_postgres::{NoTls, Row};

use super::{render_sql, RelationalStore, RelationalTx, RELATED_ENTITIES_SQL, RELATIONAL, TOP_ENTITIES_SQL};
use crate::config::PostgresConfig;
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
        topics JSONB NOT NULL DEFAULT '[]',
        revision BIGINT NOT NULL DEFAULT 0,
        processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE TABLE IF NOT EXISTS entities (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        normalized_name TEXT NOT NULL,
        entity_type VARCHAR(32) NOT NULL,
        confidence_score DOUBLE PRECISION NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}',
        version BIGINT NOT NULL DEFAULT 1,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (normalized_name, entity_type)
    );

    CREATE INDEX IF NOT EXISTS idx_entities_normalized_name
        ON entities(normalized_name);

    CREATE TABLE IF NOT EXISTS document_entities (
        document_id TEXT NOT NULL REFERENCES documents(id),
        entity_id BIGINT NOT NULL REFERENCES entities(id),
        mention_count BIGINT NOT NULL,
        contexts JSONB NOT NULL DEFAULT '[]',
        sentiment DOUBLE PRECISION,
        sentiment_samples BIGINT NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (document_id, entity_id)
    );

    CREATE INDEX IF NOT EXISTS idx_document_entities_entity
        ON document_entities(entity_id);

    CREATE TABLE IF NOT EXISTS document_sync (
        document_id TEXT PRIMARY KEY,
        state VARCHAR(32) NOT NULL,
        revision BIGINT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        payload JSONB,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS idx_document_sync_state
        ON document_sync(state, updated_at);

    CREATE TABLE IF NOT EXISTS ingestion_jobs (
        job_id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        completed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
"#;

const ENTITY_COLUMNS: &str =
    "id, name, normalized_name, entity_type, confidence_score, metadata, version, created_at, updated_at";

const ASSOCIATION_COLUMNS: &str =
    "document_id, entity_id, mention_count, contexts, sentiment, sentiment_samples, updated_at";

const SYNC_COLUMNS: &str = "document_id, state, revision, attempts, last_error, payload, updated_at";

/// Map a driver error; connection-level failures are unavailability
fn pg_err(err: tokio_postgres::Error) -> OntologyError {
    if err.is_closed() || err.as_db_error().is_none() {
        OntologyError::unavailable(RELATIONAL, err)
    } else {
        OntologyError::store(RELATIONAL, err)
    }
}

fn pool_err(err: deadpool_postgres::PoolError) -> OntologyError {
    OntologyError::unavailable(RELATIONAL, err)
}

fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> OntologyResult<T> {
    Ok(serde_json::from_value(value)?)
}

fn to_json<T: serde::Serialize>(value: &T) -> OntologyResult<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn entity_from_row(row: &Row) -> OntologyResult<Entity> {
    let entity_type: String = row.get(3);
    Ok(Entity {
        id: row.get(0),
        name: row.get(1),
        normalized_name: row.get(2),
        entity_type: EntityType::parse(&entity_type).unwrap_or(EntityType::Other),
        confidence_score: row.get(4),
        metadata: from_json(row.get(5))?,
        version: row.get(6),
        created_at: row.get(7),
        updated_at: row.get(8),
    })
}

fn association_from_row(row: &Row) -> OntologyResult<DocumentEntity> {
    Ok(DocumentEntity {
        document_id: row.get(0),
        entity_id: row.get(1),
        mention_count: row.get(2),
        contexts: from_json(row.get(3))?,
        sentiment: row.get(4),
        sentiment_samples: row.get(5),
        updated_at: row.get(6),
    })
}

fn sync_from_row(row: &Row) -> OntologyResult<SyncRecord> {
    let state: String = row.get(1);
    let attempts: i32 = row.get(3);
    let payload: Option<serde_json::Value> = row.get(5);
    Ok(SyncRecord {
        document_id: row.get(0),
        state: SyncState::parse(&state).ok_or_else(|| OntologyError::Serialization {
            reason: format!("unknown sync state '{state}'"),
        })?,
        revision: row.get(2),
        attempts: attempts.max(0) as u32,
        last_error: row.get(4),
        payload: payload.map(from_json::<GraphMutation>).transpose()?,
        updated_at: row.get(6),
    })
}

// ============================================================================
// Transaction
// ============================================================================

/// Open PostgreSQL transaction on a pooled client
pub struct PostgresTx {
    client: Option<Object>,
}

impl PostgresTx {
    fn client(&self) -> OntologyResult<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| OntologyError::store(RELATIONAL, "transaction already finished"))
    }
}

#[async_trait]
impl RelationalTx for PostgresTx {
    async fn upsert_document(&mut self, document: &DocumentRecord) -> OntologyResult<i64> {
        let topics = to_json(&document.topics)?;
        let row = self
            .client()?
            .query_one(
                r#"
                INSERT INTO documents (id, source_url, summary, topics, revision, processed_at)
                VALUES ($1, $2, $3, $4, 1, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    source_url = EXCLUDED.source_url,
                    summary = EXCLUDED.summary,
                    topics = EXCLUDED.topics,
                    revision = documents.revision + 1,
                    processed_at = NOW()
                RETURNING revision
                "#,
                &[&document.id, &document.source_url, &document.summary, &topics],
            )
            .await
            .map_err(pg_err)?;
        Ok(row.get(0))
    }

    async fn find_entity(&mut self, key: &EntityKey) -> OntologyResult<Option<Entity>> {
        let row = self
            .client()?
            .query_opt(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities WHERE normalized_name = $1 AND entity_type = $2"
                ),
                &[&key.normalized_name, &key.entity_type.as_str()],
            )
            .await
            .map_err(pg_err)?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn insert_entity(&mut self, entity: &NewEntity) -> OntologyResult<Option<Entity>> {
        let metadata = to_json(&entity.metadata)?;
        let row = self
            .client()?
            .query_opt(
                &format!(
                    r#"
                    INSERT INTO entities
                        (name, normalized_name, entity_type, confidence_score, metadata, version)
                    VALUES ($1, $2, $3, $4, $5, 1)
                    ON CONFLICT (normalized_name, entity_type) DO NOTHING
                    RETURNING {ENTITY_COLUMNS}
                    "#
                ),
                &[
                    &entity.name,
                    &entity.key.normalized_name,
                    &entity.key.entity_type.as_str(),
                    &entity.confidence_score,
                    &metadata,
                ],
            )
            .await
            .map_err(pg_err)?;
        row.as_ref().map(entity_from_row).transpose()
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
            .client()?
            .execute(
                r#"
                UPDATE entities
                SET metadata = $1, confidence_score = $2, version = version + 1, updated_at = NOW()
                WHERE id = $3 AND version = $4
                "#,
                &[&metadata, &confidence_score, &entity_id, &expected_version],
            )
            .await
            .map_err(pg_err)?;
        Ok(updated == 1)
    }

    async fn find_association(
        &mut self,
        document_id: &str,
        entity_id: i64,
    ) -> OntologyResult<Option<DocumentEntity>> {
        let row = self
            .client()?
            .query_opt(
                &format!(
                    "SELECT {ASSOCIATION_COLUMNS} FROM document_entities WHERE document_id = $1 AND entity_id = $2"
                ),
                &[&document_id, &entity_id],
            )
            .await
            .map_err(pg_err)?;
        row.as_ref().map(association_from_row).transpose()
    }

    async fn save_association(&mut self, association: &DocumentEntity) -> OntologyResult<()> {
        let contexts = to_json(&association.contexts)?;
        self.client()?
            .execute(
                r#"
                INSERT INTO document_entities
                    (document_id, entity_id, mention_count, contexts, sentiment, sentiment_samples, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (document_id, entity_id) DO UPDATE SET
                    mention_count = EXCLUDED.mention_count,
                    contexts = EXCLUDED.contexts,
                    sentiment = EXCLUDED.sentiment,
                    sentiment_samples = EXCLUDED.sentiment_samples,
                    updated_at = EXCLUDED.updated_at
                "#,
                &[
                    &association.document_id,
                    &association.entity_id,
                    &association.mention_count,
                    &contexts,
                    &association.sentiment,
                    &association.sentiment_samples,
                    &association.updated_at,
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn find_sync_record(&mut self, document_id: &str) -> OntologyResult<Option<SyncRecord>> {
        let row = self
            .client()?
            .query_opt(
                &format!("SELECT {SYNC_COLUMNS} FROM document_sync WHERE document_id = $1"),
                &[&document_id],
            )
            .await
            .map_err(pg_err)?;
        row.as_ref().map(sync_from_row).transpose()
    }

    async fn save_sync_record(&mut self, record: &SyncRecord) -> OntologyResult<()> {
        let payload = record.payload.as_ref().map(to_json).transpose()?;
        let attempts = record.attempts as i32;
        self.client()?
            .execute(
                r#"
                INSERT INTO document_sync
                    (document_id, state, revision, attempts, last_error, payload, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (document_id) DO UPDATE SET
                    state = EXCLUDED.state,
                    revision = EXCLUDED.revision,
                    attempts = EXCLUDED.attempts,
                    last_error = EXCLUDED.last_error,
                    payload = EXCLUDED.payload,
                    updated_at = EXCLUDED.updated_at
                "#,
                &[
                    &record.document_id,
                    &record.state.as_str(),
                    &record.revision,
                    &attempts,
                    &record.last_error,
                    &payload,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> OntologyResult<()> {
        let client = self
            .client
            .take()
            .ok_or_else(|| OntologyError::store(RELATIONAL, "transaction already finished"))?;
        client.batch_execute("COMMIT").await.map_err(pg_err)?;
        Ok(())
    }
}

impl Drop for PostgresTx {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        // The client goes back to the pool only after the rollback lands
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        tracing::warn!(error = %e, "PostgreSQL rollback failed");
                    }
                });
            }
            Err(_) => {
                let _ = Object::take(client);
            }
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// PostgreSQL implementation of [`RelationalStore`]
#[derive(Clone)]
pub struct PostgresRelationalStore {
    pool: Pool,
}

impl PostgresRelationalStore {
    /// Create the pool and check connectivity
    pub async fn connect(config: &PostgresConfig) -> OntologyResult<Self> {
        let mut pool_config = PoolConfig::new();
        pool_config.url = Some(config.url.clone());
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pool_config.pool = Some(PoolSize::new(config.pool_size));

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| OntologyError::unavailable(RELATIONAL, e))?;

        // Test connection
        let client = pool.get().await.map_err(pool_err)?;
        client.simple_query("SELECT 1").await.map_err(pg_err)?;

        tracing::info!(pool_size = config.pool_size, "PostgreSQL relational store connected");
        Ok(Self { pool })
    }

    /// Initialize database schema
    pub async fn init_schema(&self) -> OntologyResult<()> {
        let client = self.pool.get().await.map_err(pool_err)?;
        client.batch_execute(SCHEMA).await.map_err(pg_err)?;
        tracing::info!("PostgreSQL schema initialized");
        Ok(())
    }

    async fn client(&self) -> OntologyResult<Object> {
        self.pool.get().await.map_err(pool_err)
    }
}

#[async_trait]
impl RelationalStore for PostgresRelationalStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> OntologyResult<Box<dyn RelationalTx>> {
        let client = self.client().await?;
        client.batch_execute("BEGIN").await.map_err(pg_err)?;
        Ok(Box::new(PostgresTx {
            client: Some(client),
        }))
    }

    async fn sync_record(&self, document_id: &str) -> OntologyResult<Option<SyncRecord>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {SYNC_COLUMNS} FROM document_sync WHERE document_id = $1"),
                &[&document_id],
            )
            .await
            .map_err(pg_err)?;
        row.as_ref().map(sync_from_row).transpose()
    }

    async fn update_sync_state(
        &self,
        document_id: &str,
        expected_revision: i64,
        state: SyncState,
        attempts: u32,
        last_error: Option<&str>,
    ) -> OntologyResult<bool> {
        let client = self.client().await?;
        let attempts = attempts as i32;
        let updated = client
            .execute(
                r#"
                UPDATE document_sync
                SET state = $1,
                    attempts = $2,
                    last_error = $3,
                    payload = CASE WHEN $1 = 'GRAPH_SYNCED' THEN NULL ELSE payload END,
                    updated_at = NOW()
                WHERE document_id = $4 AND revision = $5
                "#,
                &[&state.as_str(), &attempts, &last_error, &document_id, &expected_revision],
            )
            .await
            .map_err(pg_err)?;
        Ok(updated == 1)
    }

    async fn pending_graph_syncs(&self, limit: usize) -> OntologyResult<Vec<SyncRecord>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    r#"
                    SELECT {SYNC_COLUMNS} FROM document_sync
                    WHERE state IN ('RELATIONAL_COMMITTED', 'GRAPH_PENDING')
                    ORDER BY updated_at ASC, document_id ASC
                    LIMIT $1
                    "#
                ),
                &[&(limit as i64)],
            )
            .await
            .map_err(pg_err)?;
        rows.iter().map(sync_from_row).collect()
    }

    async fn count_sync_state(&self, state: SyncState) -> OntologyResult<i64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM document_sync WHERE state = $1",
                &[&state.as_str()],
            )
            .await
            .map_err(pg_err)?;
        Ok(row.get(0))
    }

    async fn is_job_completed(&self, job_id: &str) -> OntologyResult<bool> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM ingestion_jobs WHERE job_id = $1)",
                &[&job_id],
            )
            .await
            .map_err(pg_err)?;
        Ok(row.get(0))
    }

    async fn complete_job(&self, job_id: &str, document_id: &str) -> OntologyResult<()> {
        let client = self.client().await?;
        client
            .execute(
                r#"
                INSERT INTO ingestion_jobs (job_id, document_id)
                VALUES ($1, $2)
                ON CONFLICT (job_id) DO NOTHING
                "#,
                &[&job_id, &document_id],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn document(&self, document_id: &str) -> OntologyResult<Option<DocumentRecord>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT id, source_url, summary, topics FROM documents WHERE id = $1",
                &[&document_id],
            )
            .await
            .map_err(pg_err)?;
        match row {
            Some(row) => Ok(Some(DocumentRecord {
                id: row.get(0),
                source_url: row.get(1),
                summary: row.get(2),
                topics: from_json(row.get(3))?,
            })),
            None => Ok(None),
        }
    }

    async fn entity(&self, entity_id: i64) -> OntologyResult<Option<Entity>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = $1"),
                &[&entity_id],
            )
            .await
            .map_err(pg_err)?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn find_entities_by_name(&self, name: &str) -> OntologyResult<Vec<Entity>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities WHERE normalized_name = $1 ORDER BY id"
                ),
                &[&normalize_name(name)],
            )
            .await
            .map_err(pg_err)?;
        rows.iter().map(entity_from_row).collect()
    }

    async fn associations_for_document(
        &self,
        document_id: &str,
    ) -> OntologyResult<Vec<DocumentEntity>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {ASSOCIATION_COLUMNS} FROM document_entities WHERE document_id = $1 ORDER BY entity_id"
                ),
                &[&document_id],
            )
            .await
            .map_err(pg_err)?;
        rows.iter().map(association_from_row).collect()
    }

    async fn associations_for_entity(&self, entity_id: i64) -> OntologyResult<Vec<DocumentEntity>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    r#"
                    SELECT {ASSOCIATION_COLUMNS} FROM document_entities
                    WHERE entity_id = $1
                    ORDER BY mention_count DESC, document_id ASC
                    "#
                ),
                &[&entity_id],
            )
            .await
            .map_err(pg_err)?;
        rows.iter().map(association_from_row).collect()
    }

    async fn related_entities(&self, name: &str, limit: usize) -> OntologyResult<Vec<RelatedEntity>> {
        let client = self.client().await?;
        let sql = render_sql(RELATED_ENTITIES_SQL, "$1", "$2");
        let rows = client
            .query(&sql, &[&normalize_name(name), &(limit as i64)])
            .await
            .map_err(pg_err)?;
        Ok(rows
            .iter()
            .map(|row| {
                let entity_type: String = row.get(2);
                RelatedEntity {
                    id: row.get(0),
                    name: row.get(1),
                    entity_type: EntityType::parse(&entity_type).unwrap_or(EntityType::Other),
                    co_occurrence_count: row.get(3),
                }
            })
            .collect())
    }

    async fn entity_statistics(&self, top_n: usize) -> OntologyResult<EntityStatistics> {
        let client = self.client().await?;
        let mut stats = EntityStatistics::default();

        let rows = client
            .query(
                "SELECT entity_type, COUNT(*) FROM entities GROUP BY entity_type",
                &[],
            )
            .await
            .map_err(pg_err)?;
        for row in rows {
            let entity_type: String = row.get(0);
            let count: i64 = row.get(1);
            stats.total_entities += count;
            stats.counts_by_type.insert(entity_type, count);
        }

        let row = client
            .query_one(
                "SELECT COALESCE(SUM(mention_count), 0)::BIGINT FROM document_entities",
                &[],
            )
            .await
            .map_err(pg_err)?;
        stats.total_mentions = row.get(0);

        let sql = render_sql(TOP_ENTITIES_SQL, "", "$1");
        let rows = client
            .query(&sql, &[&(top_n as i64)])
            .await
            .map_err(pg_err)?;
        stats.top_entities = rows
            .iter()
            .map(|row| {
                let entity_type: String = row.get(2);
                TopEntity {
                    id: row.get(0),
                    name: row.get(1),
                    entity_type: EntityType::parse(&entity_type).unwrap_or(EntityType::Other),
                    mention_count: row.get(3),
                }
            })
            .collect();

        Ok(stats)
    }
}
