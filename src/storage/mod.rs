//! Store abstractions for the dual-store write path
//!
//! The relational store is authoritative for entities, associations and the
//! per-document sync state. The graph store is a secondary index kept
//! eventually consistent by the write coordinator.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Write Coordinator / Query Services               │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌───────────────────────────────┐ ┌───────────────────────────┐
//! │ RelationalStore + RelationalTx │ │        GraphStore         │
//! └───────────────────────────────┘ └───────────────────────────┘
//!        │                │                 │             │
//!        ▼                ▼                 ▼             ▼
//! ┌────────────┐  ┌──────────────┐   ┌────────────┐ ┌──────────┐
//! │   SQLite   │  │  PostgreSQL  │   │   SQLite   │ │  Neo4j   │
//! └────────────┘  └──────────────┘   └────────────┘ └──────────┘
//! ```

pub mod graph;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;

use crate::models::{
    DocumentEntity, DocumentRecord, Entity, EntityKey, EntityStatistics, Metadata, NewEntity,
    RelatedEntity, SyncRecord, SyncState,
};
use crate::ontology::error::OntologyResult;

pub use graph::GraphStore;
pub use postgres::PostgresRelationalStore;
pub use sqlite::SqliteRelationalStore;

/// Store name used in errors and logs
pub const RELATIONAL: &str = "relational";

/// One relational transaction
///
/// Dropping a transaction without calling [`RelationalTx::commit`] rolls it
/// back, so an ingestion cancelled mid-way leaves no partial rows.
#[async_trait]
pub trait RelationalTx: Send {
    /// Insert or update the document row; returns its new revision
    async fn upsert_document(&mut self, document: &DocumentRecord) -> OntologyResult<i64>;

    async fn find_entity(&mut self, key: &EntityKey) -> OntologyResult<Option<Entity>>;

    /// Insert a new entity; `None` if one with the same key already exists
    async fn insert_entity(&mut self, entity: &NewEntity) -> OntologyResult<Option<Entity>>;

    /// Replace metadata and confidence if the stored version still matches
    ///
    /// Returns `false` when another writer bumped the version first.
    async fn update_entity_metadata(
        &mut self,
        entity_id: i64,
        expected_version: i64,
        metadata: &Metadata,
        confidence_score: f64,
    ) -> OntologyResult<bool>;

    async fn find_association(
        &mut self,
        document_id: &str,
        entity_id: i64,
    ) -> OntologyResult<Option<DocumentEntity>>;

    /// Insert or replace the association row
    async fn save_association(&mut self, association: &DocumentEntity) -> OntologyResult<()>;

    async fn find_sync_record(&mut self, document_id: &str) -> OntologyResult<Option<SyncRecord>>;

    async fn save_sync_record(&mut self, record: &SyncRecord) -> OntologyResult<()>;

    async fn commit(self: Box<Self>) -> OntologyResult<()>;
}

/// Relational store
#[async_trait]
pub trait RelationalStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn begin(&self) -> OntologyResult<Box<dyn RelationalTx>>;

    async fn sync_record(&self, document_id: &str) -> OntologyResult<Option<SyncRecord>>;

    /// Move a sync record to `state` if it is still at `expected_revision`
    ///
    /// Reaching `GraphSynced` clears the stored graph payload.
    async fn update_sync_state(
        &self,
        document_id: &str,
        expected_revision: i64,
        state: SyncState,
        attempts: u32,
        last_error: Option<&str>,
    ) -> OntologyResult<bool>;

    /// Records still owing a graph write, oldest first
    async fn pending_graph_syncs(&self, limit: usize) -> OntologyResult<Vec<SyncRecord>>;

    async fn count_sync_state(&self, state: SyncState) -> OntologyResult<i64>;

    async fn is_job_completed(&self, job_id: &str) -> OntologyResult<bool>;

    async fn complete_job(&self, job_id: &str, document_id: &str) -> OntologyResult<()>;

    async fn document(&self, document_id: &str) -> OntologyResult<Option<DocumentRecord>>;

    async fn entity(&self, entity_id: i64) -> OntologyResult<Option<Entity>>;

    /// Entities of any type whose normalized name matches
    async fn find_entities_by_name(&self, name: &str) -> OntologyResult<Vec<Entity>>;

    async fn associations_for_document(
        &self,
        document_id: &str,
    ) -> OntologyResult<Vec<DocumentEntity>>;

    async fn associations_for_entity(&self, entity_id: i64) -> OntologyResult<Vec<DocumentEntity>>;

    /// Entities sharing documents with `name`, by distinct shared documents
    /// descending then id ascending
    async fn related_entities(&self, name: &str, limit: usize) -> OntologyResult<Vec<RelatedEntity>>;

    async fn entity_statistics(&self, top_n: usize) -> OntologyResult<EntityStatistics>;
}

pub(crate) const RELATED_ENTITIES_SQL: &str = r#"
    SELECT e.id, e.name, e.entity_type, COUNT(DISTINCT de.document_id) AS co_occurrence
    FROM document_entities de
    JOIN entities e ON e.id = de.entity_id
    WHERE de.document_id IN (
        SELECT target_de.document_id
        FROM document_entities target_de
        JOIN entities target ON target.id = target_de.entity_id
        WHERE target.normalized_name = {name}
    )
    AND e.normalized_name <> {name}
    GROUP BY e.id, e.name, e.entity_type
    ORDER BY co_occurrence DESC, e.id ASC
    LIMIT {limit}
"#;

pub(crate) const TOP_ENTITIES_SQL: &str = r#"
    SELECT e.id, e.name, e.entity_type, CAST(SUM(de.mention_count) AS BIGINT) AS total
    FROM entities e
    JOIN document_entities de ON de.entity_id = e.id
    GROUP BY e.id, e.name, e.entity_type
    ORDER BY total DESC, e.id ASC
    LIMIT {limit}
"#;

/// Fill the shared query templates with backend placeholders
pub(crate) fn render_sql(template: &str, name: &str, limit: &str) -> String {
    template.replace("{name}", name).replace("{limit}", limit)
}
