//! polgraph - Entity resolution and knowledge-graph ingestion
//!
//! Turns analyzed political documents into canonical entities, document-entity
//! associations and a mirrored property graph.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`ontology`] - Mention extraction, deduplication, entity resolution and aggregation
//! - [`storage`] - Relational (SQLite, PostgreSQL) and graph (SQLite, Neo4j) stores
//! - [`pipeline`] - Per-document ingestion, write coordination and reconciliation
//! - [`query`] - Neighbor expansion, co-occurrence ranking and statistics
//! - [`notifications`] - Operator alerts for degraded documents
//! - [`metrics`] - Prometheus metrics
//! - [`service`] - Wiring of all of the above from a [`config::Config`]
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use polgraph::config::Config;
//! use polgraph::models::AnalysisResult;
//! use polgraph::service::KnowledgeGraphService;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let service = KnowledgeGraphService::from_config(&config).await?;
//!     let outcome = service
//!         .pipeline
//!         .ingest("doc-1", "https://example.com/1", "Nancy Pelosi spoke.", AnalysisResult::default())
//!         .await;
//!     println!("{:?}", outcome.state);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod ontology;
pub mod pipeline;
pub mod query;
pub mod service;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, PolgraphErrorTrait, Result};
    pub use crate::models::{AnalysisResult, AnalyzedEntity, EntityType, SourceDocument, SyncState};
    pub use crate::ontology::{OntologyError, OntologyResult};
    pub use crate::pipeline::{IngestOutcome, IngestionPipeline, Reconciler, WriteCoordinator};
    pub use crate::query::{GraphQueryService, StatisticsService};
    pub use crate::service::KnowledgeGraphService;
    pub use crate::storage::{GraphStore, RelationalStore};
}

// Direct re-exports for convenience
pub use models::{EntityType, SourceDocument, SyncState};
