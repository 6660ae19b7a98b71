//! Service wiring
//!
//! Builds the stores, notifier, coordinator, pipeline and read services from
//! one [`Config`]. The CLI and the integration tests construct everything
//! through here.

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, GraphBackend, RelationalBackend};
use crate::error::Result;
use crate::notifications::{NotificationManager, SharedNotifier};
use crate::ontology::{AssociationAggregator, EntityResolver};
use crate::pipeline::{IngestionPipeline, Reconciler, WriteCoordinator};
use crate::query::{GraphQueryService, StatisticsService};
use crate::storage::graph::{Neo4jGraphStore, SqliteGraphStore};
use crate::storage::{GraphStore, PostgresRelationalStore, RelationalStore, SqliteRelationalStore};

/// Every component of a running knowledge graph
pub struct KnowledgeGraphService {
    pub pipeline: IngestionPipeline,
    pub reconciler: Reconciler,
    pub graph_query: GraphQueryService,
    pub statistics: StatisticsService,
    pub notifier: SharedNotifier,
    coordinator: Arc<WriteCoordinator>,
}

impl KnowledgeGraphService {
    /// Connect to the configured backends and wire the components
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let relational = open_relational(config).await?;
        let graph = open_graph(config).await?;
        let notifier = NotificationManager::from_config(&config.notifications)?.into_shared();

        Self::from_parts(config, relational, graph, notifier)
    }

    /// Wire the components around already-open stores
    pub fn from_parts(
        config: &Config,
        relational: Arc<dyn RelationalStore>,
        graph: Arc<dyn GraphStore>,
        notifier: SharedNotifier,
    ) -> Result<Self> {
        let coordinator = Arc::new(
            WriteCoordinator::new(relational.clone(), graph.clone())
                .with_resolver(EntityResolver::new(config.pipeline.entity_conflict_retries))
                .with_aggregator(AssociationAggregator::new(config.pipeline.context_cap))
                .with_store_timeout(config.store_timeout())
                .with_max_graph_attempts(config.reconciliation.max_graph_attempts)
                .with_notifier(notifier.clone()),
        );

        let pipeline = IngestionPipeline::from_config(&config.pipeline, coordinator.clone())?;
        let reconciler = Reconciler::new(coordinator.clone(), &config.reconciliation);

        info!(
            relational = relational.backend(),
            graph = graph.backend(),
            "Knowledge graph service ready"
        );

        Ok(Self {
            pipeline,
            reconciler,
            graph_query: GraphQueryService::new(graph),
            statistics: StatisticsService::new(relational),
            notifier,
            coordinator,
        })
    }

    pub fn coordinator(&self) -> &Arc<WriteCoordinator> {
        &self.coordinator
    }
}

async fn open_relational(config: &Config) -> Result<Arc<dyn RelationalStore>> {
    let store: Arc<dyn RelationalStore> = match config.database.backend {
        RelationalBackend::Sqlite => Arc::new(SqliteRelationalStore::new(&config.database.sqlite_path)?),
        RelationalBackend::Postgres => {
            let store = PostgresRelationalStore::connect(&config.database.postgres).await?;
            store.init_schema().await?;
            Arc::new(store)
        }
    };
    Ok(store)
}

async fn open_graph(config: &Config) -> Result<Arc<dyn GraphStore>> {
    let cap = config.pipeline.context_cap;
    let store: Arc<dyn GraphStore> = match config.graph.backend {
        GraphBackend::Sqlite => Arc::new(SqliteGraphStore::new(&config.graph.sqlite_path, cap)?),
        GraphBackend::Neo4j => Arc::new(Neo4jGraphStore::connect(&config.graph.neo4j, cap).await?),
    };
    Ok(store)
}
