//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use polgraph::config::PipelineConfig;
use polgraph::models::{AnalysisResult, AnalyzedEntity, EntityType, GraphMutation, Metadata, SourceDocument};
use polgraph::ontology::{
    AssociationAggregator, ExtractionInput, MentionExtractor, MentionSource, OntologyError,
    OntologyResult, RawMention, SourceKind,
};
use polgraph::pipeline::{IngestionPipeline, WriteCoordinator};
use polgraph::storage::graph::{EdgeType, GraphEdge, GraphNode, GraphStore, NeighborRow, SqliteGraphStore, GRAPH};
use polgraph::storage::SqliteRelationalStore;
use polgraph::utils::retry::RetryConfig;

pub const CONTEXT_CAP: usize = 10;

/// Analysis result naming `(name, label)` entities
pub fn analysis(entities: &[(&str, &str)]) -> AnalysisResult {
    AnalysisResult {
        summary: "Committee hearing".to_string(),
        topics: vec!["Budget".to_string()],
        entities: entities
            .iter()
            .map(|(name, label)| AnalyzedEntity {
                name: name.to_string(),
                entity_type: label.to_string(),
                context: format!("{name} testified"),
                sentiment: None,
            })
            .collect(),
    }
}

pub fn document(id: &str, text: &str, analysis: AnalysisResult) -> SourceDocument {
    SourceDocument {
        document_id: Some(id.to_string()),
        ..SourceDocument::new(format!("https://example.com/{id}"), text, analysis)
    }
}

pub fn raw_mention(name: &str, entity_type: EntityType, confidence: f64, source: &str, kind: SourceKind) -> RawMention {
    RawMention {
        name: name.to_string(),
        entity_type,
        span: None,
        confidence,
        source: source.to_string(),
        kind,
        context: format!("{name} spoke on the floor"),
        sentiment: None,
        metadata: Metadata::new(),
    }
}

/// Mention source returning a fixed list
pub struct StaticSource {
    id: String,
    kind: SourceKind,
    mentions: Vec<RawMention>,
}

impl StaticSource {
    pub fn new(id: &str, kind: SourceKind, mentions: Vec<RawMention>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            mentions,
        })
    }
}

#[async_trait]
impl MentionSource for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn extract(&self, _input: &ExtractionInput<'_>) -> OntologyResult<Vec<RawMention>> {
        Ok(self.mentions.clone())
    }
}

/// SQLite graph store that fails `apply` on demand
pub struct FlakyGraphStore {
    pub inner: SqliteGraphStore,
    down: AtomicBool,
    failures_left: AtomicUsize,
    lost_acks_left: AtomicUsize,
    applied: AtomicUsize,
}

impl FlakyGraphStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteGraphStore::in_memory(CONTEXT_CAP).expect("in-memory graph store"),
            down: AtomicBool::new(false),
            failures_left: AtomicUsize::new(0),
            lost_acks_left: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` applies, then recover
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Write the next `n` mutations but report them as failed
    pub fn lose_next_acks(&self, n: usize) {
        self.lost_acks_left.store(n, Ordering::SeqCst);
    }

    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphStore for FlakyGraphStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn apply(&self, mutation: &GraphMutation) -> OntologyResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(OntologyError::unavailable(GRAPH, "connection refused"));
        }
        let pending = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(OntologyError::unavailable(GRAPH, "injected failure"));
        }
        self.inner.apply(mutation).await?;
        self.applied.fetch_add(1, Ordering::SeqCst);

        let lost = self
            .lost_acks_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if lost.is_ok() {
            return Err(OntologyError::unavailable(GRAPH, "connection reset after write"));
        }
        Ok(())
    }

    async fn neighbors(&self, node_key: &str, limit: usize) -> OntologyResult<Vec<NeighborRow>> {
        self.inner.neighbors(node_key, limit).await
    }

    async fn node(&self, key: &str) -> OntologyResult<Option<GraphNode>> {
        self.inner.node(key).await
    }

    async fn edge(&self, source: &str, target: &str, edge_type: EdgeType) -> OntologyResult<Option<GraphEdge>> {
        self.inner.edge(source, target, edge_type).await
    }

    async fn edge_count(&self) -> OntologyResult<i64> {
        self.inner.edge_count().await
    }
}

pub struct Harness {
    pub relational: Arc<SqliteRelationalStore>,
    pub graph: Arc<FlakyGraphStore>,
    pub coordinator: Arc<WriteCoordinator>,
    pub pipeline: IngestionPipeline,
}

/// Pattern and analysis sources over in-memory stores
pub fn harness() -> Harness {
    harness_with(None, CONTEXT_CAP)
}

/// Custom extractor (or the configured sources when `None`) and context cap
pub fn harness_with(extractor: Option<MentionExtractor>, context_cap: usize) -> Harness {
    let relational = Arc::new(SqliteRelationalStore::in_memory().expect("in-memory relational store"));
    let graph = FlakyGraphStore::new();
    let coordinator = Arc::new(
        WriteCoordinator::new(relational.clone(), graph.clone())
            .with_aggregator(AssociationAggregator::new(context_cap))
            .with_max_graph_attempts(3),
    );

    let pipeline = match extractor {
        Some(extractor) => IngestionPipeline::new(extractor, coordinator.clone()),
        None => IngestionPipeline::from_config(&PipelineConfig::default(), coordinator.clone())
            .expect("default pipeline"),
    }
    .with_retry(RetryConfig::with_delays(1, 1, 2));

    Harness {
        relational,
        graph,
        coordinator,
        pipeline,
    }
}
