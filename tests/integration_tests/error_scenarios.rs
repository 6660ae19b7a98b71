//! Error scenario integration tests
//!
//! Tests various failure modes and error handling:
//! 1. Graph write failing after a successful relational commit
//! 2. Graph write applied but not acknowledged
//! 3. Repeated ingestion while the graph is down
//! 4. Exhausted graph retries and the operator alert
//! 5. Failing mention sources

use std::sync::Arc;

use async_trait::async_trait;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use polgraph::config::{NotificationsConfig, ReconciliationConfig};
use polgraph::models::SyncState;
use polgraph::notifications::NotificationManager;
use polgraph::ontology::{
    AnalysisMentionSource, ExtractionConfig, ExtractionInput, MentionExtractor, MentionSource,
    OntologyError, OntologyResult, RawMention, SourceKind,
};
use polgraph::pipeline::{IngestionPipeline, Reconciler, WriteCoordinator};
use polgraph::storage::graph::{document_node_key, entity_node_key, EdgeType, GraphStore};
use polgraph::storage::{RelationalStore, SqliteRelationalStore};

use crate::common::{analysis, document, harness, harness_with, FlakyGraphStore, CONTEXT_CAP};

fn reconciler(coordinator: Arc<WriteCoordinator>) -> Reconciler {
    Reconciler::new(coordinator, &ReconciliationConfig::default())
}

async fn mention_count(relational: &SqliteRelationalStore, name: &str) -> i64 {
    let entity = &relational.find_entities_by_name(name).await.unwrap()[0];
    relational
        .associations_for_entity(entity.id)
        .await
        .unwrap()
        .iter()
        .map(|a| a.mention_count)
        .sum()
}

// ============================================================================
// Partial Failure Recovery
// ============================================================================

#[tokio::test]
async fn test_graph_failure_leaves_document_pending_then_reconciles() {
    let h = harness();
    h.graph.fail_next(1);

    let outcome = h
        .pipeline
        .ingest_document(&document("doc-1", "Jane Smith voted no.", analysis(&[("Jane Smith", "PERSON")])))
        .await;

    // Relational side committed, graph owed
    assert!(outcome.is_success());
    assert_eq!(outcome.state, Some(SyncState::GraphPending));
    assert_eq!(h.graph.edge_count().await.unwrap(), 0);
    assert_eq!(mention_count(&h.relational, "jane smith").await, 1);

    let report = reconciler(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.synced, 1);

    let record = h.relational.sync_record("doc-1").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::GraphSynced);
    assert!(record.payload.is_none());
    assert_eq!(mention_count(&h.relational, "jane smith").await, 1);

    let edge = h
        .graph
        .edge(&document_node_key("doc-1"), &entity_node_key("jane smith"), EdgeType::Mentions)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(edge.contexts().len(), 1);

    let again = reconciler(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(again.scanned, 0);
}

#[tokio::test]
async fn test_replayed_graph_write_does_not_duplicate() {
    let h = harness();
    h.graph.lose_next_acks(1);

    let outcome = h
        .pipeline
        .ingest_document(&document("doc-1", "Jane Smith voted no.", analysis(&[("Jane Smith", "PERSON")])))
        .await;
    assert_eq!(outcome.state, Some(SyncState::GraphPending));
    let edges_before = h.graph.edge_count().await.unwrap();

    let report = reconciler(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(h.graph.applied(), 2);
    assert_eq!(h.graph.edge_count().await.unwrap(), edges_before);

    let edge = h
        .graph
        .edge(&document_node_key("doc-1"), &entity_node_key("jane smith"), EdgeType::Mentions)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(edge.contexts().len(), 1);
    assert_eq!(mention_count(&h.relational, "jane smith").await, 1);
}

#[tokio::test]
async fn test_reingest_while_pending_carries_both_revisions() {
    let h = harness();
    h.graph.set_down(true);
    let doc = document("doc-1", "Jane Smith voted no.", analysis(&[("Jane Smith", "PERSON")]));

    assert_eq!(h.pipeline.ingest_document(&doc).await.state, Some(SyncState::GraphPending));
    let second = h.pipeline.ingest_document(&doc).await;
    assert_eq!(second.state, Some(SyncState::GraphPending));
    assert_eq!(second.revision, Some(2));

    h.graph.set_down(false);
    let report = reconciler(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report.synced, 1);

    let edge = h
        .graph
        .edge(&document_node_key("doc-1"), &entity_node_key("jane smith"), EdgeType::Mentions)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(edge.contexts().len(), 2);
    assert!(edge.contexts().len() <= CONTEXT_CAP);
    assert_eq!(mention_count(&h.relational, "jane smith").await, 2);
}

// ============================================================================
// Exhausted Retries
// ============================================================================

#[tokio::test]
async fn test_exhausted_graph_retries_alert_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = NotificationManager::from_config(&NotificationsConfig {
        webhook_url: Some(format!("{}/alerts", server.uri())),
        ..Default::default()
    })
    .unwrap()
    .into_shared();

    let relational = Arc::new(SqliteRelationalStore::in_memory().unwrap());
    let graph = FlakyGraphStore::new();
    graph.set_down(true);
    let coordinator = Arc::new(
        WriteCoordinator::new(relational.clone(), graph.clone())
            .with_max_graph_attempts(2)
            .with_notifier(notifier.clone()),
    );
    let extractor = MentionExtractor::default()
        .with_source(Arc::new(AnalysisMentionSource::new(ExtractionConfig::default())));
    let pipeline = IngestionPipeline::new(extractor, coordinator.clone());

    let outcome = pipeline
        .ingest_document(&document("doc-1", "", analysis(&[("Jane Smith", "PERSON")])))
        .await;
    assert_eq!(outcome.state, Some(SyncState::GraphPending));

    let report = reconciler(coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report.failed, 1);

    let record = relational.sync_record("doc-1").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::GraphFailed);
    assert_eq!(record.attempts, 2);
    assert!(record.last_error.is_some());

    // Terminal: later passes leave it alone, relational data stays readable
    assert_eq!(reconciler(coordinator).run_pass().await.unwrap().scanned, 0);
    assert_eq!(mention_count(&relational, "jane smith").await, 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.to_string().contains("doc-1"));

    assert_eq!(notifier.recent_alerts().len(), 1);
}

// ============================================================================
// Mention Source Failures
// ============================================================================

struct TimeoutSource;

#[async_trait]
impl MentionSource for TimeoutSource {
    fn id(&self) -> &str {
        "ner"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Statistical
    }

    async fn extract(&self, _input: &ExtractionInput<'_>) -> OntologyResult<Vec<RawMention>> {
        Err(OntologyError::unavailable("ner", "model server timed out"))
    }
}

#[tokio::test]
async fn test_failing_source_is_reported_not_fatal() {
    let extractor = MentionExtractor::default()
        .with_source(Arc::new(TimeoutSource))
        .with_source(Arc::new(AnalysisMentionSource::new(ExtractionConfig::default())));
    let h = harness_with(Some(extractor), CONTEXT_CAP);

    let outcome = h
        .pipeline
        .ingest_document(&document("doc-1", "", analysis(&[("Jane Smith", "PERSON")])))
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.state, Some(SyncState::GraphSynced));
    assert_eq!(outcome.failed_sources, vec!["ner".to_string()]);
    assert_eq!(outcome.entities, 1);
}

#[tokio::test]
async fn test_all_sources_failing_still_commits_document() {
    let extractor = MentionExtractor::default().with_source(Arc::new(TimeoutSource));
    let h = harness_with(Some(extractor), CONTEXT_CAP);

    let outcome = h
        .pipeline
        .ingest_document(&document("doc-1", "", analysis(&[("Jane Smith", "PERSON")])))
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.entities, 0);
    assert!(h.relational.document("doc-1").await.unwrap().is_some());
}
