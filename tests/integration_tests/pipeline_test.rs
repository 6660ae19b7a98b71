//! Ingestion pipeline integration tests
//!
//! Tests the complete flow:
//! 1. Mention extraction from pattern and analysis sources
//! 2. Within-document deduplication
//! 3. Entity resolution and association aggregation
//! 4. Relational commit followed by graph sync

use std::sync::Arc;

use polgraph::models::{EntityType, SyncState};
use polgraph::ontology::{AssociationAggregator, MentionExtractor, SourceKind};
use polgraph::pipeline::{IngestionPipeline, WriteCoordinator};
use polgraph::storage::graph::{document_node_key, entity_node_key, EdgeType, GraphStore};
use polgraph::storage::RelationalStore;

use crate::common::{analysis, document, harness, harness_with, raw_mention, StaticSource, CONTEXT_CAP};

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_reingest_adds_exactly_second_count() {
    let h = harness_with(None, 2);
    let doc = document("doc-1", "Jane Smith voted no.", analysis(&[("Jane Smith", "PERSON")]));

    let first = h.pipeline.ingest_document(&doc).await;
    assert_eq!(first.state, Some(SyncState::GraphSynced));
    let entity = &h.relational.find_entities_by_name("jane smith").await.unwrap()[0];
    let after_first = h.relational.associations_for_entity(entity.id).await.unwrap();
    assert_eq!(after_first[0].mention_count, 1);

    let second = h.pipeline.ingest_document(&doc).await;
    assert_eq!(second.revision, Some(2));
    let after_second = h.relational.associations_for_entity(entity.id).await.unwrap();
    assert_eq!(after_second.len(), 1);
    assert_eq!(after_second[0].mention_count, 2);

    h.pipeline.ingest_document(&doc).await;
    let after_third = h.relational.associations_for_entity(entity.id).await.unwrap();
    assert_eq!(after_third[0].mention_count, 3);
    assert_eq!(after_third[0].contexts.len(), 2);

    // One entity row, one MENTIONS edge
    assert_eq!(h.relational.find_entities_by_name("jane smith").await.unwrap().len(), 1);
    let edge = h
        .graph
        .edge(&document_node_key("doc-1"), &entity_node_key("jane smith"), EdgeType::Mentions)
        .await
        .unwrap()
        .unwrap();
    assert!(edge.contexts().len() <= CONTEXT_CAP);
    assert_eq!(h.graph.edge_count().await.unwrap(), 2);
}

// ============================================================================
// Deduplication and resolution
// ============================================================================

#[tokio::test]
async fn test_duplicate_mentions_resolve_to_one_entity() {
    let extractor = MentionExtractor::default()
        .with_source(StaticSource::new(
            "ner",
            SourceKind::Statistical,
            vec![raw_mention("Jane Smith", EntityType::Person, 0.8, "ner", SourceKind::Statistical)],
        ))
        .with_source(StaticSource::new(
            "pattern",
            SourceKind::Pattern,
            vec![raw_mention("Jane Smith", EntityType::Person, 0.9, "pattern", SourceKind::Pattern)],
        ));
    let h = harness_with(Some(extractor), CONTEXT_CAP);

    let outcome = h
        .pipeline
        .ingest_document(&document("doc-1", "Jane Smith spoke.", Default::default()))
        .await;
    assert!(outcome.is_success());
    assert_eq!(outcome.entities, 1);

    let entities = h.relational.find_entities_by_name("jane smith").await.unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].confidence_score, 0.9);

    let associations = h.relational.associations_for_document("doc-1").await.unwrap();
    assert_eq!(associations.len(), 1);
    assert_eq!(associations[0].mention_count, 2);
}

#[tokio::test]
async fn test_pattern_and_analysis_sources_together() {
    let h = harness();
    let outcome = h
        .pipeline
        .ingest_document(&document(
            "doc-1",
            "Speaker Nancy Pelosi scheduled a vote on H.R. 302 in the Senate.",
            analysis(&[("Jane Smith", "PER")]),
        ))
        .await;

    assert_eq!(outcome.state, Some(SyncState::GraphSynced));
    assert!(outcome.failed_sources.is_empty());

    let bill = h.relational.find_entities_by_name("h.r. 302").await.unwrap();
    assert_eq!(bill.len(), 1);
    assert_eq!(bill[0].entity_type, EntityType::Legislation);
    assert_eq!(h.relational.find_entities_by_name("nancy pelosi").await.unwrap().len(), 1);
    assert_eq!(
        h.relational.find_entities_by_name("jane smith").await.unwrap()[0].entity_type,
        EntityType::Person
    );
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_documents_share_one_entity() {
    let h = harness();
    let a = document("doc-a", "The House passed H.R. 302 today.", Default::default());
    let b = document("doc-b", "H.R. 302 now heads to conference.", Default::default());

    let (first, second) = tokio::join!(h.pipeline.ingest_document(&a), h.pipeline.ingest_document(&b));
    assert!(first.is_success());
    assert!(second.is_success());

    let entities = h.relational.find_entities_by_name("h.r. 302").await.unwrap();
    assert_eq!(entities.len(), 1);
    let associations = h.relational.associations_for_entity(entities[0].id).await.unwrap();
    assert_eq!(associations.len(), 2);
}

#[tokio::test]
async fn test_independent_coordinators_share_one_entity() {
    let h = harness();
    let other = IngestionPipeline::from_config(
        &Default::default(),
        Arc::new(
            WriteCoordinator::new(h.relational.clone(), h.graph.clone())
                .with_aggregator(AssociationAggregator::new(CONTEXT_CAP)),
        ),
    )
    .unwrap();

    let a = document("doc-a", "Senators debated H.R. 302.", Default::default());
    let b = document("doc-b", "A vote on H.R. 302 is expected.", Default::default());
    let (first, second) = tokio::join!(h.pipeline.ingest_document(&a), other.ingest_document(&b));
    assert!(first.is_success() && second.is_success());

    let entities = h.relational.find_entities_by_name("h.r. 302").await.unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(h.relational.associations_for_entity(entities[0].id).await.unwrap().len(), 2);
}

// ============================================================================
// Jobs and batches
// ============================================================================

#[tokio::test]
async fn test_completed_job_is_skipped() {
    let h = harness();
    let mut doc = document("doc-1", "Nancy Pelosi spoke.", Default::default());
    doc.job_id = Some("job-1".to_string());

    let first = h.pipeline.ingest_document(&doc).await;
    assert!(!first.skipped);
    assert!(h.relational.is_job_completed("job-1").await.unwrap());

    let second = h.pipeline.ingest_document(&doc).await;
    assert!(second.skipped);
    let record = h.relational.sync_record("doc-1").await.unwrap().unwrap();
    assert_eq!(record.revision, 1);
}

#[tokio::test]
async fn test_job_not_completed_while_graph_pending() {
    let h = harness();
    h.graph.set_down(true);
    let mut doc = document("doc-1", "Nancy Pelosi spoke.", Default::default());
    doc.job_id = Some("job-1".to_string());

    let outcome = h.pipeline.ingest_document(&doc).await;
    assert_eq!(outcome.state, Some(SyncState::GraphPending));
    assert!(!h.relational.is_job_completed("job-1").await.unwrap());
}

#[tokio::test]
async fn test_batch_reports_each_document() {
    let h = harness();
    let documents: Vec<_> = (0..6)
        .map(|i| document(&format!("doc-{i}"), "Chuck Schumer and the Senate met.", Default::default()))
        .collect();

    let report = h.pipeline.ingest_batch(&documents).await;
    assert_eq!(report.outcomes.len(), 6);
    assert_eq!(report.succeeded(), 6);
    assert_eq!(report.graph_pending(), 0);
    assert!(report.outcome("doc-3").is_some());

    let senate = h.relational.find_entities_by_name("senate").await.unwrap();
    assert_eq!(senate.len(), 1);
    assert_eq!(h.relational.associations_for_entity(senate[0].id).await.unwrap().len(), 6);
}
