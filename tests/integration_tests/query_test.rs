//! Read path integration tests
//!
//! Neighbor expansion over the graph store, co-occurrence ranking and
//! statistics over the relational aggregates.

use async_trait::async_trait;
use std::sync::Arc;

use polgraph::models::{GraphMutation, Metadata};
use polgraph::ontology::{AnalysisMentionSource, ExtractionConfig, MentionExtractor, OntologyResult};
use polgraph::query::{GraphQueryService, StatisticsService, DEFAULT_NEIGHBOR_LIMIT, DEFAULT_RELATED_LIMIT};
use polgraph::storage::graph::{
    document_node_key, entity_node_key, EdgeType, GraphEdge, GraphNode, GraphStore, NeighborRow, NodeLabel,
};

use crate::common::{analysis, document, harness_with, CONTEXT_CAP};

fn analysis_only() -> MentionExtractor {
    MentionExtractor::default().with_source(Arc::new(AnalysisMentionSource::new(ExtractionConfig::default())))
}

fn node(key: &str, label: NodeLabel) -> GraphNode {
    GraphNode {
        key: key.to_string(),
        label,
        properties: Metadata::new(),
    }
}

/// Graph returning two distinct edges between the same pair of nodes
struct DoubleEdgeGraph;

#[async_trait]
impl GraphStore for DoubleEdgeGraph {
    fn backend(&self) -> &'static str {
        "double-edge"
    }

    async fn apply(&self, _mutation: &GraphMutation) -> OntologyResult<()> {
        Ok(())
    }

    async fn neighbors(&self, node_key: &str, _limit: usize) -> OntologyResult<Vec<NeighborRow>> {
        let center = node(node_key, NodeLabel::Entity);
        let neighbor = node(&document_node_key("doc-1"), NodeLabel::Document);
        let row = |edge_type| NeighborRow {
            center: center.clone(),
            edge: GraphEdge {
                source: neighbor.key.clone(),
                target: center.key.clone(),
                edge_type,
                properties: Metadata::new(),
            },
            neighbor: neighbor.clone(),
        };
        Ok(vec![row(EdgeType::Mentions), row(EdgeType::HasTopic)])
    }

    async fn node(&self, _key: &str) -> OntologyResult<Option<GraphNode>> {
        Ok(None)
    }

    async fn edge(&self, _source: &str, _target: &str, _edge_type: EdgeType) -> OntologyResult<Option<GraphEdge>> {
        Ok(None)
    }

    async fn edge_count(&self) -> OntologyResult<i64> {
        Ok(2)
    }
}

// ============================================================================
// Neighbor Expansion
// ============================================================================

#[tokio::test]
async fn test_neighbor_reached_by_two_edges_appears_once() {
    let service = GraphQueryService::new(Arc::new(DoubleEdgeGraph));
    let graph = service.neighbors("Jane Smith", DEFAULT_NEIGHBOR_LIMIT).await.unwrap();

    assert_eq!(graph.edges.len(), 2);
    assert_eq!(graph.nodes.len(), 2);
    let doc_nodes = graph
        .nodes
        .iter()
        .filter(|n| n.key == document_node_key("doc-1"))
        .count();
    assert_eq!(doc_nodes, 1);
}

#[tokio::test]
async fn test_neighbors_after_ingestion() {
    let h = harness_with(Some(analysis_only()), CONTEXT_CAP);
    h.pipeline
        .ingest_document(&document("a", "", analysis(&[("Jane Smith", "PERSON"), ("John Doe", "PERSON")])))
        .await;
    h.pipeline
        .ingest_document(&document("b", "", analysis(&[("Jane Smith", "PERSON")])))
        .await;

    let service = GraphQueryService::new(h.graph.clone());
    let graph = service.neighbors("jane smith", DEFAULT_NEIGHBOR_LIMIT).await.unwrap();

    assert_eq!(graph.nodes[0].key, entity_node_key("jane smith"));
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);
    assert!(graph.edges.iter().all(|e| e.edge_type == EdgeType::Mentions));
}

#[tokio::test]
async fn test_missing_entity_returns_empty_graph() {
    let h = harness_with(Some(analysis_only()), CONTEXT_CAP);
    let service = GraphQueryService::new(h.graph.clone());

    let graph = service.neighbors("nonexistent", DEFAULT_NEIGHBOR_LIMIT).await.unwrap();
    assert!(graph.nodes.is_empty());
    assert!(graph.edges.is_empty());
}

// ============================================================================
// Co-occurrence and Statistics
// ============================================================================

#[tokio::test]
async fn test_related_entities_ranking() {
    let h = harness_with(Some(analysis_only()), CONTEXT_CAP);
    h.pipeline
        .ingest_document(&document("a", "", analysis(&[("Xavier Cole", "PERSON"), ("Yolanda Hart", "PERSON")])))
        .await;
    h.pipeline
        .ingest_document(&document("b", "", analysis(&[("Xavier Cole", "PERSON"), ("Zack Moore", "PERSON")])))
        .await;

    let service = StatisticsService::new(h.relational.clone());
    let related = service.related_entities("Xavier Cole", DEFAULT_RELATED_LIMIT).await.unwrap();

    let names: Vec<_> = related.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Yolanda Hart", "Zack Moore"]);
    assert!(related.iter().all(|r| r.co_occurrence_count == 1));

    assert!(service.related_entities("nobody", DEFAULT_RELATED_LIMIT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_statistics_and_profiles() {
    let h = harness_with(Some(analysis_only()), CONTEXT_CAP);
    h.pipeline
        .ingest_document(&document("a", "", analysis(&[("Jane Smith", "PERSON"), ("Senate", "ORG")])))
        .await;
    h.pipeline
        .ingest_document(&document("b", "", analysis(&[("Jane Smith", "PERSON")])))
        .await;

    let service = StatisticsService::new(h.relational.clone());
    let stats = service.entity_statistics(1).await.unwrap();
    assert_eq!(stats.total_entities, 2);
    assert_eq!(stats.total_mentions, 3);
    assert_eq!(stats.counts_by_type["PERSON"], 1);
    assert_eq!(stats.counts_by_type["ORGANIZATION"], 1);
    assert_eq!(stats.top_entities.len(), 1);
    assert_eq!(stats.top_entities[0].name, "Jane Smith");

    let profiles = service.entity_profiles("JANE SMITH").await.unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].documents.len(), 2);
    assert_eq!(profiles[0].total_mentions(), 2);
}
