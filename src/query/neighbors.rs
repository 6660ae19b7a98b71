//! Entity neighbor expansion over the graph store

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::normalize_name;
use crate::ontology::OntologyResult;
use crate::storage::graph::{entity_node_key, GraphEdge, GraphNode, GraphStore};

pub const DEFAULT_NEIGHBOR_LIMIT: usize = 25;

/// Depth-1 subgraph around one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeighborGraph {
    /// Center node first, then neighbors in result order; each key once
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl NeighborGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn node(&self, key: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.key == key)
    }
}

#[derive(Clone)]
pub struct GraphQueryService {
    graph: Arc<dyn GraphStore>,
}

impl GraphQueryService {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Nodes and incident edges around the entity called `name`
    ///
    /// `limit` bounds the number of edge rows read. An unknown entity yields
    /// an empty graph.
    pub async fn neighbors(&self, name: &str, limit: usize) -> OntologyResult<NeighborGraph> {
        let normalized = normalize_name(name);
        if normalized.is_empty() || limit == 0 {
            return Ok(NeighborGraph::default());
        }

        let rows = self.graph.neighbors(&entity_node_key(&normalized), limit).await?;

        let mut graph = NeighborGraph::default();
        let mut seen_nodes = HashSet::new();
        let mut seen_edges = HashSet::new();
        for row in rows {
            for node in [row.center, row.neighbor] {
                if seen_nodes.insert(node.key.clone()) {
                    graph.nodes.push(node);
                }
            }
            if seen_edges.insert(row.edge.id()) {
                graph.edges.push(row.edge);
            }
        }

        debug!(
            entity = %normalized,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Neighbor expansion"
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, GraphMutation, MentionEdge, RevisionedContext};
    use crate::storage::graph::{document_node_key, SqliteGraphStore};
    use chrono::Utc;

    fn mention(name: &str) -> MentionEdge {
        MentionEdge {
            name: name.to_string(),
            normalized_name: normalize_name(name),
            entity_type: EntityType::Person,
            contexts: vec![RevisionedContext {
                revision: 1,
                text: format!("{name} said"),
            }],
            seen_at: Utc::now(),
        }
    }

    fn mutation(doc: &str, names: &[&str], topics: &[&str]) -> GraphMutation {
        GraphMutation {
            document_id: doc.to_string(),
            revision: 1,
            source_url: format!("https://example.com/{doc}"),
            summary: String::new(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            entities: names.iter().map(|n| mention(n)).collect(),
        }
    }

    async fn service() -> GraphQueryService {
        let store = SqliteGraphStore::in_memory(10).unwrap();
        store.apply(&mutation("a", &["Jane Smith", "John Doe"], &["budget"])).await.unwrap();
        store.apply(&mutation("b", &["Jane Smith"], &[])).await.unwrap();
        GraphQueryService::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_neighbors_of_entity() {
        let service = service().await;
        let graph = service.neighbors("  JANE smith ", 25).await.unwrap();

        assert_eq!(graph.nodes[0].key, entity_node_key("jane smith"));
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);
        assert!(graph.node(&document_node_key("a")).is_some());
        assert!(graph.node(&document_node_key("b")).is_some());
    }

    #[tokio::test]
    async fn test_center_node_emitted_once() {
        let service = service().await;
        let graph = service.neighbors("Jane Smith", 25).await.unwrap();

        let centers = graph
            .nodes
            .iter()
            .filter(|n| n.key == entity_node_key("jane smith"))
            .count();
        assert_eq!(centers, 1);
    }

    #[tokio::test]
    async fn test_limit_bounds_rows() {
        let service = service().await;
        let graph = service.neighbors("Jane Smith", 1).await.unwrap();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_entity_is_empty() {
        let service = service().await;
        assert!(service.neighbors("nonexistent", 25).await.unwrap().is_empty());
        assert!(service.neighbors("   ", 25).await.unwrap().is_empty());
    }
}
