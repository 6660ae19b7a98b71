//! Neo4j graph store over the bolt protocol
//!
//! Every write is a Cypher `MERGE`, so each statement is idempotent on its
//! own. A mutation interrupted half-way is completed by re-applying it; the
//! `MENTIONS` revision filter keeps contexts from being appended twice.

use async_trait::async_trait;
use chrono::SecondsFormat;
use neo4rs::{query, ConfigBuilder, Graph, Query, Row};
use serde_json::json;
use tracing::{debug, info};

use super::{
    document_node_key, entity_node_key, EdgeType, GraphEdge, GraphNode,
    GraphStore, NeighborRow, NodeLabel, GRAPH, PROP_CONTEXTS, PROP_CONTEXT_REVISIONS,
    PROP_REVISION,
};
use crate::config::Neo4jConfig;
use crate::models::{GraphMutation, Metadata};
use crate::ontology::error::{OntologyError, OntologyResult};

const CONSTRAINTS: [&str; 3] = [
    "CREATE CONSTRAINT document_id IF NOT EXISTS FOR (d:Document) REQUIRE d.id IS UNIQUE",
    "CREATE CONSTRAINT entity_name IF NOT EXISTS FOR (e:Entity) REQUIRE e.normalized_name IS UNIQUE",
    "CREATE CONSTRAINT topic_name IF NOT EXISTS FOR (t:Topic) REQUIRE t.name IS UNIQUE",
];

const MERGE_DOCUMENT: &str = "
    MERGE (d:Document {id: $doc_id})
    ON CREATE SET d.key = $doc_key, d.revision = 0
    WITH d
    WHERE d.revision <= $revision
    SET d.source_url = $source_url,
        d.summary = $summary,
        d.revision = $revision";

const MERGE_TOPICS: &str = "
    MATCH (d:Document {id: $doc_id})
    UNWIND $topics AS topic
    MERGE (t:Topic {name: topic})
    ON CREATE SET t.key = 'topic:' + topic
    MERGE (d)-[:HAS_TOPIC]->(t)";

const MERGE_MENTION: &str = "
    MATCH (d:Document {id: $doc_id})
    MERGE (e:Entity {normalized_name: $normalized_name})
    ON CREATE SET e.key = $entity_key, e.last_seen = $seen_at
    SET e.name = $name,
        e.entity_type = $entity_type,
        e.last_seen = CASE WHEN e.last_seen < $seen_at THEN $seen_at ELSE e.last_seen END
    MERGE (d)-[m:MENTIONS]->(e)
    ON CREATE SET m.revision = 0, m.contexts = [], m.context_revisions = []
    WITH m, m.revision AS stored
    WHERE stored < $revision
    WITH m, stored,
         [i IN range(0, size($contexts) - 1) WHERE $context_revisions[i] > stored] AS fresh
    SET m.contexts = m.contexts + [i IN fresh | $contexts[i]],
        m.context_revisions = m.context_revisions + [i IN fresh | $context_revisions[i]],
        m.revision = $revision
    WITH m, size(m.contexts) AS n
    SET m.contexts = CASE WHEN n > $cap THEN m.contexts[n - $cap..] ELSE m.contexts END,
        m.context_revisions = CASE WHEN n > $cap
            THEN m.context_revisions[n - $cap..] ELSE m.context_revisions END";

fn neo_err(err: neo4rs::Error) -> OntologyError {
    OntologyError::unavailable(GRAPH, err)
}

/// Label implied by a node key prefix
fn label_for_key(key: &str) -> Option<NodeLabel> {
    if key.starts_with("doc:") {
        Some(NodeLabel::Document)
    } else if key.starts_with("entity:") {
        Some(NodeLabel::Entity)
    } else if key.starts_with("topic:") {
        Some(NodeLabel::Topic)
    } else {
        None
    }
}

/// Scalar node columns shared by the read queries
const NODE_COLUMNS: &str = "
    coalesce(n.name, '') AS name,
    coalesce(n.normalized_name, '') AS normalized_name,
    coalesce(n.entity_type, '') AS entity_type,
    coalesce(n.last_seen, '') AS last_seen,
    coalesce(n.summary, '') AS summary,
    coalesce(n.source_url, '') AS source_url,
    coalesce(n.id, '') AS id";

fn node_from_row(row: &Row, key: String, label: NodeLabel) -> GraphNode {
    let mut properties = Metadata::new();
    for column in [
        "name",
        "normalized_name",
        "entity_type",
        "last_seen",
        "summary",
        "source_url",
        "id",
    ] {
        let value: String = row.get(column).unwrap_or_default();
        if !value.is_empty() {
            properties.insert(column.to_string(), json!(value));
        }
    }
    if label == NodeLabel::Document {
        let revision: i64 = row.get("revision").unwrap_or(0);
        properties.insert("revision".to_string(), json!(revision));
    }
    GraphNode {
        key,
        label,
        properties,
    }
}

fn edge_properties(row: &Row) -> Metadata {
    let mut properties = Metadata::new();
    let contexts: Vec<String> = row.get("contexts").unwrap_or_default();
    let revisions: Vec<i64> = row.get("context_revisions").unwrap_or_default();
    let revision: i64 = row.get("edge_revision").unwrap_or(0);
    if !contexts.is_empty() || revision > 0 {
        properties.insert(PROP_CONTEXTS.to_string(), json!(contexts));
        properties.insert(PROP_CONTEXT_REVISIONS.to_string(), json!(revisions));
        properties.insert(PROP_REVISION.to_string(), json!(revision));
    }
    properties
}

/// Neo4j implementation of [`GraphStore`]
#[derive(Clone)]
pub struct Neo4jGraphStore {
    graph: Graph,
    context_cap: usize,
}

impl Neo4jGraphStore {
    /// Connect and ensure uniqueness constraints exist
    pub async fn connect(config: &Neo4jConfig, context_cap: usize) -> OntologyResult<Self> {
        let neo_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .fetch_size(500)
            .max_connections(config.max_connections)
            .build()
            .map_err(neo_err)?;
        let graph = Graph::connect(neo_config).await.map_err(neo_err)?;

        let store = Self { graph, context_cap };
        store.migrate().await?;
        info!(uri = %config.uri, "Neo4j graph store connected");
        Ok(store)
    }

    async fn migrate(&self) -> OntologyResult<()> {
        for statement in CONSTRAINTS {
            self.graph.run(query(statement)).await.map_err(neo_err)?;
        }
        Ok(())
    }

    async fn first_row(&self, q: Query) -> OntologyResult<Option<Row>> {
        let mut stream = self.graph.execute(q).await.map_err(neo_err)?;
        stream.next().await.map_err(neo_err)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    fn backend(&self) -> &'static str {
        "neo4j"
    }

    async fn apply(&self, mutation: &GraphMutation) -> OntologyResult<()> {
        let doc_key = document_node_key(&mutation.document_id);

        let q = query(MERGE_DOCUMENT)
            .param("doc_id", mutation.document_id.as_str())
            .param("doc_key", doc_key.as_str())
            .param("revision", mutation.revision)
            .param("source_url", mutation.source_url.as_str())
            .param("summary", mutation.summary.as_str());
        self.graph.run(q).await.map_err(neo_err)?;

        if !mutation.topics.is_empty() {
            let q = query(MERGE_TOPICS)
                .param("doc_id", mutation.document_id.as_str())
                .param("topics", mutation.topics.clone());
            self.graph.run(q).await.map_err(neo_err)?;
        }

        for edge in &mutation.entities {
            let contexts: Vec<String> = edge.contexts.iter().map(|c| c.text.clone()).collect();
            let context_revisions: Vec<i64> = edge.contexts.iter().map(|c| c.revision).collect();

            let q = query(MERGE_MENTION)
                .param("doc_id", mutation.document_id.as_str())
                .param("entity_key", entity_node_key(&edge.normalized_name))
                .param("normalized_name", edge.normalized_name.as_str())
                .param("name", edge.name.as_str())
                .param("entity_type", edge.entity_type.as_str())
                .param(
                    "seen_at",
                    edge.seen_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                )
                .param("revision", mutation.revision)
                .param("contexts", contexts)
                .param("context_revisions", context_revisions)
                .param("cap", self.context_cap as i64);
            self.graph.run(q).await.map_err(neo_err)?;
        }

        debug!(
            document_id = %mutation.document_id,
            revision = mutation.revision,
            entities = mutation.entities.len(),
            "Graph mutation applied"
        );
        Ok(())
    }

    async fn neighbors(&self, node_key: &str, limit: usize) -> OntologyResult<Vec<NeighborRow>> {
        let Some(center) = self.node(node_key).await? else {
            return Ok(Vec::new());
        };

        let cypher = format!(
            "MATCH (c:{label} {{key: $key}})-[r]-(n)
            RETURN startNode(r).key AS source,
                   endNode(r).key AS target,
                   type(r) AS edge_type,
                   coalesce(r.contexts, []) AS contexts,
                   coalesce(r.context_revisions, []) AS context_revisions,
                   coalesce(r.revision, 0) AS edge_revision,
                   n.key AS key,
                   head(labels(n)) AS label,
                   coalesce(n.revision, 0) AS revision,
                   {NODE_COLUMNS}
            ORDER BY edge_type, key
            LIMIT $limit",
            label = center.label.as_str(),
        );
        let q = query(&cypher)
            .param("key", node_key)
            .param("limit", limit as i64);

        let mut rows = Vec::new();
        let mut stream = self.graph.execute(q).await.map_err(neo_err)?;
        while let Some(row) = stream.next().await.map_err(neo_err)? {
            let edge_type: String = row.get("edge_type").unwrap_or_default();
            let label: String = row.get("label").unwrap_or_default();
            let (Some(edge_type), Some(label)) =
                (EdgeType::parse(&edge_type), NodeLabel::parse(&label))
            else {
                continue;
            };

            rows.push(NeighborRow {
                center: center.clone(),
                edge: GraphEdge {
                    source: row.get("source").unwrap_or_default(),
                    target: row.get("target").unwrap_or_default(),
                    edge_type,
                    properties: edge_properties(&row),
                },
                neighbor: node_from_row(&row, row.get("key").unwrap_or_default(), label),
            });
        }
        Ok(rows)
    }

    async fn node(&self, key: &str) -> OntologyResult<Option<GraphNode>> {
        let Some(label) = label_for_key(key) else {
            return Ok(None);
        };

        let cypher = format!(
            "MATCH (n:{label} {{key: $key}})
            RETURN coalesce(n.revision, 0) AS revision, {NODE_COLUMNS}",
            label = label.as_str(),
        );
        let row = self.first_row(query(&cypher).param("key", key)).await?;
        Ok(row.map(|row| node_from_row(&row, key.to_string(), label)))
    }

    async fn edge(
        &self,
        source: &str,
        target: &str,
        edge_type: EdgeType,
    ) -> OntologyResult<Option<GraphEdge>> {
        let (Some(source_label), Some(target_label)) = (label_for_key(source), label_for_key(target))
        else {
            return Ok(None);
        };

        let cypher = format!(
            "MATCH (s:{source_label} {{key: $source}})-[r:{edge_type}]->(t:{target_label} {{key: $target}})
            RETURN coalesce(r.contexts, []) AS contexts,
                   coalesce(r.context_revisions, []) AS context_revisions,
                   coalesce(r.revision, 0) AS edge_revision",
            source_label = source_label.as_str(),
            target_label = target_label.as_str(),
            edge_type = edge_type.as_str(),
        );
        let q = query(&cypher).param("source", source).param("target", target);

        let row = self.first_row(q).await?;
        Ok(row.map(|row| GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            edge_type,
            properties: edge_properties(&row),
        }))
    }

    async fn edge_count(&self) -> OntologyResult<i64> {
        let row = self
            .first_row(query("MATCH ()-[r]->() RETURN count(r) AS n"))
            .await?;
        Ok(row.and_then(|r| r.get::<i64>("n").ok()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::graph::topic_node_key;

    #[test]
    fn test_label_for_key() {
        assert_eq!(label_for_key("doc:abc"), Some(NodeLabel::Document));
        assert_eq!(label_for_key("entity:jane smith"), Some(NodeLabel::Entity));
        assert_eq!(label_for_key("topic:budget"), Some(NodeLabel::Topic));
        assert_eq!(label_for_key("unknown"), None);
    }

    #[test]
    fn test_keys_match_shared_helpers() {
        assert_eq!(label_for_key(&document_node_key("x")), Some(NodeLabel::Document));
        assert_eq!(label_for_key(&entity_node_key("x")), Some(NodeLabel::Entity));
        assert_eq!(label_for_key(&topic_node_key("x")), Some(NodeLabel::Topic));
    }
}
