//! Graph store abstraction
//!
//! Nodes are referenced by stable string keys (`doc:<id>`, `entity:<name>`,
//! `topic:<name>`) and edges by `(source, target, type)`, so there is at most
//! one edge of a type between an ordered node pair.
//!
//! Writes are pattern-matching upserts: create if absent, merge properties if
//! present. `MENTIONS` edges remember the highest document revision they have
//! absorbed and only append contexts from newer revisions, which makes
//! re-applying a pending mutation after a partial failure a no-op.

pub mod neo4j;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{GraphMutation, MentionEdge, Metadata};
use crate::ontology::error::OntologyResult;

pub use neo4j::Neo4jGraphStore;
pub use sqlite::SqliteGraphStore;

/// Store name used in errors and logs
pub const GRAPH: &str = "graph";

/// Edge property holding the highest absorbed document revision
pub const PROP_REVISION: &str = "revision";
pub const PROP_CONTEXTS: &str = "contexts";
pub const PROP_CONTEXT_REVISIONS: &str = "context_revisions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Document,
    Entity,
    Topic,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Document => "Document",
            NodeLabel::Entity => "Entity",
            NodeLabel::Topic => "Topic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Document" => Some(NodeLabel::Document),
            "Entity" => Some(NodeLabel::Entity),
            "Topic" => Some(NodeLabel::Topic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Document to Entity
    Mentions,
    /// Document to Topic
    HasTopic,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Mentions => "MENTIONS",
            EdgeType::HasTopic => "HAS_TOPIC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MENTIONS" => Some(EdgeType::Mentions),
            "HAS_TOPIC" => Some(EdgeType::HasTopic),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: String,
    pub label: NodeLabel,
    pub properties: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
    pub properties: Metadata,
}

impl GraphEdge {
    /// Identity of the edge within the graph
    pub fn id(&self) -> (String, String, EdgeType) {
        (self.source.clone(), self.target.clone(), self.edge_type)
    }

    /// Context log of a `MENTIONS` edge, oldest first
    pub fn contexts(&self) -> Vec<String> {
        self.properties
            .get(PROP_CONTEXTS)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// One incident edge of a center node together with the node on its far side
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborRow {
    pub center: GraphNode,
    pub edge: GraphEdge,
    pub neighbor: GraphNode,
}

pub fn document_node_key(document_id: &str) -> String {
    format!("doc:{document_id}")
}

pub fn entity_node_key(normalized_name: &str) -> String {
    format!("entity:{normalized_name}")
}

pub fn topic_node_key(topic: &str) -> String {
    format!("topic:{topic}")
}

/// Graph store
#[async_trait]
pub trait GraphStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Idempotently merge one document's nodes and edges
    async fn apply(&self, mutation: &GraphMutation) -> OntologyResult<()>;

    /// Depth-1 expansion around `node_key` in both directions, at most `limit` rows
    async fn neighbors(&self, node_key: &str, limit: usize) -> OntologyResult<Vec<NeighborRow>>;

    async fn node(&self, key: &str) -> OntologyResult<Option<GraphNode>>;

    async fn edge(
        &self,
        source: &str,
        target: &str,
        edge_type: EdgeType,
    ) -> OntologyResult<Option<GraphEdge>>;

    async fn edge_count(&self) -> OntologyResult<i64>;
}

/// Revision stored on an edge's properties, zero when absent
pub fn stored_revision(properties: &Metadata) -> i64 {
    properties
        .get(PROP_REVISION)
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Append the contexts of `edge` newer than what `properties` already holds
///
/// Contexts are kept as two parallel lists so the same layout works for
/// property stores that only allow primitive arrays. Returns `false` when
/// `revision` was already absorbed and nothing changed.
pub fn merge_mention_contexts(
    properties: &mut Metadata,
    edge: &MentionEdge,
    revision: i64,
    cap: usize,
) -> bool {
    let stored = stored_revision(properties);
    if revision <= stored {
        return false;
    }

    let mut texts: Vec<String> = properties
        .get(PROP_CONTEXTS)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let mut revisions: Vec<i64> = properties
        .get(PROP_CONTEXT_REVISIONS)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    revisions.resize(texts.len(), stored);

    for context in edge.contexts.iter().filter(|c| c.revision > stored) {
        texts.push(context.text.clone());
        revisions.push(context.revision);
    }

    if texts.len() > cap {
        let excess = texts.len() - cap;
        texts.drain(..excess);
        revisions.drain(..excess);
    }

    properties.insert(PROP_CONTEXTS.to_string(), json!(texts));
    properties.insert(PROP_CONTEXT_REVISIONS.to_string(), json!(revisions));
    properties.insert(PROP_REVISION.to_string(), json!(revision));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, RevisionedContext};
    use chrono::Utc;

    fn edge(contexts: &[(i64, &str)]) -> MentionEdge {
        MentionEdge {
            name: "Jane Smith".to_string(),
            normalized_name: "jane smith".to_string(),
            entity_type: EntityType::Person,
            contexts: contexts
                .iter()
                .map(|(revision, text)| RevisionedContext {
                    revision: *revision,
                    text: text.to_string(),
                })
                .collect(),
            seen_at: Utc::now(),
        }
    }

    #[test]
    fn test_node_keys() {
        assert_eq!(document_node_key("abc"), "doc:abc");
        assert_eq!(entity_node_key("jane smith"), "entity:jane smith");
        assert_eq!(topic_node_key("budget"), "topic:budget");
    }

    #[test]
    fn test_edge_type_roundtrip() {
        for ty in [EdgeType::Mentions, EdgeType::HasTopic] {
            assert_eq!(EdgeType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(NodeLabel::parse("Topic"), Some(NodeLabel::Topic));
        assert_eq!(NodeLabel::parse("topic"), None);
    }

    #[test]
    fn test_merge_contexts_appends_new_revision() {
        let mut props = Metadata::new();
        assert!(merge_mention_contexts(&mut props, &edge(&[(1, "first")]), 1, 10));
        assert!(merge_mention_contexts(&mut props, &edge(&[(2, "second")]), 2, 10));

        assert_eq!(stored_revision(&props), 2);
        assert_eq!(props[PROP_CONTEXTS], json!(["first", "second"]));
        assert_eq!(props[PROP_CONTEXT_REVISIONS], json!([1, 2]));
    }

    #[test]
    fn test_merge_contexts_replay_is_noop() {
        let mut props = Metadata::new();
        merge_mention_contexts(&mut props, &edge(&[(1, "first")]), 1, 10);
        let before = props.clone();

        assert!(!merge_mention_contexts(&mut props, &edge(&[(1, "first")]), 1, 10));
        assert_eq!(props, before);
    }

    #[test]
    fn test_merge_contexts_skips_absorbed_entries_of_folded_payload() {
        let mut props = Metadata::new();
        merge_mention_contexts(&mut props, &edge(&[(1, "first")]), 1, 10);

        // A pending payload that folded revisions 1 and 2
        merge_mention_contexts(&mut props, &edge(&[(1, "first"), (2, "second")]), 2, 10);
        assert_eq!(props[PROP_CONTEXTS], json!(["first", "second"]));
    }

    #[test]
    fn test_merge_contexts_respects_cap() {
        let mut props = Metadata::new();
        for rev in 1..=5 {
            let text = format!("ctx {rev}");
            merge_mention_contexts(&mut props, &edge(&[(rev, text.as_str())]), rev, 3);
        }
        assert_eq!(props[PROP_CONTEXTS], json!(["ctx 3", "ctx 4", "ctx 5"]));
        assert_eq!(props[PROP_CONTEXT_REVISIONS], json!([3, 4, 5]));
    }

    #[test]
    fn test_edge_contexts_accessor() {
        let mut props = Metadata::new();
        merge_mention_contexts(&mut props, &edge(&[(1, "first")]), 1, 10);
        let edge = GraphEdge {
            source: "doc:a".to_string(),
            target: "entity:jane smith".to_string(),
            edge_type: EdgeType::Mentions,
            properties: props,
        };
        assert_eq!(edge.contexts(), vec!["first".to_string()]);
    }
}
