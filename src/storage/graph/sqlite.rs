//! SQLite-backed property graph
//!
//! Two tables: `graph_nodes` keyed by node key and `graph_edges` keyed by
//! `(source, target, edge_type)`. Properties are JSON objects merged with
//! [`merge_metadata`]. One mutation is applied in a single transaction, on
//! tokio's blocking pool like every other statement.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use serde_json::json;
use tokio::sync::Mutex;

use super::{
    document_node_key, entity_node_key, merge_mention_contexts, stored_revision,
    topic_node_key, EdgeType, GraphEdge, GraphNode, GraphStore, NeighborRow, NodeLabel, GRAPH,
};
use crate::models::{GraphMutation, Metadata};
use crate::ontology::error::{OntologyError, OntologyResult};
use crate::ontology::metadata::merge_metadata;
use crate::storage::sqlite::run_blocking;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS graph_nodes (
        key TEXT PRIMARY KEY,
        label TEXT NOT NULL,
        properties TEXT NOT NULL DEFAULT '{}'
    );

    CREATE TABLE IF NOT EXISTS graph_edges (
        source TEXT NOT NULL,
        target TEXT NOT NULL,
        edge_type TEXT NOT NULL,
        properties TEXT NOT NULL DEFAULT '{}',
        PRIMARY KEY (source, target, edge_type)
    );

    CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target);
"#;

fn graph_err(err: rusqlite::Error) -> OntologyError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
            ) =>
        {
            OntologyError::unavailable(GRAPH, err)
        }
        _ => OntologyError::store(GRAPH, err),
    }
}

fn parse_props(raw: &str) -> OntologyResult<Metadata> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_label(raw: &str) -> OntologyResult<NodeLabel> {
    NodeLabel::parse(raw).ok_or_else(|| OntologyError::Serialization {
        reason: format!("unknown node label '{raw}'"),
    })
}

fn parse_edge_type(raw: &str) -> OntologyResult<EdgeType> {
    EdgeType::parse(raw).ok_or_else(|| OntologyError::Serialization {
        reason: format!("unknown edge type '{raw}'"),
    })
}

fn load_node_props(tx: &Transaction<'_>, key: &str) -> OntologyResult<Option<Metadata>> {
    let raw: Option<String> = tx
        .query_row(
            "SELECT properties FROM graph_nodes WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(graph_err)?;
    raw.as_deref().map(parse_props).transpose()
}

fn save_node(
    tx: &Transaction<'_>,
    key: &str,
    label: NodeLabel,
    properties: &Metadata,
) -> OntologyResult<()> {
    tx.execute(
        r#"
        INSERT INTO graph_nodes (key, label, properties) VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET properties = excluded.properties
        "#,
        params![key, label.as_str(), serde_json::to_string(properties)?],
    )
    .map_err(graph_err)?;
    Ok(())
}

fn load_edge_props(
    tx: &Transaction<'_>,
    source: &str,
    target: &str,
    edge_type: EdgeType,
) -> OntologyResult<Option<Metadata>> {
    let raw: Option<String> = tx
        .query_row(
            "SELECT properties FROM graph_edges WHERE source = ?1 AND target = ?2 AND edge_type = ?3",
            params![source, target, edge_type.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(graph_err)?;
    raw.as_deref().map(parse_props).transpose()
}

fn save_edge(
    tx: &Transaction<'_>,
    source: &str,
    target: &str,
    edge_type: EdgeType,
    properties: &Metadata,
) -> OntologyResult<()> {
    tx.execute(
        r#"
        INSERT INTO graph_edges (source, target, edge_type, properties) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(source, target, edge_type) DO UPDATE SET properties = excluded.properties
        "#,
        params![source, target, edge_type.as_str(), serde_json::to_string(properties)?],
    )
    .map_err(graph_err)?;
    Ok(())
}

/// Merge `incoming` into the node, creating it if absent
fn merge_node(
    tx: &Transaction<'_>,
    key: &str,
    label: NodeLabel,
    incoming: &Metadata,
) -> OntologyResult<Metadata> {
    let merged = match load_node_props(tx, key)? {
        Some(existing) => merge_metadata(&existing, incoming),
        None => incoming.clone(),
    };
    save_node(tx, key, label, &merged)?;
    Ok(merged)
}

/// SQLite implementation of [`GraphStore`]
#[derive(Clone)]
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
    context_cap: usize,
}

impl SqliteGraphStore {
    pub fn new(path: impl AsRef<Path>, context_cap: usize) -> OntologyResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OntologyError::unavailable(GRAPH, e))?;
        }

        let conn = Connection::open(path).map_err(graph_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(graph_err)?;

        let store = Self::from_connection(conn, context_cap)?;
        tracing::info!(path = %path.display(), "SQLite graph store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory(context_cap: usize) -> OntologyResult<Self> {
        let conn = Connection::open_in_memory().map_err(graph_err)?;
        Self::from_connection(conn, context_cap)
    }

    fn from_connection(conn: Connection, context_cap: usize) -> OntologyResult<Self> {
        conn.execute_batch(SCHEMA).map_err(graph_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            context_cap,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> OntologyResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> OntologyResult<T> + Send + 'static,
    {
        run_blocking(GRAPH, Arc::clone(&self.conn), f).await
    }
}

fn apply_in_tx(tx: &Transaction<'_>, mutation: &GraphMutation, context_cap: usize) -> OntologyResult<()> {
    let doc_key = document_node_key(&mutation.document_id);

    // Document properties never move backwards to an older revision
    let existing = load_node_props(tx, &doc_key)?;
    let current = existing.as_ref().map(stored_revision).unwrap_or(0);
    if mutation.revision >= current {
        let mut props = Metadata::new();
        props.insert("id".to_string(), json!(mutation.document_id));
        props.insert("source_url".to_string(), json!(mutation.source_url));
        props.insert("summary".to_string(), json!(mutation.summary));
        props.insert("revision".to_string(), json!(mutation.revision));
        merge_node(tx, &doc_key, NodeLabel::Document, &props)?;
    }

    for topic in &mutation.topics {
        let topic_key = topic_node_key(topic);
        let mut props = Metadata::new();
        props.insert("name".to_string(), json!(topic));
        merge_node(tx, &topic_key, NodeLabel::Topic, &props)?;

        if load_edge_props(tx, &doc_key, &topic_key, EdgeType::HasTopic)?.is_none() {
            save_edge(tx, &doc_key, &topic_key, EdgeType::HasTopic, &Metadata::new())?;
        }
    }

    for edge in &mutation.entities {
        let entity_key = entity_node_key(&edge.normalized_name);
        let seen_at = edge.seen_at.to_rfc3339_opts(SecondsFormat::Micros, true);

        let previous_seen = load_node_props(tx, &entity_key)?
            .and_then(|p| p.get("last_seen").and_then(|v| v.as_str()).map(str::to_string));
        let last_seen = match previous_seen {
            Some(prev) if prev > seen_at => prev,
            _ => seen_at,
        };

        let mut props = Metadata::new();
        props.insert("name".to_string(), json!(edge.name));
        props.insert("normalized_name".to_string(), json!(edge.normalized_name));
        props.insert("entity_type".to_string(), json!(edge.entity_type.as_str()));
        props.insert("last_seen".to_string(), json!(last_seen));
        merge_node(tx, &entity_key, NodeLabel::Entity, &props)?;

        let mut edge_props =
            load_edge_props(tx, &doc_key, &entity_key, EdgeType::Mentions)?.unwrap_or_default();
        let changed =
            merge_mention_contexts(&mut edge_props, edge, mutation.revision, context_cap);
        if changed {
            save_edge(tx, &doc_key, &entity_key, EdgeType::Mentions, &edge_props)?;
        }
    }

    Ok(())
}

fn node_from_parts(key: String, label: &str, props: &str) -> OntologyResult<GraphNode> {
    Ok(GraphNode {
        key,
        label: parse_label(label)?,
        properties: parse_props(props)?,
    })
}

fn get_node(conn: &Connection, key: &str) -> OntologyResult<Option<GraphNode>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT label, properties FROM graph_nodes WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(graph_err)?;

    row.map(|(label, props)| node_from_parts(key.to_string(), &label, &props))
        .transpose()
}

fn neighbor_rows(conn: &Connection, node_key: &str, limit: usize) -> OntologyResult<Vec<NeighborRow>> {
    let Some(center) = get_node(conn, node_key)? else {
        return Ok(Vec::new());
    };

    let mut stmt = conn
        .prepare(
            r#"
            SELECT e.source, e.target, e.edge_type, e.properties, n.key, n.label, n.properties
            FROM graph_edges e
            JOIN graph_nodes n
              ON n.key = CASE WHEN e.source = ?1 THEN e.target ELSE e.source END
            WHERE e.source = ?1 OR e.target = ?1
            ORDER BY e.edge_type, n.key
            LIMIT ?2
            "#,
        )
        .map_err(graph_err)?;

    let raw_rows = stmt
        .query_map(params![node_key, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .map_err(graph_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(graph_err)?;

    raw_rows
        .into_iter()
        .map(|(source, target, edge_type, edge_props, key, label, node_props)| {
            Ok(NeighborRow {
                center: center.clone(),
                edge: GraphEdge {
                    source,
                    target,
                    edge_type: parse_edge_type(&edge_type)?,
                    properties: parse_props(&edge_props)?,
                },
                neighbor: node_from_parts(key, &label, &node_props)?,
            })
        })
        .collect()
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn apply(&self, mutation: &GraphMutation) -> OntologyResult<()> {
        let owned = mutation.clone();
        let context_cap = self.context_cap;
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(graph_err)?;
            apply_in_tx(&tx, &owned, context_cap)?;
            tx.commit().map_err(graph_err)
        })
        .await?;

        tracing::debug!(
            document_id = %mutation.document_id,
            revision = mutation.revision,
            entities = mutation.entities.len(),
            topics = mutation.topics.len(),
            "Graph mutation applied"
        );
        Ok(())
    }

    async fn neighbors(&self, node_key: &str, limit: usize) -> OntologyResult<Vec<NeighborRow>> {
        let node_key = node_key.to_string();
        self.with_conn(move |conn| neighbor_rows(conn, &node_key, limit)).await
    }

    async fn node(&self, key: &str) -> OntologyResult<Option<GraphNode>> {
        let key = key.to_string();
        self.with_conn(move |conn| get_node(conn, &key)).await
    }

    async fn edge(
        &self,
        source: &str,
        target: &str,
        edge_type: EdgeType,
    ) -> OntologyResult<Option<GraphEdge>> {
        let (source_key, target_key) = (source.to_string(), target.to_string());
        let raw: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT properties FROM graph_edges WHERE source = ?1 AND target = ?2 AND edge_type = ?3",
                    params![source_key, target_key, edge_type.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(graph_err)
            })
            .await?;

        raw.map(|props| {
            Ok(GraphEdge {
                source: source.to_string(),
                target: target.to_string(),
                edge_type,
                properties: parse_props(&props)?,
            })
        })
        .transpose()
    }

    async fn edge_count(&self) -> OntologyResult<i64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM graph_edges", [], |row| row.get(0))
                .map_err(graph_err)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, MentionEdge, RevisionedContext};
    use chrono::Utc;

    fn mutation(doc: &str, revision: i64, entities: &[&str], topics: &[&str]) -> GraphMutation {
        GraphMutation {
            document_id: doc.to_string(),
            revision,
            source_url: format!("https://example.com/{doc}"),
            summary: format!("summary r{revision}"),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            entities: entities
                .iter()
                .map(|name| MentionEdge {
                    name: name.to_string(),
                    normalized_name: name.to_lowercase(),
                    entity_type: EntityType::Person,
                    contexts: vec![RevisionedContext {
                        revision,
                        text: format!("{name} in {doc} r{revision}"),
                    }],
                    seen_at: Utc::now(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_apply_creates_nodes_and_edges() {
        let store = SqliteGraphStore::in_memory(10).unwrap();
        store
            .apply(&mutation("a", 1, &["Jane Smith", "Senate"], &["budget"]))
            .await
            .unwrap();

        let doc = store.node("doc:a").await.unwrap().unwrap();
        assert_eq!(doc.label, NodeLabel::Document);
        assert_eq!(doc.properties["summary"], json!("summary r1"));

        let entity = store.node("entity:jane smith").await.unwrap().unwrap();
        assert_eq!(entity.properties["entity_type"], json!("PERSON"));

        assert!(store
            .edge("doc:a", "topic:budget", EdgeType::HasTopic)
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.edge_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reapply_does_not_duplicate_contexts() {
        let store = SqliteGraphStore::in_memory(10).unwrap();
        let m = mutation("a", 1, &["Jane Smith"], &[]);
        store.apply(&m).await.unwrap();
        store.apply(&m).await.unwrap();

        let edge = store
            .edge("doc:a", "entity:jane smith", EdgeType::Mentions)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.contexts().len(), 1);
        assert_eq!(store.edge_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_revision_appends_up_to_cap() {
        let store = SqliteGraphStore::in_memory(2).unwrap();
        for rev in 1..=3 {
            store.apply(&mutation("a", rev, &["Jane Smith"], &[])).await.unwrap();
        }

        let edge = store
            .edge("doc:a", "entity:jane smith", EdgeType::Mentions)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            edge.contexts(),
            vec!["Jane Smith in a r2".to_string(), "Jane Smith in a r3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stale_revision_keeps_document_summary() {
        let store = SqliteGraphStore::in_memory(10).unwrap();
        store.apply(&mutation("a", 2, &[], &[])).await.unwrap();
        store.apply(&mutation("a", 1, &[], &[])).await.unwrap();

        let doc = store.node("doc:a").await.unwrap().unwrap();
        assert_eq!(doc.properties["summary"], json!("summary r2"));
    }

    #[tokio::test]
    async fn test_neighbors_both_directions() {
        let store = SqliteGraphStore::in_memory(10).unwrap();
        store.apply(&mutation("a", 1, &["Jane Smith"], &[])).await.unwrap();
        store.apply(&mutation("b", 1, &["Jane Smith"], &[])).await.unwrap();

        let rows = store.neighbors("entity:jane smith", 25).await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.neighbor.key.as_str()).collect();
        assert_eq!(keys, vec!["doc:a", "doc:b"]);
        assert!(rows.iter().all(|r| r.center.key == "entity:jane smith"));

        let limited = store.neighbors("entity:jane smith", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_neighbors_of_missing_node_is_empty() {
        let store = SqliteGraphStore::in_memory(10).unwrap();
        assert!(store.neighbors("entity:nobody", 25).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_applies_from_spawned_tasks() {
        let store = SqliteGraphStore::in_memory(10).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let doc = format!("d{i}");
                    store.apply(&mutation(&doc, 1, &["Jane Smith"], &["budget"])).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.edge_count().await.unwrap(), 16);
        assert_eq!(store.neighbors("entity:jane smith", 25).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_abandoned_apply_leaves_store_usable() {
        let store = SqliteGraphStore::in_memory(10).unwrap();
        let m = mutation("a", 1, &["Jane Smith"], &[]);
        let _ = tokio::time::timeout(std::time::Duration::ZERO, store.apply(&m)).await;

        store.apply(&m).await.unwrap();
        assert_eq!(store.edge_count().await.unwrap(), 1);
    }
}
