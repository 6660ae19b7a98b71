// Core data structures for the polgraph pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Open key-value map attached to entities and graph nodes
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Canonical entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Politician,
    Organization,
    Legislation,
    Location,
    Event,
    Date,
    Other,
}

impl EntityType {
    /// Get string representation (also the stored form)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Politician => "POLITICIAN",
            Self::Organization => "ORGANIZATION",
            Self::Legislation => "LEGISLATION",
            Self::Location => "LOCATION",
            Self::Event => "EVENT",
            Self::Date => "DATE",
            Self::Other => "OTHER",
        }
    }

    /// Parse the stored form
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PERSON" => Some(Self::Person),
            "POLITICIAN" => Some(Self::Politician),
            "ORGANIZATION" => Some(Self::Organization),
            "LEGISLATION" => Some(Self::Legislation),
            "LOCATION" => Some(Self::Location),
            "EVENT" => Some(Self::Event),
            "DATE" => Some(Self::Date),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }

    /// Map a raw extractor label (NER tag or analyzer type) to a canonical type
    pub fn from_label(label: &str) -> Self {
        if let Some(t) = Self::parse(label) {
            return t;
        }
        match label.trim().to_uppercase().as_str() {
            "PER" | "PEOPLE" | "NORP" => Self::Person,
            "ORG" | "AGENCY" | "PARTY" => Self::Organization,
            "GPE" | "LOC" | "FAC" | "PLACE" => Self::Location,
            "LAW" | "BILL" | "RESOLUTION" => Self::Legislation,
            "TIME" => Self::Date,
            _ => Self::Other,
        }
    }

    /// Get all entity types
    pub fn all() -> Vec<Self> {
        vec![
            Self::Person,
            Self::Politician,
            Self::Organization,
            Self::Legislation,
            Self::Location,
            Self::Event,
            Self::Date,
            Self::Other,
        ]
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case and whitespace folding used for entity identity
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Stable document id: SHA-256 of the source URL without its fragment
///
/// Unparseable URLs are hashed verbatim after trimming.
pub fn document_id_for_url(source_url: &str) -> String {
    let trimmed = source_url.trim();
    let canonical = match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Analyzer input
// ============================================================================

/// Entity as reported by the external document analyzer
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnalyzedEntity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub sentiment: Option<f64>,
}

/// Structured analysis of one document
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnalysisResult {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub entities: Vec<AnalyzedEntity>,
}

/// A document ready for ingestion
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceDocument {
    /// Explicit id; derived from the source URL when absent
    #[serde(default)]
    pub document_id: Option<String>,
    pub source_url: String,
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub analysis: AnalysisResult,
    /// Ingestion job id used to skip already completed work
    #[serde(default)]
    pub job_id: Option<String>,
}

impl SourceDocument {
    /// Create a document with an id derived from its URL
    pub fn new(source_url: impl Into<String>, raw_text: impl Into<String>, analysis: AnalysisResult) -> Self {
        Self {
            document_id: None,
            source_url: source_url.into(),
            raw_text: raw_text.into(),
            analysis,
            job_id: None,
        }
    }

    /// Resolve the document id
    pub fn id(&self) -> String {
        match &self.document_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => document_id_for_url(&self.source_url),
        }
    }
}

/// Relational document row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub source_url: String,
    pub summary: String,
    pub topics: Vec<String>,
}

// ============================================================================
// Entities and associations
// ============================================================================

/// Identity of a canonical entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub normalized_name: String,
    pub entity_type: EntityType,
}

impl EntityKey {
    pub fn new(name: &str, entity_type: EntityType) -> Self {
        Self {
            normalized_name: normalize_name(name),
            entity_type,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.normalized_name)
    }
}

/// Canonical entity record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub normalized_name: String,
    pub entity_type: EntityType,
    pub confidence_score: f64,
    pub metadata: Metadata,
    /// Incremented on every metadata update; used for conditional writes
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        EntityKey {
            normalized_name: self.normalized_name.clone(),
            entity_type: self.entity_type,
        }
    }
}

/// Fields for a first sighting
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub name: String,
    pub key: EntityKey,
    pub confidence_score: f64,
    pub metadata: Metadata,
}

/// How the resolver handled a mention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionDecision {
    Created,
    Merged,
    Unchanged,
}

impl ResolutionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Merged => "merged",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Reference to a resolved canonical entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRef {
    pub id: i64,
    pub name: String,
    pub key: EntityKey,
    pub decision: ResolutionDecision,
}

/// Document-to-entity association
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentEntity {
    pub document_id: String,
    pub entity_id: i64,
    pub mention_count: i64,
    /// Bounded context log, oldest first
    pub contexts: Vec<String>,
    pub sentiment: Option<f64>,
    /// Number of scores folded into `sentiment`
    pub sentiment_samples: i64,
    pub updated_at: DateTime<Utc>,
}

impl DocumentEntity {
    /// First retained context
    pub fn context(&self) -> Option<&str> {
        self.contexts.first().map(String::as_str)
    }
}

// ============================================================================
// Dual-store sync state
// ============================================================================

/// Per-document ingestion state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Pending,
    Resolving,
    RelationalCommitted,
    GraphPending,
    GraphSynced,
    GraphFailed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Resolving => "RESOLVING",
            Self::RelationalCommitted => "RELATIONAL_COMMITTED",
            Self::GraphPending => "GRAPH_PENDING",
            Self::GraphSynced => "GRAPH_SYNCED",
            Self::GraphFailed => "GRAPH_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RESOLVING" => Some(Self::Resolving),
            "RELATIONAL_COMMITTED" => Some(Self::RelationalCommitted),
            "GRAPH_PENDING" => Some(Self::GraphPending),
            "GRAPH_SYNCED" => Some(Self::GraphSynced),
            "GRAPH_FAILED" => Some(Self::GraphFailed),
            _ => None,
        }
    }

    /// Whether the state machine allows `self -> next`
    ///
    /// Re-ingesting a document restarts at `RelationalCommitted` from any
    /// persisted state, including the terminal ones.
    pub fn can_transition_to(&self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Resolving, RelationalCommitted)
                | (RelationalCommitted, GraphSynced)
                | (RelationalCommitted, GraphPending)
                | (GraphPending, GraphPending)
                | (GraphPending, GraphSynced)
                | (GraphPending, GraphFailed)
                | (RelationalCommitted, RelationalCommitted)
                | (GraphPending, RelationalCommitted)
                | (GraphSynced, RelationalCommitted)
                | (GraphFailed, RelationalCommitted)
        )
    }

    /// Graph write still owed
    pub fn needs_graph_sync(&self) -> bool {
        matches!(self, Self::RelationalCommitted | Self::GraphPending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::GraphSynced | Self::GraphFailed)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted sync record for one document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRecord {
    pub document_id: String,
    pub state: SyncState,
    /// Document revision the record belongs to
    pub revision: i64,
    /// Failed graph attempts for this revision
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Graph mutation still to apply; cleared once synced
    pub payload: Option<GraphMutation>,
    pub updated_at: DateTime<Utc>,
}

/// Context snippet tagged with the document revision that produced it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevisionedContext {
    pub revision: i64,
    pub text: String,
}

/// One `MENTIONS` edge to upsert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MentionEdge {
    pub name: String,
    pub normalized_name: String,
    pub entity_type: EntityType,
    pub contexts: Vec<RevisionedContext>,
    pub seen_at: DateTime<Utc>,
}

/// Everything the graph store needs to mirror one document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphMutation {
    pub document_id: String,
    pub revision: i64,
    pub source_url: String,
    pub summary: String,
    /// Lowercased topic names
    pub topics: Vec<String>,
    pub entities: Vec<MentionEdge>,
}

impl GraphMutation {
    /// Fold a newer mutation of the same document into a still-pending one
    ///
    /// Scalar properties come from `newer`; topics and entities are unioned and
    /// contexts are concatenated in revision order, keeping the last `context_cap`.
    pub fn absorb(&mut self, newer: GraphMutation, context_cap: usize) {
        self.revision = self.revision.max(newer.revision);
        self.source_url = newer.source_url;
        self.summary = newer.summary;

        let mut seen: HashSet<String> = self.topics.iter().cloned().collect();
        for topic in newer.topics {
            if seen.insert(topic.clone()) {
                self.topics.push(topic);
            }
        }

        for edge in newer.entities {
            match self
                .entities
                .iter_mut()
                .find(|e| e.normalized_name == edge.normalized_name)
            {
                Some(existing) => {
                    existing.name = edge.name;
                    existing.entity_type = edge.entity_type;
                    existing.seen_at = existing.seen_at.max(edge.seen_at);
                    existing.contexts.extend(edge.contexts);
                }
                None => self.entities.push(edge),
            }
        }

        self.trim_contexts(context_cap);
    }

    /// Keep at most `cap` contexts per edge, dropping the oldest
    pub fn trim_contexts(&mut self, cap: usize) {
        for edge in &mut self.entities {
            edge.contexts.sort_by_key(|c| c.revision);
            if edge.contexts.len() > cap {
                let excess = edge.contexts.len() - cap;
                edge.contexts.drain(..excess);
            }
        }
    }
}

// ============================================================================
// Read models
// ============================================================================

/// Entity ranked by co-occurrence with a target entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedEntity {
    pub id: i64,
    pub name: String,
    pub entity_type: EntityType,
    pub co_occurrence_count: i64,
}

/// Entity ranked by total mentions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopEntity {
    pub id: i64,
    pub name: String,
    pub entity_type: EntityType,
    pub mention_count: i64,
}

/// Aggregate statistics recomputed per request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EntityStatistics {
    pub counts_by_type: BTreeMap<String, i64>,
    pub total_entities: i64,
    pub total_mentions: i64,
    pub top_entities: Vec<TopEntity>,
}
