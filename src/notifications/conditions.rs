//! Alert conditions raised by the ingestion pipeline

use serde::{Deserialize, Serialize};

use super::AlertSeverity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertCondition {
    /// A document's graph write failed on every allowed attempt
    ///
    /// The relational record stays authoritative and queryable; graph
    /// traversal for the document is stale or missing until an operator
    /// requeues it.
    GraphSyncExhausted {
        document_id: String,
        attempts: u32,
    },

    /// A mention source failed for a document
    ExtractorFailing {
        source_id: String,
        document_id: String,
    },

    /// A store stayed unreachable after every whole-document retry
    StoreUnavailable {
        store: String,
        document_id: String,
    },
}

impl AlertCondition {
    /// Stable type tag, matching the serialized `type` field
    pub fn condition_type(&self) -> &'static str {
        match self {
            Self::GraphSyncExhausted { .. } => "graph_sync_exhausted",
            Self::ExtractorFailing { .. } => "extractor_failing",
            Self::StoreUnavailable { .. } => "store_unavailable",
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::GraphSyncExhausted {
                document_id,
                attempts,
            } => format!("Graph sync for document {document_id} failed after {attempts} attempts"),
            Self::ExtractorFailing {
                source_id,
                document_id,
            } => format!("Mention source '{source_id}' failed on document {document_id}"),
            Self::StoreUnavailable { store, document_id } => {
                format!("The {store} store was unavailable while ingesting document {document_id}")
            }
        }
    }

    pub fn default_severity(&self) -> AlertSeverity {
        match self {
            Self::GraphSyncExhausted { .. } => AlertSeverity::Critical,
            Self::StoreUnavailable { .. } => AlertSeverity::Critical,
            Self::ExtractorFailing { .. } => AlertSeverity::Warning,
        }
    }

    /// Key used to suppress repeats inside the dedup window
    pub fn dedup_key(&self) -> String {
        match self {
            // Extractor alerts are keyed per source, not per document
            Self::ExtractorFailing { source_id, .. } => {
                format!("{}:{source_id}", self.condition_type())
            }
            _ => format!("{}:{}", self.condition_type(), self.description()),
        }
    }
}
