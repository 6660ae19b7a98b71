//! Error types for the entity-resolution pipeline
//!
//! The variants follow the failure modes of ingestion: a single extractor
//! failing, a store being unreachable, the graph lagging behind a committed
//! relational write, and concurrent resolvers racing on the same entity.

use std::fmt;

/// Result type alias for pipeline operations
pub type OntologyResult<T> = Result<T, OntologyError>;

/// Error type for extraction, resolution and store coordination
#[derive(Debug)]
pub enum OntologyError {
    // =========================================================================
    // Extraction Errors
    // =========================================================================
    /// One mention source failed; the remaining sources still run
    ExtractionPartialFailure { source_id: String, reason: String },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Relational or graph store unreachable (includes timeouts)
    StoreUnavailable { store: String, reason: String },

    /// Store answered but rejected the operation
    StoreFailure { store: String, reason: String },

    /// Relational write committed but the graph write did not
    GraphSyncFailure { document_id: String, reason: String },

    /// Conditional entity update kept losing to concurrent writers
    EntityConflict {
        name: String,
        entity_type: String,
        attempts: u32,
    },

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// Ingestion cancelled before the relational commit
    Cancelled { document_id: String },

    /// Sync state machine rejected a transition
    InvalidStateTransition {
        document_id: String,
        from: String,
        to: String,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    /// JSON payload could not be encoded or decoded
    Serialization { reason: String },
}

impl fmt::Display for OntologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OntologyError::ExtractionPartialFailure { source_id, reason } => {
                write!(f, "Mention source '{source_id}' failed: {reason}")
            }
            OntologyError::StoreUnavailable { store, reason } => {
                write!(f, "{store} store unavailable: {reason}")
            }
            OntologyError::StoreFailure { store, reason } => {
                write!(f, "{store} store error: {reason}")
            }
            OntologyError::GraphSyncFailure {
                document_id,
                reason,
            } => {
                write!(f, "Graph sync failed for document '{document_id}': {reason}")
            }
            OntologyError::EntityConflict {
                name,
                entity_type,
                attempts,
            } => {
                write!(
                    f,
                    "Entity '{name}' ({entity_type}) still conflicting after {attempts} attempts"
                )
            }
            OntologyError::Cancelled { document_id } => {
                write!(f, "Ingestion of document '{document_id}' was cancelled")
            }
            OntologyError::InvalidStateTransition {
                document_id,
                from,
                to,
            } => {
                write!(
                    f,
                    "Document '{document_id}' cannot move from {from} to {to}"
                )
            }
            OntologyError::InvalidConfig {
                field,
                value,
                reason,
            } => {
                write!(f, "Invalid config '{field}' = '{value}': {reason}")
            }
            OntologyError::Serialization { reason } => {
                write!(f, "Serialization failed: {reason}")
            }
        }
    }
}

impl std::error::Error for OntologyError {}

// ============================================================================
// Conversion implementations
// ============================================================================

impl From<serde_json::Error> for OntologyError {
    fn from(err: serde_json::Error) -> Self {
        OntologyError::Serialization {
            reason: err.to_string(),
        }
    }
}

// ============================================================================
// Helper constructors
// ============================================================================

impl OntologyError {
    /// Create an extractor failure
    pub fn extraction_failed(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        OntologyError::ExtractionPartialFailure {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a store-unavailable error
    pub fn unavailable(store: impl Into<String>, reason: impl fmt::Display) -> Self {
        OntologyError::StoreUnavailable {
            store: store.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a non-transient store error
    pub fn store(store: impl Into<String>, reason: impl fmt::Display) -> Self {
        OntologyError::StoreFailure {
            store: store.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a graph sync error
    pub fn graph_sync(document_id: impl Into<String>, reason: impl fmt::Display) -> Self {
        OntologyError::GraphSyncFailure {
            document_id: document_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a config validation error
    pub fn invalid_config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        OntologyError::InvalidConfig {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Check if retrying the whole document may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OntologyError::StoreUnavailable { .. }
                | OntologyError::GraphSyncFailure { .. }
                | OntologyError::EntityConflict { .. }
        )
    }

    /// Short machine-readable kind, used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            OntologyError::ExtractionPartialFailure { .. } => "extraction_partial_failure",
            OntologyError::StoreUnavailable { .. } => "store_unavailable",
            OntologyError::StoreFailure { .. } => "store_failure",
            OntologyError::GraphSyncFailure { .. } => "graph_sync_failure",
            OntologyError::EntityConflict { .. } => "entity_conflict",
            OntologyError::Cancelled { .. } => "cancelled",
            OntologyError::InvalidStateTransition { .. } => "invalid_state_transition",
            OntologyError::InvalidConfig { .. } => "invalid_config",
            OntologyError::Serialization { .. } => "serialization",
        }
    }
}
