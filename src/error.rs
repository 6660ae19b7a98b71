//! Unified error handling for the polgraph crate
//!
//! Domain errors stay typed inside their modules ([`OntologyError`] for the
//! pipeline and stores, [`ChannelError`] for alert delivery). This module
//! wraps them in a single [`Error`] for code that crosses module boundaries,
//! such as service wiring and the CLI.
//!
//! # Architecture
//!
//! - [`PolgraphErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use polgraph::error::{Error, ErrorCategory, PolgraphErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = %err.category(), "Retrying: {err}");
//!     } else {
//!         tracing::error!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::notifications::ChannelError;
pub use crate::ontology::error::OntologyError;

/// Common trait for all polgraph error types
pub trait PolgraphErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A mention source failed
    Extraction,
    /// Relational store errors, including entity write conflicts
    Storage,
    /// Graph store and graph sync errors
    Graph,
    /// Configuration and validation errors
    Config,
    /// Alert delivery errors
    Notification,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Storage => "storage",
            Self::Graph => "graph",
            Self::Config => "config",
            Self::Notification => "notification",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PolgraphErrorTrait for OntologyError {
    fn is_recoverable(&self) -> bool {
        OntologyError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            OntologyError::ExtractionPartialFailure { .. } => ErrorCategory::Extraction,
            OntologyError::StoreUnavailable { store, .. } | OntologyError::StoreFailure { store, .. } => {
                if store == crate::storage::graph::GRAPH {
                    ErrorCategory::Graph
                } else {
                    ErrorCategory::Storage
                }
            }
            OntologyError::GraphSyncFailure { .. } => ErrorCategory::Graph,
            OntologyError::EntityConflict { .. } | OntologyError::Serialization { .. } => {
                ErrorCategory::Storage
            }
            OntologyError::InvalidConfig { .. } => ErrorCategory::Config,
            OntologyError::Cancelled { .. } | OntologyError::InvalidStateTransition { .. } => {
                ErrorCategory::Other
            }
        }
    }
}

impl PolgraphErrorTrait for ChannelError {
    fn is_recoverable(&self) -> bool {
        self.is_retryable()
    }

    fn category(&self) -> ErrorCategory {
        match self {
            ChannelError::InvalidConfig(_) => ErrorCategory::Config,
            _ => ErrorCategory::Notification,
        }
    }
}

/// Unified error type for the polgraph crate
#[derive(Error, Debug)]
pub enum Error {
    /// Pipeline and store errors
    #[error("Ontology error: {0}")]
    Ontology(#[from] OntologyError),

    /// Alert channel errors
    #[error("Notification error: {0}")]
    Notification(#[from] ChannelError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PolgraphErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Ontology(e) => PolgraphErrorTrait::is_recoverable(e),
            Self::Notification(e) => PolgraphErrorTrait::is_recoverable(e),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Ontology(e) => e.category(),
            Self::Notification(e) => e.category(),
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
