//! Operator alerts for degraded ingestion
//!
//! Documents whose graph write exhausted its retries, extractors that keep
//! failing and unreachable stores are surfaced as [`Alert`]s and routed to
//! every registered channel.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │      NotificationManager                   │
//! │  - Alert generation                        │
//! │  - Deduplication window                    │
//! │  - Channel routing                         │
//! │  - Bounded history of recent alerts        │
//! └────────────────────────────────────────────┘
//!                     │
//!             ┌───────┴───────┐
//!             ▼               ▼
//!       ┌─────────┐     ┌─────────┐
//!       │   Log   │     │ Webhook │
//!       │ Channel │     │ Channel │
//!       └─────────┘     └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use polgraph::notifications::{AlertCondition, NotificationManager, WebhookConfig};
//!
//! let mut manager = NotificationManager::new().with_dedup_window_secs(300);
//! manager.add_log_channel();
//! manager.add_webhook(WebhookConfig::new("https://hooks.example.com/alerts"))?;
//! let notifier = manager.into_shared();
//!
//! let condition = AlertCondition::GraphSyncExhausted {
//!     document_id: "3f2a...".to_string(),
//!     attempts: 5,
//! };
//! notifier.alert(condition, "Graph write failed".into(), Vec::new()).await;
//! ```

pub mod channels;
pub mod conditions;
mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use channels::log::LogChannel;
pub use channels::webhook::{WebhookChannel, WebhookConfig};
pub use channels::{Channel, ChannelError, ChannelResult, DeliveryStatus};
pub use conditions::AlertCondition;
pub use manager::{NotificationManager, SharedNotifier};

/// Severity level of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational alerts for tracking purposes
    Info,
    /// Warning alerts that require attention
    Warning,
    /// Critical alerts requiring immediate action
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert status in the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Alert created but not yet triggered
    Created,
    /// Alert condition met and notification sent
    Triggered,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Triggered => "triggered",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An alert instance with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    /// Additional context such as the last store error
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(condition: AlertCondition, severity: AlertSeverity, message: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            condition,
            severity,
            status: AlertStatus::Created,
            message,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            triggered_at: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn trigger(&mut self) {
        self.status = AlertStatus::Triggered;
        self.triggered_at = Some(Utc::now());
    }
}
