//! Delivery channels for alerts

pub mod log;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::notifications::Alert;

pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The receiver rejected the request; resending will not help
    #[error("HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The receiver failed on its side; worth resending
    #[error("HTTP {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Channel temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Channel error: {0}")]
    Other(String),
}

impl ChannelError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::HttpError(_) | ChannelError::ServerError { .. } | ChannelError::Unavailable(_)
        )
    }
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub success: bool,
    pub channel: String,
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DeliveryStatus {
    pub fn success(channel: impl Into<String>) -> Self {
        Self {
            success: true,
            channel: channel.into(),
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn success_with_message(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success(channel)
        }
    }

    pub fn failure(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            channel: channel.into(),
            message: Some(message.into()),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        write!(f, "[{status}] {}", self.channel)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

/// Implement this trait to route alerts somewhere new
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> ChannelResult<DeliveryStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_success() {
        let status = DeliveryStatus::success_with_message("webhook", "Delivered");
        assert!(status.success);
        assert_eq!(status.message.as_deref(), Some("Delivered"));
        assert!(status.to_string().contains("SUCCESS"));
    }

    #[test]
    fn test_delivery_status_failure() {
        let status = DeliveryStatus::failure("webhook", "Connection timeout");
        assert!(!status.success);
        assert!(status.to_string().contains("FAILED"));
        assert!(status.to_string().contains("Connection timeout"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ChannelError::ServerError {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ChannelError::Rejected {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!ChannelError::InvalidConfig("x".to_string()).is_retryable());
    }
}
