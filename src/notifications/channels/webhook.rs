//! Webhook notification channel
//!
//! Posts alerts as JSON to an HTTP endpoint, retrying server-side failures
//! with exponential backoff.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{Channel, ChannelError, ChannelResult, DeliveryStatus};
use crate::notifications::Alert;
use crate::utils::retry::{with_retry_if, RetryConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Sent as a Bearer token when set
    pub auth_token: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1000
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: BTreeMap::new(),
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_delays(
            self.max_retries,
            self.retry_base_delay_ms,
            self.retry_base_delay_ms.saturating_mul(8),
        )
    }
}

/// Webhook notification channel
///
/// # Payload Format
///
/// ```json
/// {
///   "id": "alert-uuid",
///   "severity": "critical",
///   "status": "triggered",
///   "message": "Graph write failed",
///   "description": "Graph sync for document 3f2a... failed after 5 attempts",
///   "condition": { "type": "graph_sync_exhausted", "document_id": "3f2a...", "attempts": 5 },
///   "metadata": { "last_error": "connection refused" },
///   "created_at": "2026-01-01T12:00:00Z",
///   "triggered_at": "2026-01-01T12:00:00Z"
/// }
/// ```
pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> ChannelResult<Self> {
        config.validate().map_err(ChannelError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChannelError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn build_payload(&self, alert: &Alert) -> serde_json::Value {
        serde_json::json!({
            "id": alert.id,
            "severity": alert.severity.as_str(),
            "status": alert.status.as_str(),
            "message": alert.message,
            "description": alert.condition.description(),
            "condition": alert.condition,
            "metadata": alert.metadata,
            "created_at": alert.created_at.to_rfc3339(),
            "triggered_at": alert.triggered_at.map(|t| t.to_rfc3339()),
        })
    }

    async fn post_once(&self, payload: &serde_json::Value) -> ChannelResult<()> {
        let mut request = self.client.post(&self.config.url);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        if status.is_client_error() {
            Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(ChannelError::ServerError {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> ChannelResult<DeliveryStatus> {
        let payload = self.build_payload(alert);
        let retry = self.config.retry_config();

        match with_retry_if(&retry, || self.post_once(&payload), ChannelError::is_retryable).await {
            Ok(()) => {
                tracing::info!(url = %self.config.url, alert_id = %alert.id, "Webhook delivered");
                Ok(DeliveryStatus::success_with_message(
                    self.name(),
                    format!("Delivered to {}", self.config.url),
                ))
            }
            Err(e) => {
                tracing::error!(url = %self.config.url, alert_id = %alert.id, error = %e, "Webhook delivery failed");
                Ok(DeliveryStatus::failure(self.name(), e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{AlertCondition, AlertSeverity};

    #[test]
    fn test_webhook_config_validation() {
        assert!(WebhookConfig::new("https://example.com/webhook").validate().is_ok());
        assert!(WebhookConfig::new("").validate().is_err());
        assert!(WebhookConfig::new("example.com/webhook").validate().is_err());
        assert!(WebhookConfig::new("https://example.com")
            .with_timeout(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_webhook_config_builder() {
        let config = WebhookConfig::new("https://example.com/webhook")
            .with_auth_token("secret-token")
            .with_header("X-Custom", "value")
            .with_timeout(30)
            .with_retries(5, 10);

        assert_eq!(config.auth_token.as_deref(), Some("secret-token"));
        assert_eq!(config.headers.get("X-Custom").map(String::as_str), Some("value"));
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.retry_config().max_retries, 5);
        assert_eq!(config.retry_config().max_delay_ms, 80);
    }

    #[test]
    fn test_webhook_channel_rejects_bad_url() {
        assert!(WebhookChannel::new(WebhookConfig::new("not-a-url")).is_err());
        assert!(WebhookChannel::new(WebhookConfig::new("https://example.com/alerts")).is_ok());
    }

    #[test]
    fn test_webhook_payload_building() {
        let channel = WebhookChannel::new(WebhookConfig::new("https://example.com/webhook")).unwrap();
        let mut alert = Alert::new(
            AlertCondition::GraphSyncExhausted {
                document_id: "doc-9".to_string(),
                attempts: 5,
            },
            AlertSeverity::Critical,
            "Graph write failed".to_string(),
        )
        .with_metadata("last_error", "connection refused");
        alert.trigger();

        let payload = channel.build_payload(&alert);

        assert_eq!(payload["severity"], "critical");
        assert_eq!(payload["status"], "triggered");
        assert_eq!(payload["condition"]["type"], "graph_sync_exhausted");
        assert_eq!(payload["condition"]["document_id"], "doc-9");
        assert_eq!(payload["metadata"]["last_error"], "connection refused");
        assert!(payload["description"].as_str().unwrap().contains("doc-9"));
        assert!(payload["triggered_at"].is_string());
    }
}
