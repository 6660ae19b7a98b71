//! Notification manager for alert orchestration

use super::channels::log::LogChannel;
use super::channels::webhook::{WebhookChannel, WebhookConfig};
use super::channels::{Channel, ChannelResult, DeliveryStatus};
use super::{Alert, AlertCondition, AlertSeverity};
use crate::config::NotificationsConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

/// Manager shared between concurrent ingestion tasks
pub type SharedNotifier = Arc<NotificationManager>;

/// Delivered alerts kept for inspection
pub const RECENT_ALERTS: usize = 100;

#[derive(Default)]
struct AlertState {
    /// Last trigger time per condition key, only entries inside the dedup window
    last_triggered: HashMap<String, DateTime<Utc>>,
    recent: VecDeque<Alert>,
}

/// Notification manager that coordinates alerts and channels
///
/// Dedup bookkeeping sits behind a short-lived lock; channel delivery runs
/// without it, so a slow webhook only delays the caller that raised the alert.
pub struct NotificationManager {
    channels: Vec<Box<dyn Channel>>,
    state: Mutex<AlertState>,
    dedup_window: Duration,
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationManager {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            state: Mutex::new(AlertState::default()),
            dedup_window: Duration::minutes(5),
        }
    }

    /// Log channel always, webhook channel when a URL is configured
    pub fn from_config(config: &NotificationsConfig) -> ChannelResult<Self> {
        let mut manager = Self::new().with_dedup_window_secs(config.dedup_window_secs as i64);
        manager.add_log_channel();

        if let Some(url) = &config.webhook_url {
            let mut webhook = WebhookConfig::new(url)
                .with_timeout(config.webhook_timeout_secs)
                .with_retries(config.webhook_max_retries, config.webhook_retry_base_delay_ms);
            if let Some(token) = &config.webhook_auth_token {
                webhook = webhook.with_auth_token(token);
            }
            for (key, value) in &config.webhook_headers {
                webhook = webhook.with_header(key, value);
            }
            manager.add_webhook(webhook)?;
        }

        Ok(manager)
    }

    pub fn with_dedup_window_secs(mut self, secs: i64) -> Self {
        self.dedup_window = Duration::seconds(secs);
        self
    }

    pub fn into_shared(self) -> SharedNotifier {
        Arc::new(self)
    }

    pub fn add_channel(&mut self, channel: Box<dyn Channel>) {
        self.channels.push(channel);
    }

    pub fn add_log_channel(&mut self) {
        self.add_channel(Box::new(LogChannel::new()));
    }

    pub fn add_webhook(&mut self, config: WebhookConfig) -> ChannelResult<()> {
        let channel = WebhookChannel::new(config)?;
        self.add_channel(Box::new(channel));
        Ok(())
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Create an alert unless an identical one fired inside the dedup window
    pub fn create_alert(
        &self,
        condition: AlertCondition,
        severity: AlertSeverity,
        message: String,
    ) -> Option<Alert> {
        let condition_key = condition.dedup_key();
        let now = Utc::now();
        let window = self.dedup_window;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_triggered.retain(|_, last| now - *last < window);

        if state.last_triggered.contains_key(&condition_key) {
            tracing::debug!(condition = %condition_key, "Alert suppressed by dedup window");
            return None;
        }
        state.last_triggered.insert(condition_key, now);

        Some(Alert::new(condition, severity, message))
    }

    /// Mark the alert triggered and send it to every channel
    ///
    /// A failing channel does not stop delivery to the others.
    pub async fn deliver(&self, alert: &mut Alert) -> Vec<DeliveryStatus> {
        alert.trigger();
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.recent.push_back(alert.clone());
            while state.recent.len() > RECENT_ALERTS {
                state.recent.pop_front();
            }
        }

        let mut statuses = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            match channel.send(alert).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    tracing::error!(channel = channel.name(), error = %e, "Failed to send alert");
                    statuses.push(DeliveryStatus::failure(channel.name(), e.to_string()));
                }
            }
        }
        statuses
    }

    /// Create and deliver an alert at the condition's default severity
    ///
    /// Returns `None` when the alert was suppressed by the dedup window.
    pub async fn alert(
        &self,
        condition: AlertCondition,
        message: String,
        metadata: Vec<(String, String)>,
    ) -> Option<Alert> {
        let severity = condition.default_severity();
        let alert = self.create_alert(condition, severity, message)?;
        let mut alert = metadata
            .into_iter()
            .fold(alert, |alert, (key, value)| alert.with_metadata(key, value));

        for status in self.deliver(&mut alert).await {
            if !status.success {
                tracing::warn!(alert_id = %alert.id, delivery = %status, "Alert not delivered");
            }
        }
        Some(alert)
    }

    /// Most recently delivered alerts, oldest first
    pub fn recent_alerts(&self) -> Vec<Alert> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.recent.iter().cloned().collect()
    }
}
