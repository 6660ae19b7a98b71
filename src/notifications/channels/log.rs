//! Channel writing alerts to the tracing log

use async_trait::async_trait;

use super::{Channel, ChannelResult, DeliveryStatus};
use crate::notifications::{Alert, AlertSeverity};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

impl LogChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Channel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> ChannelResult<DeliveryStatus> {
        let condition = alert.condition.description();
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                alert_id = %alert.id,
                condition_type = alert.condition.condition_type(),
                condition = %condition,
                metadata = ?alert.metadata,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                alert_id = %alert.id,
                condition_type = alert.condition.condition_type(),
                condition = %condition,
                "{}",
                alert.message
            ),
            AlertSeverity::Info => tracing::info!(
                alert_id = %alert.id,
                condition_type = alert.condition.condition_type(),
                "{}",
                alert.message
            ),
        }
        Ok(DeliveryStatus::success(self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::AlertCondition;

    #[tokio::test]
    async fn test_log_channel_always_delivers() {
        let alert = Alert::new(
            AlertCondition::GraphSyncExhausted {
                document_id: "doc".to_string(),
                attempts: 5,
            },
            AlertSeverity::Critical,
            "Graph write failed".to_string(),
        );
        let status = LogChannel::new().send(&alert).await.unwrap();
        assert!(status.success);
        assert_eq!(status.channel, "log");
    }
}
