mod slack;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{NotificationChannelType, NotificationConfig};
use crate::core::models::BackupOption;

/// Events that trigger notifications
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started {
        token: String,
        option: BackupOption,
    },
    Completed {
        token: String,
        option: BackupOption,
        attempts: u32,
        duration_secs: u64,
    },
    Failed {
        token: String,
        option: BackupOption,
        error: String,
    },
}

/// Trait for notification channel implementations (Slack, Discord, etc.)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: JobEvent) -> Result<()>;
}

/// Factory function to create a notifier based on config
pub fn create_notifier(config: &NotificationConfig) -> Option<Arc<dyn NotificationChannel>> {
    match &config.channel {
        NotificationChannelType::None => None,
        NotificationChannelType::Slack => {
            let webhook = config.slack_webhook.as_ref()?;
            if webhook.is_empty() {
                return None;
            }
            Some(Arc::new(slack::SlackNotifier::new(webhook.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_needs_webhook() {
        let mut config = NotificationConfig {
            channel: NotificationChannelType::Slack,
            slack_webhook: None,
        };
        assert!(create_notifier(&config).is_none());

        config.slack_webhook = Some(String::new());
        assert!(create_notifier(&config).is_none());

        config.slack_webhook = Some("https://hooks.slack.com/services/T/B/X".into());
        assert!(create_notifier(&config).is_some());

        config.channel = NotificationChannelType::None;
        assert!(create_notifier(&config).is_none());
    }
}
