use super::{JobEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(&self, event: &JobEvent) -> serde_json::Value {
        let (title, token, option) = match event {
            JobEvent::Started { token, option } => ("Backup Started", token, option),
            JobEvent::Completed { token, option, .. } => ("Backup Complete", token, option),
            JobEvent::Failed { token, option, .. } => ("Backup Failed", token, option),
        };
        let short_token = short_token(token);

        let mut fields = vec![
            json!({ "type": "mrkdwn", "text": format!("*Type:*\n{}", option) }),
            json!({ "type": "mrkdwn", "text": format!("*Progress key:*\n`{}`", short_token) }),
        ];
        if let JobEvent::Completed {
            attempts,
            duration_secs,
            ..
        } = event
        {
            fields.push(json!({ "type": "mrkdwn", "text": format!("*Attempts:*\n{}", attempts) }));
            fields.push(json!({ "type": "mrkdwn", "text": format!("*Duration:*\n{}s", duration_secs) }));
        }

        let mut blocks = vec![
            json!({
                "type": "header",
                "text": { "type": "plain_text", "text": title, "emoji": true }
            }),
            json!({ "type": "section", "fields": fields }),
        ];
        if let JobEvent::Failed { error, .. } = event {
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*Error:*\n```{}```", error) }
            }));
        }

        json!({ "blocks": blocks })
    }
}

/// Tokens share a long prefix; show the tail.
fn short_token(token: &str) -> &str {
    let start = token.len().saturating_sub(12);
    token.get(start..).unwrap_or(token)
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn notify(&self, event: JobEvent) -> Result<()> {
        let payload = self.format_message(&event);
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
