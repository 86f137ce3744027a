use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::{Alert, NotifyBackend, Severity};

/// Slack incoming webhook backend.
pub struct SlackWebhook {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackWebhook {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    fn severity_emoji(severity: Severity) -> &'static str {
        match severity {
            Severity::Warning => ":warning:",
            Severity::Critical => ":rotating_light:",
        }
    }

    fn payload(alert: &Alert) -> serde_json::Value {
        let emoji = Self::severity_emoji(alert.severity());
        json!({
            "text": format!("{emoji} *creatorwatch: {}*\n{alert}", alert.kind()),
            "unfurl_links": false,
        })
    }
}

#[async_trait]
impl NotifyBackend for SlackWebhook {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&Self::payload(alert))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack webhook returned non-success");
            anyhow::bail!("Slack webhook returned {status}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_kind_and_message() {
        let payload = SlackWebhook::payload(&Alert::StoreFailed {
            operation: "upsert_records".into(),
            error: "timeout".into(),
        });
        let text = payload["text"].as_str().unwrap();
        assert!(text.starts_with(":rotating_light: *creatorwatch: store_failed*"));
        assert!(text.ends_with("Store operation upsert_records failed: timeout"));
        assert_eq!(payload["unfurl_links"], false);
    }
}
