use async_trait::async_trait;

use super::{Alert, NotifyBackend};

/// Used when no webhook is configured. Alerts still reach the log.
pub struct NoopBackend;

#[async_trait]
impl NotifyBackend for NoopBackend {
    async fn send(&self, _alert: &Alert) -> anyhow::Result<()> {
        Ok(())
    }
}
