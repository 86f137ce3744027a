pub mod noop;
pub mod slack;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{error, warn};

use creatorwatch_common::{SourceKind, SourceStatus};

pub use noop::NoopBackend;
pub use slack::SlackWebhook;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}

/// Operator-facing event raised by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// Nothing in range and the day is not a clean quiet day.
    NoResults {
        subject_id: String,
        report_date: NaiveDate,
        source: SourceKind,
    },
    LowResults {
        subject_id: String,
        report_date: NaiveDate,
        count: u32,
        threshold: u32,
    },
    ProviderFailed {
        subject_id: String,
        source: SourceKind,
        status: SourceStatus,
    },
    StoreFailed {
        operation: String,
        error: String,
    },
    PipelineCrashed {
        subject_id: String,
        report_date: NaiveDate,
        error: String,
    },
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::NoResults { .. } => "no_results",
            Alert::LowResults { .. } => "low_results",
            Alert::ProviderFailed { .. } => "provider_failed",
            Alert::StoreFailed { .. } => "store_failed",
            Alert::PipelineCrashed { .. } => "pipeline_crashed",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Alert::NoResults { .. } | Alert::LowResults { .. } => Severity::Warning,
            Alert::ProviderFailed { .. }
            | Alert::StoreFailed { .. }
            | Alert::PipelineCrashed { .. } => Severity::Critical,
        }
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::NoResults {
                subject_id,
                report_date,
                source,
            } => write!(
                f,
                "No posts in range for @{subject_id} on {report_date} ({source} source)"
            ),
            Alert::LowResults {
                subject_id,
                report_date,
                count,
                threshold,
            } => write!(
                f,
                "Only {count} posts for @{subject_id} on {report_date} (threshold {threshold})"
            ),
            Alert::ProviderFailed {
                subject_id,
                source,
                status,
            } => write!(f, "{source} source run for @{subject_id} ended {status}"),
            Alert::StoreFailed { operation, error } => {
                write!(f, "Store operation {operation} failed: {error}")
            }
            Alert::PipelineCrashed {
                subject_id,
                report_date,
                error,
            } => write!(f, "Pipeline for @{subject_id} on {report_date} failed: {error}"),
        }
    }
}

/// Pluggable alert delivery.
#[async_trait]
pub trait NotifyBackend: Send + Sync {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Logs every alert and forwards it to the backend. Delivery failures are logged only.
#[derive(Clone)]
pub struct Alerter {
    backend: Arc<dyn NotifyBackend>,
}

impl Alerter {
    pub fn new(backend: Arc<dyn NotifyBackend>) -> Self {
        Self { backend }
    }

    pub async fn raise(&self, alert: Alert) {
        match alert.severity() {
            Severity::Warning => warn!(alert = true, kind = alert.kind(), "{alert}"),
            Severity::Critical => error!(alert = true, kind = alert.kind(), "{alert}"),
        }
        if let Err(e) = self.backend.send(&alert).await {
            warn!(kind = alert.kind(), error = %e, "Failed to deliver alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;

    #[tokio::test]
    async fn alerts_reach_the_backend() {
        let notifier = Arc::new(RecordingNotifier::new());
        let alerter = Alerter::new(notifier.clone());
        alerter
            .raise(Alert::StoreFailed {
                operation: "insert_run".into(),
                error: "connection reset".into(),
            })
            .await;

        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind(), "store_failed");
        assert_eq!(alerts[0].severity(), Severity::Critical);
    }

    #[tokio::test]
    async fn backend_failure_is_swallowed() {
        let notifier = Arc::new(RecordingNotifier::new().failing());
        Alerter::new(notifier.clone())
            .raise(Alert::LowResults {
                subject_id: "creator".into(),
                report_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
                count: 3,
                threshold: 10,
            })
            .await;
        assert_eq!(notifier.alerts().len(), 1);
    }

    #[test]
    fn message_names_subject_and_date() {
        let alert = Alert::NoResults {
            subject_id: "creator".into(),
            report_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            source: SourceKind::Fallback,
        };
        assert_eq!(
            alert.to_string(),
            "No posts in range for @creator on 2024-05-10 (fallback source)"
        );
    }
}
