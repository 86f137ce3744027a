use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use creatorwatch_common::{
    DeliveryError, EmailAttachment, EmailConfig, EmailDelivery, EmailMessage, EmailStatus,
    ReportRecord,
};

use crate::retry::RetryPolicy;
use crate::traits::{ReportMailer, RunStore};

pub const AUTOMATED_FOOTER: &str = "This report was generated and sent automatically.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { message_id: String },
    /// Already delivered and no resend was forced.
    Skipped,
    Failed { error: String },
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent { .. })
    }
}

/// Sends a stored report at most once unless a resend is forced.
pub struct EmailDispatcher {
    mailer: Arc<dyn ReportMailer>,
    store: Arc<dyn RunStore>,
    config: EmailConfig,
    retry: RetryPolicy,
}

impl EmailDispatcher {
    pub fn new(
        mailer: Arc<dyn ReportMailer>,
        store: Arc<dyn RunStore>,
        config: EmailConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            mailer,
            store,
            config,
            retry,
        }
    }

    pub fn build_message(&self, report: &ReportRecord) -> EmailMessage {
        let date = report.report_date.format("%Y-%m-%d");
        EmailMessage {
            from: self.config.from.clone(),
            from_name: self.config.from_name.clone(),
            to: self.config.to.clone(),
            cc: self.config.cc.clone(),
            bcc: self.config.bcc.clone(),
            subject: format!(
                "{} – {} – {date}",
                self.config.subject_prefix, report.subject_id
            ),
            text: format!("{}\n\n---\n{AUTOMATED_FOOTER}", report.body_text),
            attachments: vec![EmailAttachment {
                filename: format!("{date}-{}.txt", report.subject_id),
                content: report.body_text.clone().into_bytes(),
            }],
        }
    }

    /// Deliver `report` and persist the result on the stored report.
    ///
    /// The stored email state decides the skip, not the one on `report`.
    pub async fn dispatch(&self, report: &ReportRecord, force_resend: bool) -> DispatchOutcome {
        let current = match self
            .store
            .get_report(&report.subject_id, report.report_date)
            .await
        {
            Ok(Some(stored)) => stored.email,
            Ok(None) => report.email.clone(),
            Err(e) => {
                warn!(error = %e, "Could not read stored email state, assuming unsent");
                report.email.clone()
            }
        };

        if current.is_sent() && !force_resend {
            info!(
                subject_id = report.subject_id.as_str(),
                report_date = %report.report_date,
                message_id = current.message_id.as_deref().unwrap_or("-"),
                "Report email already sent, skipping"
            );
            return DispatchOutcome::Skipped;
        }
        if current.is_sent() {
            info!(subject_id = report.subject_id.as_str(), "Forcing report email resend");
        }

        let message = self.build_message(report);
        let result = self
            .retry
            .execute_when(
                || self.mailer.send(&message),
                DeliveryError::is_retryable,
                |e, attempt| warn!(attempt, error = %e, "Email send failed, retrying"),
            )
            .await;

        let (delivery, outcome) = match result {
            Ok(receipt) => {
                info!(
                    message_id = receipt.message_id.as_str(),
                    recipients = message.to.len(),
                    "Report email sent"
                );
                (
                    EmailDelivery {
                        status: Some(EmailStatus::Sent),
                        sent_at: Some(Utc::now()),
                        message_id: Some(receipt.message_id.clone()),
                        error: None,
                    },
                    DispatchOutcome::Sent {
                        message_id: receipt.message_id,
                    },
                )
            }
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "Report email failed");
                (
                    EmailDelivery {
                        status: Some(EmailStatus::Failed),
                        sent_at: current.sent_at,
                        message_id: current.message_id.clone(),
                        error: Some(e.to_string()),
                    },
                    DispatchOutcome::Failed {
                        error: e.to_string(),
                    },
                )
            }
        };

        let persisted = RetryPolicy::database()
            .execute(
                || {
                    self.store
                        .update_report_email(&report.subject_id, report.report_date, &delivery)
                },
                |e, attempt| warn!(attempt, error = %e, "Saving email state failed, retrying"),
            )
            .await;
        if let Err(e) = persisted {
            warn!(error = %e, "Failed to persist email delivery state");
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStore, MockMailer};
    use chrono::NaiveDate;
    use creatorwatch_common::{EmailReceipt, ReportStatus, SourceKind};
    use std::collections::BTreeSet;

    fn config() -> EmailConfig {
        EmailConfig {
            brevo_api_key: "xkeysib-test".into(),
            from: "reports@example.com".into(),
            from_name: "Creatorwatch".into(),
            to: vec!["ops@example.com".into()],
            cc: Vec::new(),
            bcc: vec!["archive@example.com".into()],
            subject_prefix: "Daily Report".into(),
        }
    }

    fn report() -> ReportRecord {
        ReportRecord {
            report_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            subject_id: "creator".into(),
            generated_at: Utc::now(),
            body_text: "Daily report - TikTok @creator".into(),
            record_ids: vec!["1".into()],
            status: ReportStatus::Ok,
            source_used: SourceKind::Primary,
            warning_flags: BTreeSet::new(),
            empty_day: false,
            empty_day_streak: 0,
            email: EmailDelivery::default(),
        }
    }

    async fn setup(mailer: MockMailer) -> (Arc<MemoryStore>, Arc<MockMailer>, EmailDispatcher) {
        let store = Arc::new(MemoryStore::new());
        store.upsert_report(&report()).await.unwrap();
        let mailer = Arc::new(mailer);
        let dispatcher = EmailDispatcher::new(
            mailer.clone(),
            store.clone(),
            config(),
            RetryPolicy::email(3).without_delay(),
        );
        (store, mailer, dispatcher)
    }

    #[test]
    fn message_has_subject_footer_and_attachment() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = EmailDispatcher::new(
            Arc::new(MockMailer::new()),
            store,
            config(),
            RetryPolicy::email(3),
        );
        let message = dispatcher.build_message(&report());
        assert_eq!(message.subject, "Daily Report – creator – 2024-05-10");
        assert!(message.text.starts_with("Daily report - TikTok @creator\n\n---\n"));
        assert!(message.text.ends_with(AUTOMATED_FOOTER));
        assert_eq!(message.attachments[0].filename, "2024-05-10-creator.txt");
        assert_eq!(message.attachments[0].content, b"Daily report - TikTok @creator");
        assert_eq!(message.bcc, vec!["archive@example.com".to_string()]);
    }

    #[tokio::test]
    async fn sends_once_then_skips_unless_forced() {
        let (store, mailer, dispatcher) = setup(MockMailer::new()).await;
        let date = report().report_date;

        assert!(dispatcher.dispatch(&report(), false).await.is_sent());
        let stored = store.report("creator", date).unwrap();
        assert_eq!(stored.email.status, Some(EmailStatus::Sent));
        assert!(stored.email.message_id.is_some());

        assert_eq!(dispatcher.dispatch(&report(), false).await, DispatchOutcome::Skipped);
        assert_eq!(mailer.attempts().len(), 1);

        assert!(dispatcher.dispatch(&report(), true).await.is_sent());
        assert_eq!(mailer.attempts().len(), 2);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let mailer = MockMailer::new()
            .then(Err(DeliveryError::Transport("reset".into())))
            .then(Err(DeliveryError::Rejected {
                status: 503,
                message: "unavailable".into(),
            }))
            .then(Ok(EmailReceipt {
                message_id: "<abc@brevo>".into(),
            }));
        let (_, mailer, dispatcher) = setup(mailer).await;

        assert_eq!(
            dispatcher.dispatch(&report(), false).await,
            DispatchOutcome::Sent {
                message_id: "<abc@brevo>".into()
            }
        );
        assert_eq!(mailer.attempts().len(), 3);
    }

    #[tokio::test]
    async fn permanent_rejection_is_not_retried_and_is_recorded() {
        let mailer = MockMailer::new().then(Err(DeliveryError::Rejected {
            status: 401,
            message: "Key not found".into(),
        }));
        let (store, mailer, dispatcher) = setup(mailer).await;

        let outcome = dispatcher.dispatch(&report(), false).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(mailer.attempts().len(), 1);

        let stored = store.report("creator", report().report_date).unwrap();
        assert_eq!(stored.email.status, Some(EmailStatus::Failed));
        assert!(stored.email.error.unwrap().contains("Key not found"));
    }
}
