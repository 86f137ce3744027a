// Trait seams for the decision engine.
//
// ScrapeProvider - one scraping actor (primary or fallback) behind the
//   start / poll / fetch contract.
// RunStore - locks, records, runs and reports.
// ReportMailer - transactional email.
//
// The engine only sees these traits; testing.rs provides in-memory doubles.

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine as _;
use chrono::NaiveDate;
use serde_json::Value;

use apify_client::{ApidojoProfileInput, ApifyClient, ClockworksProfileInput, RunStatus};
use brevo_client::{Attachment, BrevoClient, BrevoError, Recipient, SendEmailRequest, Sender};
use creatorwatch_common::{
    DeliveryError, EmailDelivery, EmailMessage, EmailReceipt, NormalizedRecord, ReportRecord,
    RunLock, RunOutcome, SourceKind, SourceStatus, StoreError, UpsertCounts,
};
use creatorwatch_store::PgStore;

// ---------------------------------------------------------------------------
// ScrapeProvider
// ---------------------------------------------------------------------------

/// What to scrape. Adapters translate this into their own actor input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeRequest {
    pub subject: String,
    pub max_items: u32,
    pub report_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub dataset_handle: String,
}

#[async_trait]
pub trait ScrapeProvider: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn actor_id(&self) -> &str;

    /// Start a scrape job. Returns as soon as the provider accepts it.
    async fn start_job(&self, request: &ScrapeRequest) -> Result<JobHandle>;

    async fn poll_status(&self, job_id: &str) -> Result<SourceStatus>;

    async fn fetch_results(&self, dataset_handle: &str) -> Result<Vec<Value>>;
}

/// An Apify actor used as a scrape source.
pub struct ApifyActorSource {
    client: ApifyClient,
    actor_id: String,
    kind: SourceKind,
}

impl ApifyActorSource {
    pub fn new(client: ApifyClient, actor_id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            client,
            actor_id: actor_id.into(),
            kind,
        }
    }

    fn input(&self, request: &ScrapeRequest) -> Result<Value> {
        let day = request.report_date.format("%Y-%m-%d").to_string();
        // Actors expect the bare handle.
        let handle = request.subject.trim_start_matches('@').to_string();
        let input = match self.kind {
            SourceKind::Primary => serde_json::to_value(ApidojoProfileInput {
                usernames: vec![handle],
                max_items: request.max_items,
                since: Some(day.clone()),
                until: Some(day),
            }),
            SourceKind::Fallback => serde_json::to_value(ClockworksProfileInput {
                profiles: vec![handle],
                results_per_page: request.max_items,
                profile_scrape_sections: vec!["videos".to_string()],
                oldest_post_date: Some(day.clone()),
                newest_post_date: Some(day),
            }),
        };
        Ok(input?)
    }
}

/// Transitional Apify states fold into `Running`.
pub fn map_apify_status(status: RunStatus) -> SourceStatus {
    match status {
        RunStatus::Ready => SourceStatus::Ready,
        RunStatus::Running | RunStatus::TimingOut | RunStatus::Aborting => SourceStatus::Running,
        RunStatus::Succeeded => SourceStatus::Succeeded,
        RunStatus::Failed => SourceStatus::Failed,
        RunStatus::TimedOut => SourceStatus::TimedOut,
        RunStatus::Aborted => SourceStatus::Aborted,
    }
}

#[async_trait]
impl ScrapeProvider for ApifyActorSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn actor_id(&self) -> &str {
        &self.actor_id
    }

    async fn start_job(&self, request: &ScrapeRequest) -> Result<JobHandle> {
        let run = self
            .client
            .start_run(&self.actor_id, &self.input(request)?)
            .await?;
        Ok(JobHandle {
            job_id: run.id,
            dataset_handle: run.default_dataset_id,
        })
    }

    async fn poll_status(&self, job_id: &str) -> Result<SourceStatus> {
        let run = self.client.get_run(job_id).await?;
        Ok(map_apify_status(run.status))
    }

    async fn fetch_results(&self, dataset_handle: &str) -> Result<Vec<Value>> {
        Ok(self.client.get_dataset_items(dataset_handle).await?)
    }
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a lock. An existing row for the key yields `StoreError::Duplicate`.
    async fn insert_lock(&self, lock: &RunLock) -> Result<(), StoreError>;

    async fn get_lock(&self, key: &str) -> Result<Option<RunLock>, StoreError>;

    async fn delete_lock(&self, key: &str) -> Result<(), StoreError>;

    async fn upsert_records(
        &self,
        subject_id: &str,
        records: &[NormalizedRecord],
    ) -> Result<UpsertCounts, StoreError>;

    async fn insert_run(&self, run: &RunOutcome) -> Result<(), StoreError>;

    async fn latest_run_for_date(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<RunOutcome>, StoreError>;

    /// Fallback runs with `from <= report_date < until`.
    async fn count_fallback_runs(
        &self,
        subject_id: &str,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<u32, StoreError>;

    /// Insert or refresh a report without touching its email delivery state.
    async fn upsert_report(&self, report: &ReportRecord) -> Result<(), StoreError>;

    async fn get_report(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<ReportRecord>, StoreError>;

    async fn update_report_email(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
        email: &EmailDelivery,
    ) -> Result<(), StoreError>;

    async fn close(&self);
}

#[async_trait]
impl RunStore for PgStore {
    async fn insert_lock(&self, lock: &RunLock) -> Result<(), StoreError> {
        PgStore::insert_lock(self, lock).await
    }

    async fn get_lock(&self, key: &str) -> Result<Option<RunLock>, StoreError> {
        PgStore::get_lock(self, key).await
    }

    async fn delete_lock(&self, key: &str) -> Result<(), StoreError> {
        PgStore::delete_lock(self, key).await
    }

    async fn upsert_records(
        &self,
        subject_id: &str,
        records: &[NormalizedRecord],
    ) -> Result<UpsertCounts, StoreError> {
        PgStore::upsert_records(self, subject_id, records).await
    }

    async fn insert_run(&self, run: &RunOutcome) -> Result<(), StoreError> {
        PgStore::insert_run(self, run).await
    }

    async fn latest_run_for_date(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<RunOutcome>, StoreError> {
        PgStore::latest_run_for_date(self, subject_id, report_date).await
    }

    async fn count_fallback_runs(
        &self,
        subject_id: &str,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<u32, StoreError> {
        PgStore::count_fallback_runs(self, subject_id, from, until).await
    }

    async fn upsert_report(&self, report: &ReportRecord) -> Result<(), StoreError> {
        PgStore::upsert_report(self, report).await
    }

    async fn get_report(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<ReportRecord>, StoreError> {
        PgStore::get_report(self, subject_id, report_date).await
    }

    async fn update_report_email(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
        email: &EmailDelivery,
    ) -> Result<(), StoreError> {
        PgStore::update_report_email(self, subject_id, report_date, email).await
    }

    async fn close(&self) {
        PgStore::close(self).await
    }
}

// ---------------------------------------------------------------------------
// ReportMailer
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ReportMailer: Send + Sync {
    /// One delivery attempt. Retrying is the caller's decision.
    async fn send(&self, message: &EmailMessage) -> Result<EmailReceipt, DeliveryError>;
}

#[async_trait]
impl ReportMailer for BrevoClient {
    async fn send(&self, message: &EmailMessage) -> Result<EmailReceipt, DeliveryError> {
        let request = SendEmailRequest {
            sender: Sender {
                name: message.from_name.clone(),
                email: message.from.clone(),
            },
            to: message.to.iter().map(Recipient::new).collect(),
            cc: message.cc.iter().map(Recipient::new).collect(),
            bcc: message.bcc.iter().map(Recipient::new).collect(),
            subject: message.subject.clone(),
            text_content: message.text.clone(),
            attachment: message
                .attachments
                .iter()
                .map(|a| Attachment {
                    name: a.filename.clone(),
                    content: base64::engine::general_purpose::STANDARD.encode(&a.content),
                })
                .collect(),
        };

        match self.send_email(&request).await {
            Ok(sent) => Ok(EmailReceipt {
                message_id: sent.message_id,
            }),
            Err(BrevoError::Api { status, message }) => {
                Err(DeliveryError::Rejected { status, message })
            }
            Err(BrevoError::Network(e)) => Err(DeliveryError::Transport(e)),
            // Accepted but unreadable; surfaced as transport so it is logged and retried.
            Err(BrevoError::Parse(e)) => Err(DeliveryError::Transport(format!(
                "unreadable provider response: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitional_apify_states_count_as_running() {
        assert_eq!(map_apify_status(RunStatus::TimingOut), SourceStatus::Running);
        assert_eq!(map_apify_status(RunStatus::Aborting), SourceStatus::Running);
        assert_eq!(map_apify_status(RunStatus::TimedOut), SourceStatus::TimedOut);
    }

    #[test]
    fn primary_input_targets_apidojo_shape() {
        let source = ApifyActorSource::new(
            ApifyClient::new("apify_api_test".into()),
            apify_client::APIDOJO_TIKTOK_PROFILE_SCRAPER,
            SourceKind::Primary,
        );
        let input = source.input(&ScrapeRequest {
            subject: "creator".into(),
            max_items: 50,
            report_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
        })
        .unwrap();
        assert_eq!(input["usernames"][0], "creator");
        assert_eq!(input["maxItems"], 50);
        assert_eq!(input["since"], "2024-05-10");
        assert_eq!(input["until"], "2024-05-10");
    }

    #[test]
    fn leading_at_is_stripped_from_the_handle() {
        for kind in [SourceKind::Primary, SourceKind::Fallback] {
            let source = ApifyActorSource::new(
                ApifyClient::new("apify_api_test".into()),
                "actor",
                kind,
            );
            let input = source
                .input(&ScrapeRequest {
                    subject: "@creator".into(),
                    max_items: 10,
                    report_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
                })
                .unwrap();
            let field = match kind {
                SourceKind::Primary => "usernames",
                SourceKind::Fallback => "profiles",
            };
            assert_eq!(input[field][0], "creator");
        }
    }

    #[test]
    fn fallback_input_targets_clockworks_shape() {
        let source = ApifyActorSource::new(
            ApifyClient::new("apify_api_test".into()),
            apify_client::CLOCKWORKS_TIKTOK_PROFILE_SCRAPER,
            SourceKind::Fallback,
        );
        let input = source.input(&ScrapeRequest {
            subject: "creator".into(),
            max_items: 30,
            report_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
        })
        .unwrap();
        assert_eq!(input["profiles"][0], "creator");
        assert_eq!(input["resultsPerPage"], 30);
        assert_eq!(input["profileScrapeSections"][0], "videos");
        assert_eq!(input["oldestPostDateUnified"], "2024-05-10");
        assert_eq!(input["newestPostDate"], "2024-05-10");
    }
}
