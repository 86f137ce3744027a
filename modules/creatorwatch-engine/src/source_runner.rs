use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use creatorwatch_common::{SourceKind, SourceStatus};

use crate::retry::RetryPolicy;
use crate::traits::{ScrapeProvider, ScrapeRequest};

pub const UNKNOWN: &str = "unknown";

/// Envelope for one source run. Never carries an error: failures are folded into `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRunResult {
    pub run_id: String,
    pub status: SourceStatus,
    pub dataset_handle: String,
    pub items: Vec<Value>,
    pub actor_id: String,
    pub source: SourceKind,
}

impl SourceRunResult {
    fn failed(source: &dyn ScrapeProvider) -> Self {
        Self {
            run_id: UNKNOWN.to_string(),
            status: SourceStatus::Failed,
            dataset_handle: UNKNOWN.to_string(),
            items: Vec::new(),
            actor_id: source.actor_id().to_string(),
            source: source.kind(),
        }
    }
}

pub struct SourceRunner {
    poll_interval: Duration,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SourceRunner {
    pub fn new(poll_interval: Duration, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            poll_interval,
            timeout,
            retry,
        }
    }

    /// Start a job, poll until terminal or timed out, fetch items on success.
    pub async fn run(
        &self,
        source: &dyn ScrapeProvider,
        request: &ScrapeRequest,
    ) -> SourceRunResult {
        info!(
            source = %source.kind(),
            actor_id = source.actor_id(),
            subject = request.subject.as_str(),
            max_items = request.max_items,
            report_date = %request.report_date,
            "Starting source run"
        );

        match self.run_inner(source, request).await {
            Ok(result) => {
                info!(
                    source = %result.source,
                    run_id = result.run_id.as_str(),
                    status = %result.status,
                    items = result.items.len(),
                    "Source run finished"
                );
                result
            }
            Err(e) => {
                warn!(
                    source = %source.kind(),
                    actor_id = source.actor_id(),
                    error = %e,
                    "Source run failed"
                );
                SourceRunResult::failed(source)
            }
        }
    }

    async fn run_inner(
        &self,
        source: &dyn ScrapeProvider,
        request: &ScrapeRequest,
    ) -> anyhow::Result<SourceRunResult> {
        let job = self
            .retry
            .execute(
                || source.start_job(request),
                |e, attempt| warn!(attempt, error = %e, "Start job failed, retrying"),
            )
            .await?;

        let deadline = Instant::now() + self.timeout;
        let mut polls = 0u32;
        let status = loop {
            let status = self
                .retry
                .execute(
                    || source.poll_status(&job.job_id),
                    |e, attempt| {
                        warn!(
                            attempt,
                            job_id = job.job_id.as_str(),
                            error = %e,
                            "Status poll failed, retrying"
                        )
                    },
                )
                .await?;
            polls += 1;

            if status.is_terminal() {
                break status;
            }
            if Instant::now() + self.poll_interval > deadline {
                warn!(
                    job_id = job.job_id.as_str(),
                    polls,
                    timeout_secs = self.timeout.as_secs(),
                    "Source run did not finish in time"
                );
                break SourceStatus::TimedOut;
            }
            tracing::debug!(
                job_id = job.job_id.as_str(),
                polls,
                status = %status,
                "Waiting for source run"
            );
            tokio::time::sleep(self.poll_interval).await;
        };

        let items = if status == SourceStatus::Succeeded {
            self.retry
                .execute(
                    || source.fetch_results(&job.dataset_handle),
                    |e, attempt| warn!(attempt, error = %e, "Fetch results failed, retrying"),
                )
                .await?
        } else {
            Vec::new()
        };

        Ok(SourceRunResult {
            run_id: job.job_id,
            status,
            dataset_handle: job.dataset_handle,
            items,
            actor_id: source.actor_id().to_string(),
            source: source.kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use chrono::NaiveDate;
    use serde_json::json;

    fn runner(timeout_ms: u64) -> SourceRunner {
        SourceRunner::new(
            Duration::from_millis(1),
            Duration::from_millis(timeout_ms),
            RetryPolicy::network().without_delay(),
        )
    }

    fn request() -> ScrapeRequest {
        ScrapeRequest {
            subject: "creator".into(),
            max_items: 50,
            report_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
        }
    }

    #[tokio::test]
    async fn succeeded_run_returns_items() {
        let provider = MockProvider::new(SourceKind::Primary)
            .with_statuses(vec![SourceStatus::Running, SourceStatus::Succeeded])
            .with_items(vec![json!({"id": "1"}), json!({"id": "2"})]);

        let result = runner(1_000).run(&provider, &request()).await;
        assert_eq!(result.status, SourceStatus::Succeeded);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.run_id, "job-1");
        assert_eq!(result.dataset_handle, "dataset-1");
        assert_eq!(provider.poll_count(), 2);
    }

    #[tokio::test]
    async fn failed_run_skips_fetch() {
        let provider = MockProvider::new(SourceKind::Primary)
            .with_statuses(vec![SourceStatus::Failed])
            .with_items(vec![json!({"id": "1"})]);

        let result = runner(1_000).run(&provider, &request()).await;
        assert_eq!(result.status, SourceStatus::Failed);
        assert!(result.items.is_empty());
        assert_eq!(result.run_id, "job-1");
        assert_eq!(provider.fetch_count(), 0);
    }

    #[tokio::test]
    async fn never_terminal_run_times_out_with_known_job_id() {
        let provider = MockProvider::new(SourceKind::Fallback)
            .with_statuses(vec![SourceStatus::Running]);

        let result = runner(20).run(&provider, &request()).await;
        assert_eq!(result.status, SourceStatus::TimedOut);
        assert_eq!(result.run_id, "job-1");
        assert!(result.items.is_empty());
    }

    #[tokio::test]
    async fn transport_errors_become_failed_envelope() {
        let provider = MockProvider::new(SourceKind::Primary).failing_start();

        let result = runner(1_000).run(&provider, &request()).await;
        assert_eq!(result.status, SourceStatus::Failed);
        assert_eq!(result.run_id, UNKNOWN);
        assert_eq!(result.dataset_handle, UNKNOWN);
        assert!(result.items.is_empty());
        assert_eq!(provider.start_count(), 4);
    }

    #[tokio::test]
    async fn fetch_error_after_success_is_absorbed() {
        let provider = MockProvider::new(SourceKind::Primary)
            .with_statuses(vec![SourceStatus::Succeeded])
            .failing_fetch();

        let result = runner(1_000).run(&provider, &request()).await;
        assert_eq!(result.status, SourceStatus::Failed);
        assert_eq!(result.run_id, UNKNOWN);
    }
}
