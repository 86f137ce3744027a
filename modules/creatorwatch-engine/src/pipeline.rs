use std::collections::BTreeSet;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use tracing::{info, warn};
use uuid::Uuid;

use creatorwatch_common::{
    warning, AppConfig, EmailConfig, FallbackReason, NormalizedRecord, PipelineResult, RunOutcome,
    RunStatus, SourceKind, SourceStatus, StoreError,
};

use crate::alert::{Alert, Alerter, NotifyBackend};
use crate::backup::BackupManager;
use crate::circuit_breaker::CircuitBreaker;
use crate::dates::{self, DateRange};
use crate::email::{DispatchOutcome, EmailDispatcher};
use crate::lock::{FailurePolicy, RunLockManager};
use crate::normalize::{filter_in_range, normalize_items};
use crate::policy::{self, EmptyResult};
use crate::quality::{self, QualityAssessment, QualityThresholds};
use crate::report::{generate_report, ReportInput};
use crate::retry::RetryPolicy;
use crate::source_runner::{SourceRunResult, SourceRunner};
use crate::streak::{StreakTracker, STREAK_WARNING_THRESHOLD};
use crate::traits::{ReportMailer, RunStore, ScrapeProvider, ScrapeRequest};

/// Everything the pipeline reads from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub subject_id: String,
    pub max_items: u32,
    pub timezone: Tz,
    pub low_results_threshold: u32,
    pub lock_ttl: chrono::Duration,
    pub poll_interval: Duration,
    pub run_timeout: Duration,
    pub fallback_max_per_48h: u32,
    pub quality: QualityThresholds,
    pub backup_dir: PathBuf,
    pub backup_retention_days: u32,
    pub lock_policy: FailurePolicy,
    pub breaker_policy: FailurePolicy,
    pub network_retry: RetryPolicy,
    pub database_retry: RetryPolicy,
    pub email_retry: RetryPolicy,
    pub force_resend: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig, force_resend: bool) -> Self {
        Self {
            subject_id: config.profile_handle.clone(),
            max_items: config.max_posts,
            timezone: config.timezone,
            low_results_threshold: config.low_results_threshold,
            lock_ttl: chrono::Duration::minutes(i64::from(config.lock_ttl_minutes)),
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            run_timeout: Duration::from_secs(config.run_timeout_minutes * 60),
            fallback_max_per_48h: config.fallback_max_per_48h,
            quality: QualityThresholds {
                max_missing_created_at_pct: config.max_missing_createtime_pct,
                max_missing_url_pct: config.max_missing_url_pct,
            },
            backup_dir: config.backup_dir.clone(),
            backup_retention_days: config.backup_retention_days,
            lock_policy: FailurePolicy::Open,
            breaker_policy: FailurePolicy::Open,
            network_retry: RetryPolicy {
                max_attempts: config.max_retries.saturating_add(1),
                ..RetryPolicy::network()
            },
            database_retry: RetryPolicy::database(),
            email_retry: RetryPolicy::email(config.max_retries),
            force_resend,
        }
    }
}

/// One source's output after normalization, filtering and assessment.
struct SourceEvaluation {
    run: SourceRunResult,
    in_range: Vec<NormalizedRecord>,
    quality: QualityAssessment,
}

impl SourceEvaluation {
    fn raw_count(&self) -> u32 {
        self.run.items.len() as u32
    }

    fn in_range_count(&self) -> u32 {
        self.in_range.len() as u32
    }

    fn empty_result(&self) -> Option<EmptyResult> {
        policy::classify_empty_result(
            self.run.status,
            self.raw_count(),
            self.in_range_count(),
            self.quality.has_issue,
        )
    }
}

/// The daily decision engine for one subject.
///
/// Owns its store handle: the store is closed when a run finishes, so build a
/// new pipeline per run.
pub struct Pipeline {
    settings: PipelineSettings,
    store: Arc<dyn RunStore>,
    primary: Arc<dyn ScrapeProvider>,
    fallback: Arc<dyn ScrapeProvider>,
    email: Option<EmailDispatcher>,
    alerter: Alerter,
    backups: BackupManager,
    locks: RunLockManager,
    breaker: CircuitBreaker,
    streaks: StreakTracker,
    runner: SourceRunner,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        store: Arc<dyn RunStore>,
        primary: Arc<dyn ScrapeProvider>,
        fallback: Arc<dyn ScrapeProvider>,
        notifier: Arc<dyn NotifyBackend>,
    ) -> Self {
        let locks = RunLockManager::new(store.clone(), settings.lock_ttl, settings.lock_policy);
        let breaker = CircuitBreaker::new(
            store.clone(),
            settings.fallback_max_per_48h,
            settings.breaker_policy,
        );
        let streaks = StreakTracker::new(store.clone());
        let runner = SourceRunner::new(
            settings.poll_interval,
            settings.run_timeout,
            settings.network_retry,
        );
        let backups = BackupManager::new(settings.backup_dir.clone());
        Self {
            settings,
            store,
            primary,
            fallback,
            email: None,
            alerter: Alerter::new(notifier),
            backups,
            locks,
            breaker,
            streaks,
            runner,
        }
    }

    pub fn with_email(mut self, mailer: Arc<dyn ReportMailer>, config: EmailConfig) -> Self {
        self.email = Some(EmailDispatcher::new(
            mailer,
            self.store.clone(),
            config,
            self.settings.email_retry,
        ));
        self
    }

    /// Run for yesterday in the configured timezone.
    pub async fn run(&self) -> PipelineResult {
        let report_date = dates::yesterday(Utc::now(), self.settings.timezone);
        self.run_for_date(report_date).await
    }

    /// Lock, run, then release the lock and close the store whatever happened.
    pub async fn run_for_date(&self, report_date: NaiveDate) -> PipelineResult {
        let subject_id = self.settings.subject_id.as_str();
        info!(subject_id, %report_date, "Pipeline starting");

        if !self.locks.acquire(subject_id, report_date).await {
            info!(subject_id, %report_date, "Run lock held elsewhere, skipping");
            self.store.close().await;
            return PipelineResult {
                success: true,
                lock_active: true,
                warning_flags: [warning::LOCK_ACTIVE.to_string()].into(),
                ..Default::default()
            };
        }

        let mut draft = self.draft_outcome(report_date);
        let mut result = PipelineResult {
            run_id: Some(draft.run_id.clone()),
            ..Default::default()
        };

        let outcome = AssertUnwindSafe(self.run_inner(report_date, &mut draft, &mut result))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.record_failure(report_date, &mut draft, &mut result, e).await,
            Err(panic) => {
                let e = anyhow::anyhow!("pipeline panicked: {}", panic_message(panic.as_ref()));
                self.record_failure(report_date, &mut draft, &mut result, e).await;
            }
        }

        self.locks.release(subject_id, report_date).await;
        self.store.close().await;

        info!(subject_id, %report_date, "Pipeline finished. {result}");
        result
    }

    async fn run_inner(
        &self,
        report_date: NaiveDate,
        draft: &mut RunOutcome,
        result: &mut PipelineResult,
    ) -> Result<()> {
        let subject_id = self.settings.subject_id.as_str();
        let window = dates::day_window(report_date, self.settings.timezone);
        let request = ScrapeRequest {
            subject: subject_id.to_string(),
            max_items: self.settings.max_items,
            report_date,
        };
        let mut flags: BTreeSet<String> = BTreeSet::new();

        // PRIMARY_RUN + QUALITY_CHECK
        let primary = self.run_source(self.primary.as_ref(), &request, &window).await;
        draft.source_used = SourceKind::Primary;
        draft.actor_id = primary.run.actor_id.clone();
        draft.dataset_id = primary.run.dataset_handle.clone();
        draft.items_fetched_raw = primary.raw_count();
        draft.items_in_range = primary.in_range_count();

        let decision = policy::decide(
            primary.run.status,
            primary.raw_count(),
            primary.in_range_count(),
            self.settings.low_results_threshold,
            primary.quality.has_issue,
        );
        info!(
            status = %primary.run.status,
            raw = primary.raw_count(),
            in_range = primary.in_range_count(),
            quality_issue = primary.quality.has_issue,
            escalate = decision.escalate,
            reason = decision.reason.map(FallbackReason::as_str).unwrap_or("-"),
            "Fallback policy decided"
        );
        draft.fallback_reason = decision.reason;
        result.fallback_reason = decision.reason;

        // FALLBACK_GATE + FALLBACK_RUN
        let mut suppressed = false;
        let mut fallback_failed = false;
        let chosen = if !decision.escalate {
            primary
        } else if self.breaker.is_open(subject_id, report_date).await {
            suppressed = true;
            flags.insert(warning::CIRCUIT_BREAKER_SUPPRESSED.to_string());
            warn!(subject_id, %report_date, "Fallback suppressed by circuit breaker");
            primary
        } else {
            flags.insert(warning::FALLBACK_TRIGGERED.to_string());
            let fallback = self.run_source(self.fallback.as_ref(), &request, &window).await;
            draft.source_used = SourceKind::Fallback;
            draft.actor_id = fallback.run.actor_id.clone();
            draft.dataset_id = fallback.run.dataset_handle.clone();

            if fallback.run.status != SourceStatus::Succeeded {
                fallback_failed = true;
                flags.insert(warning::FALLBACK_FAILED.to_string());
            }
            if fallback_failed && primary.in_range_count() > 0 {
                warn!(
                    kept = primary.in_range_count(),
                    "Fallback failed, keeping primary records"
                );
                primary
            } else {
                fallback
            }
        };
        draft.circuit_breaker_suppressed = suppressed;
        result.circuit_breaker_suppressed = suppressed;

        let raw = chosen.raw_count();
        let in_range = chosen.in_range_count();
        draft.items_fetched_raw = raw;
        draft.items_in_range = in_range;
        draft.missing_created_at_pct = chosen.quality.missing_created_at_pct;
        draft.missing_url_pct = chosen.quality.missing_url_pct;
        result.source_used = Some(draft.source_used);
        result.items_fetched_raw = raw;
        result.items_in_range = in_range;

        for flag in chosen.quality.warning_flags() {
            flags.insert(flag.to_string());
        }
        if in_range > 0 && in_range < self.settings.low_results_threshold {
            flags.insert(warning::LOW_RESULTS.to_string());
            self.alerter
                .raise(Alert::LowResults {
                    subject_id: subject_id.to_string(),
                    report_date,
                    count: in_range,
                    threshold: self.settings.low_results_threshold,
                })
                .await;
        }

        // Empty-day classification always reflects the records actually kept.
        let empty_result = chosen.empty_result();
        let mut streak = 0;
        match empty_result {
            Some(EmptyResult::QuietDay) => {
                flags.insert(warning::EMPTY_DAY.to_string());
                let previous = report_date.pred_opt().unwrap_or(report_date);
                streak = self.streaks.streak(subject_id, previous).await + 1;
                if streak >= STREAK_WARNING_THRESHOLD {
                    flags.insert(warning::EMPTY_DAY_STREAK.to_string());
                }
                info!(subject_id, %report_date, streak, "Quiet day");
            }
            Some(EmptyResult::TechnicalFailure) => {
                self.alerter
                    .raise(Alert::NoResults {
                        subject_id: subject_id.to_string(),
                        report_date,
                        source: draft.source_used,
                    })
                    .await;
            }
            None => {}
        }
        draft.empty_day = empty_result == Some(EmptyResult::QuietDay);
        draft.empty_day_streak = streak;

        let status = if suppressed
            || fallback_failed
            || (in_range == 0 && empty_result != Some(EmptyResult::QuietDay))
        {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        };
        draft.status = status;
        draft.warning_flags = flags.clone();
        result.warning_flags = flags.clone();

        // PERSIST
        let records = &chosen.in_range;
        let counts = self
            .persist("upsert_records", || self.store.upsert_records(subject_id, records))
            .await?;
        draft.items_inserted = counts.inserted;
        draft.items_updated = counts.updated;
        result.items_inserted = counts.inserted;
        result.items_updated = counts.updated;
        info!(
            inserted = counts.inserted,
            updated = counts.updated,
            "Records saved"
        );

        if let Err(e) = self.backups.save_raw(report_date, &chosen.run.items).await {
            warn!(error = %e, "Failed to save raw backup");
        }

        // REPORT
        let report = generate_report(
            &ReportInput {
                subject_id,
                report_date,
                source_used: draft.source_used,
                records,
                warning_flags: &flags,
                run_status: status,
                empty_result,
                empty_day_streak: streak,
            },
            Utc::now(),
        );
        self.persist("upsert_report", || self.store.upsert_report(&report))
            .await?;
        result.report_generated = true;
        info!(status = %report.status, records = report.record_ids.len(), "Report saved");

        if let Err(e) = self.backups.save_report(report_date, &report.body_text).await {
            warn!(error = %e, "Failed to save report file");
        }

        // The audit row goes last so a failed run never leaves a succeeded row behind.
        draft.finished_at = Utc::now();
        let run: &RunOutcome = draft;
        self.persist("insert_run", || self.store.insert_run(run))
            .await?;

        // EMAIL
        if let Some(email) = &self.email {
            match email.dispatch(&report, self.settings.force_resend).await {
                DispatchOutcome::Sent { .. } => result.email_sent = true,
                DispatchOutcome::Skipped => {}
                DispatchOutcome::Failed { error } => {
                    warn!(error = error.as_str(), "Report email not delivered");
                    result.warning_flags.insert(warning::EMAIL_FAILED.to_string());
                }
            }
        }

        if let Err(e) = self.backups.cleanup(self.settings.backup_retention_days).await {
            warn!(error = %e, "Backup cleanup failed");
        }

        result.success = true;
        Ok(())
    }

    async fn run_source(
        &self,
        source: &dyn ScrapeProvider,
        request: &ScrapeRequest,
        window: &DateRange,
    ) -> SourceEvaluation {
        let run = self.runner.run(source, request).await;
        if run.status != SourceStatus::Succeeded {
            self.alerter
                .raise(Alert::ProviderFailed {
                    subject_id: request.subject.clone(),
                    source: run.source,
                    status: run.status,
                })
                .await;
        }

        let batch = normalize_items(&run.items, run.source);
        let in_range = filter_in_range(&batch.records, window);
        let quality = quality::assess(
            &batch.records,
            in_range.len() as u32,
            self.settings.quality,
        );
        info!(
            source = %run.source,
            raw = run.items.len(),
            normalized = batch.records.len(),
            in_range = in_range.len(),
            "Source evaluated"
        );

        SourceEvaluation {
            run,
            in_range,
            quality,
        }
    }

    /// Store write under the database retry preset. Final failure raises an alert.
    async fn persist<T, F, Fut>(&self, operation: &str, write: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreError>>,
    {
        let outcome = self
            .settings
            .database_retry
            .execute(write, |e, attempt| {
                warn!(operation, attempt, error = %e, "Store write failed, retrying")
            })
            .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(e) => {
                self.alerter
                    .raise(Alert::StoreFailed {
                        operation: operation.to_string(),
                        error: e.to_string(),
                    })
                    .await;
                Err(anyhow::Error::new(e).context(format!("{operation} failed")))
            }
        }
    }

    async fn record_failure(
        &self,
        report_date: NaiveDate,
        draft: &mut RunOutcome,
        result: &mut PipelineResult,
        error: anyhow::Error,
    ) {
        let message = format!("{error:#}");
        warn!(error = message.as_str(), "Pipeline run failed");
        self.alerter
            .raise(Alert::PipelineCrashed {
                subject_id: self.settings.subject_id.clone(),
                report_date,
                error: message.clone(),
            })
            .await;

        draft.status = RunStatus::Failed;
        draft.error = Some(message.clone());
        draft.finished_at = Utc::now();
        if let Err(e) = self.store.insert_run(draft).await {
            warn!(error = %e, "Failed to record failed run");
        }

        result.success = false;
        result.error = Some(message);
    }

    fn draft_outcome(&self, report_date: NaiveDate) -> RunOutcome {
        let now = Utc::now();
        RunOutcome {
            run_id: Uuid::new_v4().to_string(),
            subject_id: self.settings.subject_id.clone(),
            report_date,
            actor_id: self.primary.actor_id().to_string(),
            dataset_id: crate::source_runner::UNKNOWN.to_string(),
            source_used: SourceKind::Primary,
            fallback_reason: None,
            circuit_breaker_suppressed: false,
            items_fetched_raw: 0,
            items_in_range: 0,
            items_inserted: 0,
            items_updated: 0,
            status: RunStatus::Failed,
            warning_flags: BTreeSet::new(),
            missing_created_at_pct: 0.0,
            missing_url_pct: 0.0,
            empty_day: false,
            empty_day_streak: 0,
            started_at: now,
            finished_at: now,
            error: None,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
