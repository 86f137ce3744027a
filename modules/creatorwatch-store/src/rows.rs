// Row shapes as stored in Postgres and their conversion into domain types.

use chrono::{DateTime, NaiveDate, Utc};

use creatorwatch_common::{
    EmailDelivery, EmailStatus, FallbackReason, ReportRecord, ReportStatus, RunLock, RunOutcome,
    RunStatus, SourceKind, StoreError,
};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LockRow {
    pub key: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<LockRow> for RunLock {
    fn from(row: LockRow) -> Self {
        RunLock {
            key: row.key,
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RunRow {
    pub run_id: String,
    pub subject_id: String,
    pub report_date: NaiveDate,
    pub actor_id: String,
    pub dataset_id: String,
    pub source_used: String,
    pub fallback_reason: Option<String>,
    pub circuit_breaker_suppressed: bool,
    pub items_fetched_raw: i32,
    pub items_in_range: i32,
    pub items_inserted: i32,
    pub items_updated: i32,
    pub status: String,
    pub warning_flags: Vec<String>,
    pub missing_created_at_pct: f64,
    pub missing_url_pct: f64,
    pub empty_day: bool,
    pub empty_day_streak: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl TryFrom<RunRow> for RunOutcome {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(RunOutcome {
            source_used: row.source_used.parse::<SourceKind>().map_err(corrupt)?,
            fallback_reason: row
                .fallback_reason
                .as_deref()
                .map(str::parse::<FallbackReason>)
                .transpose()
                .map_err(corrupt)?,
            status: row.status.parse::<RunStatus>().map_err(corrupt)?,
            run_id: row.run_id,
            subject_id: row.subject_id,
            report_date: row.report_date,
            actor_id: row.actor_id,
            dataset_id: row.dataset_id,
            circuit_breaker_suppressed: row.circuit_breaker_suppressed,
            items_fetched_raw: to_u32(row.items_fetched_raw),
            items_in_range: to_u32(row.items_in_range),
            items_inserted: to_u32(row.items_inserted),
            items_updated: to_u32(row.items_updated),
            warning_flags: row.warning_flags.into_iter().collect(),
            missing_created_at_pct: row.missing_created_at_pct,
            missing_url_pct: row.missing_url_pct,
            empty_day: row.empty_day,
            empty_day_streak: to_u32(row.empty_day_streak),
            started_at: row.started_at,
            finished_at: row.finished_at,
            error: row.error,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ReportRow {
    pub subject_id: String,
    pub report_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub body_text: String,
    pub record_ids: Vec<String>,
    pub status: String,
    pub source_used: String,
    pub warning_flags: Vec<String>,
    pub empty_day: bool,
    pub empty_day_streak: i32,
    pub email_status: Option<String>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub email_message_id: Option<String>,
    pub email_error: Option<String>,
}

impl TryFrom<ReportRow> for ReportRecord {
    type Error = StoreError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(ReportRecord {
            status: row.status.parse::<ReportStatus>().map_err(corrupt)?,
            source_used: row.source_used.parse::<SourceKind>().map_err(corrupt)?,
            email: EmailDelivery {
                status: row
                    .email_status
                    .as_deref()
                    .map(str::parse::<EmailStatus>)
                    .transpose()
                    .map_err(corrupt)?,
                sent_at: row.email_sent_at,
                message_id: row.email_message_id,
                error: row.email_error,
            },
            report_date: row.report_date,
            subject_id: row.subject_id,
            generated_at: row.generated_at,
            body_text: row.body_text,
            record_ids: row.record_ids,
            warning_flags: row.warning_flags.into_iter().collect(),
            empty_day: row.empty_day,
            empty_day_streak: to_u32(row.empty_day_streak),
        })
    }
}

fn corrupt(msg: String) -> StoreError {
    StoreError::Backend(format!("corrupt row: {msg}"))
}

fn to_u32(n: i32) -> u32 {
    u32::try_from(n).unwrap_or(0)
}
