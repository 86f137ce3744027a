use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// --- Sources ---

/// Which provider configuration produced a set of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Primary,
    Fallback,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Primary => "primary",
            SourceKind::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(SourceKind::Primary),
            "fallback" => Ok(SourceKind::Fallback),
            other => Err(format!("unknown source kind: {other}")),
        }
    }
}

/// Provider-neutral job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ready,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl SourceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SourceStatus::Succeeded
                | SourceStatus::Failed
                | SourceStatus::TimedOut
                | SourceStatus::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Ready => "ready",
            SourceStatus::Running => "running",
            SourceStatus::Succeeded => "succeeded",
            SourceStatus::Failed => "failed",
            SourceStatus::TimedOut => "timed_out",
            SourceStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Records ---

/// Structural defect noticed while normalizing a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefectFlag {
    MissingText,
    UrlBuiltFromId,
    MissingVideoUrl,
    MissingCreateTime,
}

impl DefectFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            DefectFlag::MissingText => "MISSING_TEXT",
            DefectFlag::UrlBuiltFromId => "URL_BUILT_FROM_ID",
            DefectFlag::MissingVideoUrl => "MISSING_VIDEO_URL",
            DefectFlag::MissingCreateTime => "MISSING_CREATE_TIME",
        }
    }
}

impl std::fmt::Display for DefectFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefectFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MISSING_TEXT" => Ok(DefectFlag::MissingText),
            "URL_BUILT_FROM_ID" => Ok(DefectFlag::UrlBuiltFromId),
            "MISSING_VIDEO_URL" => Ok(DefectFlag::MissingVideoUrl),
            "MISSING_CREATE_TIME" => Ok(DefectFlag::MissingCreateTime),
            other => Err(format!("unknown defect flag: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
}

/// One scraped post in provider-neutral shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: String,
    pub text: String,
    /// Empty when no usable URL could be found or built.
    pub url: String,
    /// Holds the normalization time when `MISSING_CREATE_TIME` is flagged.
    pub created_at: DateTime<Utc>,
    pub metrics: EngagementMetrics,
    pub category: String,
    pub source_used: SourceKind,
    pub defect_flags: BTreeSet<DefectFlag>,
    /// Provider payload as received.
    pub raw: serde_json::Value,
}

impl NormalizedRecord {
    pub fn has_flag(&self, flag: DefectFlag) -> bool {
        self.defect_flags.contains(&flag)
    }
}

// --- Runs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Partial,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "partial" => Ok(RunStatus::Partial),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Why the fallback source was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackReason {
    Failed,
    ZeroResults,
    LowResults,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackReason::Failed => "FAILED",
            FallbackReason::ZeroResults => "ZERO_RESULTS",
            FallbackReason::LowResults => "LOW_RESULTS",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FallbackReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FAILED" => Ok(FallbackReason::Failed),
            "ZERO_RESULTS" => Ok(FallbackReason::ZeroResults),
            "LOW_RESULTS" => Ok(FallbackReason::LowResults),
            other => Err(format!("unknown fallback reason: {other}")),
        }
    }
}

/// Append-only audit row for one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub subject_id: String,
    pub report_date: NaiveDate,
    pub actor_id: String,
    pub dataset_id: String,
    pub source_used: SourceKind,
    pub fallback_reason: Option<FallbackReason>,
    pub circuit_breaker_suppressed: bool,
    pub items_fetched_raw: u32,
    pub items_in_range: u32,
    pub items_inserted: u32,
    pub items_updated: u32,
    pub status: RunStatus,
    pub warning_flags: BTreeSet<String>,
    pub missing_created_at_pct: f64,
    pub missing_url_pct: f64,
    pub empty_day: bool,
    pub empty_day_streak: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Mutual-exclusion row for one (subject, report date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLock {
    pub key: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RunLock {
    pub fn key_for(subject_id: &str, report_date: NaiveDate) -> String {
        format!("{subject_id}:{}", report_date.format("%Y-%m-%d"))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub inserted: u32,
    pub updated: u32,
}

// --- Reports ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    Warning,
    Error,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Ok => "ok",
            ReportStatus::Warning => "warning",
            ReportStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(ReportStatus::Ok),
            "warning" => Ok(ReportStatus::Warning),
            "error" => Ok(ReportStatus::Error),
            other => Err(format!("unknown report status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Pending,
    Sent,
    Failed,
}

impl EmailStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
        }
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EmailStatus::Pending),
            "sent" => Ok(EmailStatus::Sent),
            "failed" => Ok(EmailStatus::Failed),
            other => Err(format!("unknown email status: {other}")),
        }
    }
}

/// Email state attached to a report. `status` is `None` until a send is attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDelivery {
    pub status: Option<EmailStatus>,
    pub sent_at: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl EmailDelivery {
    pub fn is_sent(&self) -> bool {
        self.status == Some(EmailStatus::Sent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub report_date: NaiveDate,
    pub subject_id: String,
    pub generated_at: DateTime<Utc>,
    pub body_text: String,
    pub record_ids: Vec<String>,
    pub status: ReportStatus,
    pub source_used: SourceKind,
    pub warning_flags: BTreeSet<String>,
    pub empty_day: bool,
    pub empty_day_streak: u32,
    pub email: EmailDelivery,
}

// --- Email ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Provider-neutral outgoing email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub from_name: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text: String,
    pub attachments: Vec<EmailAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailReceipt {
    pub message_id: String,
}

// --- Pipeline ---

/// Summary handed back to whatever triggered the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub lock_active: bool,
    pub run_id: Option<String>,
    pub source_used: Option<SourceKind>,
    pub fallback_reason: Option<FallbackReason>,
    pub circuit_breaker_suppressed: bool,
    pub items_fetched_raw: u32,
    pub items_in_range: u32,
    pub items_inserted: u32,
    pub items_updated: u32,
    pub report_generated: bool,
    pub email_sent: bool,
    pub warning_flags: BTreeSet<String>,
    pub error: Option<String>,
}

impl std::fmt::Display for PipelineResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.lock_active {
            return write!(f, "skipped (lock active)");
        }
        write!(
            f,
            "success={} source={} raw={} in_range={} inserted={} updated={} report={} email={}",
            self.success,
            self.source_used.map(SourceKind::as_str).unwrap_or("-"),
            self.items_fetched_raw,
            self.items_in_range,
            self.items_inserted,
            self.items_updated,
            self.report_generated,
            self.email_sent,
        )?;
        if !self.warning_flags.is_empty() {
            let flags: Vec<&str> = self.warning_flags.iter().map(String::as_str).collect();
            write!(f, " warnings=[{}]", flags.join(","))?;
        }
        if let Some(err) = &self.error {
            write!(f, " error={err}")?;
        }
        Ok(())
    }
}

/// Run-level warning flags. Stored as plain strings on runs and reports.
pub mod warning {
    pub const LOCK_ACTIVE: &str = "LOCK_ACTIVE";
    pub const LOW_RESULTS: &str = "LOW_RESULTS";
    pub const FALLBACK_TRIGGERED: &str = "FALLBACK_TRIGGERED";
    pub const FALLBACK_FAILED: &str = "FALLBACK_FAILED";
    pub const CIRCUIT_BREAKER_SUPPRESSED: &str = "CIRCUIT_BREAKER_SUPPRESSED";
    pub const HIGH_MISSING_CREATETIME: &str = "HIGH_MISSING_CREATETIME";
    pub const HIGH_MISSING_URL: &str = "HIGH_MISSING_URL";
    pub const DATA_QUALITY_ISSUE: &str = "DATA_QUALITY_ISSUE";
    pub const EMPTY_DAY: &str = "EMPTY_DAY";
    pub const EMPTY_DAY_STREAK: &str = "EMPTY_DAY_STREAK";
    pub const EMAIL_FAILED: &str = "EMAIL_FAILED";
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn lock_key_joins_subject_and_iso_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(RunLock::key_for("creator", date), "creator:2024-03-09");
    }

    #[test]
    fn lock_expires_at_its_deadline() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let lock = RunLock {
            key: "k".into(),
            acquired_at: at - chrono::Duration::minutes(30),
            expires_at: at,
        };
        assert!(lock.is_expired(at));
        assert!(!lock.is_expired(at - chrono::Duration::seconds(1)));
    }

    #[test]
    fn defect_flags_serialize_screaming_snake() {
        let json = serde_json::to_string(&DefectFlag::UrlBuiltFromId).unwrap();
        assert_eq!(json, "\"URL_BUILT_FROM_ID\"");
        assert_eq!("MISSING_CREATE_TIME".parse::<DefectFlag>(), Ok(DefectFlag::MissingCreateTime));
    }
}
