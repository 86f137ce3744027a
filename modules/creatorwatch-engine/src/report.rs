//! Plain-text daily report.
//!
//! The body is a pure function of the inputs below. Generation time is stored
//! on the record but never rendered, so re-running a day yields the same text.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};

use creatorwatch_common::{
    EmailDelivery, NormalizedRecord, ReportRecord, ReportStatus, RunStatus, SourceKind,
};

use crate::policy::EmptyResult;
use crate::streak::STREAK_WARNING_THRESHOLD;

const RULE: &str = "----------------------------------------";

pub struct ReportInput<'a> {
    pub subject_id: &'a str,
    pub report_date: NaiveDate,
    pub source_used: SourceKind,
    /// In-range records only.
    pub records: &'a [NormalizedRecord],
    pub warning_flags: &'a BTreeSet<String>,
    pub run_status: RunStatus,
    /// `None` when there are records in range.
    pub empty_result: Option<EmptyResult>,
    pub empty_day_streak: u32,
}

pub fn report_status(input: &ReportInput<'_>) -> ReportStatus {
    if input.run_status == RunStatus::Failed
        || input.empty_result == Some(EmptyResult::TechnicalFailure)
    {
        ReportStatus::Error
    } else if !input.warning_flags.is_empty() {
        ReportStatus::Warning
    } else {
        ReportStatus::Ok
    }
}

pub fn generate_report(input: &ReportInput<'_>, generated_at: DateTime<Utc>) -> ReportRecord {
    let status = report_status(input);
    ReportRecord {
        report_date: input.report_date,
        subject_id: input.subject_id.to_string(),
        generated_at,
        body_text: render_body(input, status),
        record_ids: input.records.iter().map(|r| r.id.clone()).collect(),
        status,
        source_used: input.source_used,
        warning_flags: input.warning_flags.clone(),
        empty_day: input.empty_result == Some(EmptyResult::QuietDay),
        empty_day_streak: input.empty_day_streak,
        email: EmailDelivery::default(),
    }
}

fn render_body(input: &ReportInput<'_>, status: ReportStatus) -> String {
    let mut out = Vec::new();

    out.push(format!("Daily report - TikTok @{}", input.subject_id));
    out.push(format!("Posts from: {}", input.report_date.format("%Y-%m-%d")));
    out.push(format!(
        "Data source: {}",
        match input.source_used {
            SourceKind::Primary => "Primary actor",
            SourceKind::Fallback => "Fallback actor",
        }
    ));
    out.push(format!("Total posts: {}", input.records.len()));
    out.push(String::new());
    out.push(RULE.to_string());

    if input.records.is_empty() {
        out.push(String::new());
        out.push(format!(
            "No posts found for {}",
            input.report_date.format("%Y-%m-%d")
        ));
        match input.empty_result {
            Some(EmptyResult::QuietDay) => {
                out.push("Reason: the account published nothing that day".to_string());
                if input.empty_day_streak >= STREAK_WARNING_THRESHOLD {
                    out.push(format!(
                        "Consecutive empty days: {}",
                        input.empty_day_streak
                    ));
                }
            }
            _ => out.push("Reason: the data source returned no usable posts".to_string()),
        }
    } else {
        for (category, records) in group_by_category(input.records) {
            out.push(String::new());
            out.push(format!("[Category: {category}] ({} posts)", records.len()));
            for (i, record) in records.iter().enumerate() {
                out.push(String::new());
                out.push(format!("{}. {}", i + 1, record.text));
                out.push(format!("   Link: {}", record.url));
            }
        }
        out.push(String::new());
        out.extend(summary_stats(input.records));
    }

    if !input.warning_flags.is_empty() {
        out.push(String::new());
        out.push("Warnings:".to_string());
        for flag in input.warning_flags {
            out.push(format!("   - {flag}"));
        }
    }

    out.push(String::new());
    out.push(RULE.to_string());
    out.push(String::new());
    out.push(
        match status {
            ReportStatus::Ok => "Posts saved successfully",
            ReportStatus::Warning => "Report completed with warnings",
            ReportStatus::Error => "Report completed with errors",
        }
        .to_string(),
    );

    out.join("\n")
}

/// Categories in name order, posts newest first. Ties break on id.
fn group_by_category(records: &[NormalizedRecord]) -> BTreeMap<&str, Vec<&NormalizedRecord>> {
    let mut grouped: BTreeMap<&str, Vec<&NormalizedRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.category.as_str()).or_default().push(record);
    }
    for posts in grouped.values_mut() {
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    }
    grouped
}

fn summary_stats(records: &[NormalizedRecord]) -> Vec<String> {
    // Provider metrics are unbounded u64s; totals are summed in u128.
    let n = records.len() as u128;
    let total = |metric: fn(&NormalizedRecord) -> u64| -> u128 {
        records.iter().map(|r| u128::from(metric(r))).sum()
    };
    let views = total(|r| r.metrics.views);
    let likes = total(|r| r.metrics.likes);
    let comments = total(|r| r.metrics.comments);
    let shares = total(|r| r.metrics.shares);

    vec![
        "Statistics:".to_string(),
        format!(
            "   Total views: {} (avg: {})",
            thousands(views),
            thousands(rounded_avg(views, n))
        ),
        format!(
            "   Total likes: {} (avg: {})",
            thousands(likes),
            thousands(rounded_avg(likes, n))
        ),
        format!("   Total comments: {}", thousands(comments)),
        format!("   Total shares: {}", thousands(shares)),
    ]
}

fn rounded_avg(total: u128, n: u128) -> u128 {
    if n == 0 {
        0
    } else {
        total.saturating_add(n / 2) / n
    }
}

/// `1234567` -> `1,234,567`.
fn thousands(n: u128) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
