// In-memory doubles for the engine's trait seams.
//
// - MemoryStore (RunStore): locks, records, runs and reports in a Mutex, with
//   switches to inject store errors per area
// - MockProvider (ScrapeProvider): scripted statuses and items, call counters
// - MockMailer (ReportMailer): scripted delivery results, sent-message log
// - RecordingNotifier (NotifyBackend): keeps every alert raised
//
// Plus `run_outcome` for seeding run history.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::Value;

use creatorwatch_common::{
    DeliveryError, EmailDelivery, EmailMessage, EmailReceipt, NormalizedRecord, ReportRecord,
    RunLock, RunOutcome, RunStatus, SourceKind, SourceStatus, StoreError, UpsertCounts,
    DEFAULT_FALLBACK_ACTOR_ID, DEFAULT_PRIMARY_ACTOR_ID,
};

use crate::alert::{Alert, NotifyBackend};
use crate::traits::{JobHandle, ReportMailer, RunStore, ScrapeProvider, ScrapeRequest};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A succeeded run with `items_in_range` posts kept out of the same number fetched.
pub fn run_outcome(
    subject_id: &str,
    report_date: NaiveDate,
    source: SourceKind,
    items_in_range: u32,
) -> RunOutcome {
    let started_at = Utc
        .from_utc_datetime(&report_date.and_hms_opt(6, 0, 0).unwrap_or_default())
        + chrono::Duration::days(1);
    RunOutcome {
        run_id: format!("run-{subject_id}-{report_date}-{source}"),
        subject_id: subject_id.to_string(),
        report_date,
        actor_id: match source {
            SourceKind::Primary => DEFAULT_PRIMARY_ACTOR_ID.to_string(),
            SourceKind::Fallback => DEFAULT_FALLBACK_ACTOR_ID.to_string(),
        },
        dataset_id: "dataset".to_string(),
        source_used: source,
        fallback_reason: None,
        circuit_breaker_suppressed: false,
        items_fetched_raw: items_in_range.max(1),
        items_in_range,
        items_inserted: items_in_range,
        items_updated: 0,
        status: RunStatus::Succeeded,
        warning_flags: BTreeSet::new(),
        missing_created_at_pct: 0.0,
        missing_url_pct: 0.0,
        empty_day: items_in_range == 0,
        empty_day_streak: 0,
        started_at,
        finished_at: started_at + chrono::Duration::minutes(2),
        error: None,
    }
}

fn injected(area: &str) -> StoreError {
    StoreError::Backend(format!("injected {area} failure"))
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    locks: HashMap<String, RunLock>,
    records: HashMap<(String, String), NormalizedRecord>,
    runs: Vec<RunOutcome>,
    reports: HashMap<(String, NaiveDate), ReportRecord>,
}

/// Stateful in-memory store. Runs are kept in insertion order; the latest run
/// for a date is the last one pushed.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_locks: AtomicBool,
    fail_queries: AtomicBool,
    fail_record_writes: AtomicBool,
    fail_run_writes: AtomicBool,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock insert, read and delete all error.
    pub fn fail_locks(&self, fail: bool) {
        self.fail_locks.store(fail, Ordering::SeqCst);
    }

    /// Run history reads (`latest_run_for_date`, `count_fallback_runs`) error.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_record_writes(&self, fail: bool) {
        self.fail_record_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_run_writes(&self, fail: bool) {
        self.fail_run_writes.store(fail, Ordering::SeqCst);
    }

    pub fn push_run(&self, run: RunOutcome) {
        self.state.lock().unwrap().runs.push(run);
    }

    pub fn runs(&self) -> Vec<RunOutcome> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn records(&self) -> Vec<NormalizedRecord> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<NormalizedRecord> = state.records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn report(&self, subject_id: &str, report_date: NaiveDate) -> Option<ReportRecord> {
        self.state
            .lock()
            .unwrap()
            .reports
            .get(&(subject_id.to_string(), report_date))
            .cloned()
    }

    pub fn lock_count(&self) -> usize {
        self.state.lock().unwrap().locks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert_lock(&self, lock: &RunLock) -> Result<(), StoreError> {
        if self.fail_locks.load(Ordering::SeqCst) {
            return Err(injected("lock"));
        }
        let mut state = self.state.lock().unwrap();
        if state.locks.contains_key(&lock.key) {
            return Err(StoreError::Duplicate(lock.key.clone()));
        }
        state.locks.insert(lock.key.clone(), lock.clone());
        Ok(())
    }

    async fn get_lock(&self, key: &str) -> Result<Option<RunLock>, StoreError> {
        if self.fail_locks.load(Ordering::SeqCst) {
            return Err(injected("lock"));
        }
        Ok(self.state.lock().unwrap().locks.get(key).cloned())
    }

    async fn delete_lock(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_locks.load(Ordering::SeqCst) {
            return Err(injected("lock"));
        }
        self.state.lock().unwrap().locks.remove(key);
        Ok(())
    }

    async fn upsert_records(
        &self,
        subject_id: &str,
        records: &[NormalizedRecord],
    ) -> Result<UpsertCounts, StoreError> {
        if self.fail_record_writes.load(Ordering::SeqCst) {
            return Err(injected("record write"));
        }
        let mut state = self.state.lock().unwrap();
        let mut counts = UpsertCounts::default();
        for record in records {
            let key = (subject_id.to_string(), record.id.clone());
            if state.records.insert(key, record.clone()).is_some() {
                counts.updated += 1;
            } else {
                counts.inserted += 1;
            }
        }
        Ok(counts)
    }

    async fn insert_run(&self, run: &RunOutcome) -> Result<(), StoreError> {
        if self.fail_run_writes.load(Ordering::SeqCst) {
            return Err(injected("run write"));
        }
        let mut state = self.state.lock().unwrap();
        if state.runs.iter().any(|r| r.run_id == run.run_id) {
            return Err(StoreError::Duplicate(run.run_id.clone()));
        }
        state.runs.push(run.clone());
        Ok(())
    }

    async fn latest_run_for_date(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<RunOutcome>, StoreError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(injected("query"));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .runs
            .iter()
            .rev()
            .find(|r| r.subject_id == subject_id && r.report_date == report_date)
            .cloned())
    }

    async fn count_fallback_runs(
        &self,
        subject_id: &str,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<u32, StoreError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(injected("query"));
        }
        let count = self
            .state
            .lock()
            .unwrap()
            .runs
            .iter()
            .filter(|r| {
                r.subject_id == subject_id
                    && r.source_used == SourceKind::Fallback
                    && r.report_date >= from
                    && r.report_date < until
            })
            .count();
        Ok(count as u32)
    }

    async fn upsert_report(&self, report: &ReportRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let key = (report.subject_id.clone(), report.report_date);
        let email = state
            .reports
            .get(&key)
            .map(|existing| existing.email.clone())
            .unwrap_or_default();
        let mut stored = report.clone();
        stored.email = email;
        state.reports.insert(key, stored);
        Ok(())
    }

    async fn get_report(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<ReportRecord>, StoreError> {
        Ok(self.report(subject_id, report_date))
    }

    async fn update_report_email(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
        email: &EmailDelivery,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.reports.get_mut(&(subject_id.to_string(), report_date)) {
            Some(report) => {
                report.email = email.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("report {subject_id} {report_date}"))),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// Scripted scrape source. Each poll consumes the next status; the last one
/// repeats once the script runs out. Jobs are numbered `job-N` / `dataset-N`.
pub struct MockProvider {
    kind: SourceKind,
    actor_id: String,
    statuses: Vec<SourceStatus>,
    items: Vec<Value>,
    fail_start: bool,
    fail_fetch: bool,
    starts: AtomicU32,
    polls: AtomicU32,
    fetches: AtomicU32,
}

impl MockProvider {
    pub fn new(kind: SourceKind) -> Self {
        let actor_id = match kind {
            SourceKind::Primary => DEFAULT_PRIMARY_ACTOR_ID,
            SourceKind::Fallback => DEFAULT_FALLBACK_ACTOR_ID,
        };
        Self {
            kind,
            actor_id: actor_id.to_string(),
            statuses: vec![SourceStatus::Succeeded],
            items: Vec::new(),
            fail_start: false,
            fail_fetch: false,
            starts: AtomicU32::new(0),
            polls: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
        }
    }

    pub fn with_statuses(mut self, statuses: Vec<SourceStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn with_items(mut self, items: Vec<Value>) -> Self {
        self.items = items;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScrapeProvider for MockProvider {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn actor_id(&self) -> &str {
        &self.actor_id
    }

    async fn start_job(&self, _request: &ScrapeRequest) -> Result<JobHandle> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_start {
            bail!("connection refused");
        }
        Ok(JobHandle {
            job_id: format!("job-{n}"),
            dataset_handle: format!("dataset-{n}"),
        })
    }

    async fn poll_status(&self, _job_id: &str) -> Result<SourceStatus> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) as usize;
        match self.statuses.get(n).or_else(|| self.statuses.last()) {
            Some(status) => Ok(*status),
            None => bail!("no statuses scripted"),
        }
    }

    async fn fetch_results(&self, _dataset_handle: &str) -> Result<Vec<Value>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch {
            bail!("dataset fetch timed out");
        }
        Ok(self.items.clone())
    }
}

// ---------------------------------------------------------------------------
// MockMailer
// ---------------------------------------------------------------------------

/// Delivers successfully unless results are scripted with `then`.
#[derive(Default)]
pub struct MockMailer {
    script: Mutex<VecDeque<Result<EmailReceipt, DeliveryError>>>,
    sent: Mutex<Vec<EmailMessage>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, result: Result<EmailReceipt, DeliveryError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    /// Every attempted message, failed ones included.
    pub fn attempts(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportMailer for MockMailer {
    async fn send(&self, message: &EmailMessage) -> Result<EmailReceipt, DeliveryError> {
        let attempt = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            sent.len()
        };
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(EmailReceipt {
                message_id: format!("<msg-{attempt}@mock>"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the alert, then reports a delivery failure.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.alerts.lock().unwrap().iter().map(Alert::kind).collect()
    }
}

#[async_trait]
impl NotifyBackend for RecordingNotifier {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        if self.fail {
            bail!("webhook unreachable");
        }
        Ok(())
    }
}
