//! Postgres persistence for runs, records, reports and run locks.

mod rows;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use creatorwatch_common::{
    EmailDelivery, NormalizedRecord, ReportRecord, RunLock, RunOutcome, StoreError, UpsertCounts,
};

use rows::{LockRow, ReportRow, RunRow};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Store connection pool closed");
    }

    // --- Locks ---

    /// Create a lock row. A live row with the same key yields `StoreError::Duplicate`.
    pub async fn insert_lock(&self, lock: &RunLock) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_locks (key, acquired_at, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&lock.key)
        .bind(lock.acquired_at)
        .bind(lock.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_lock(&self, key: &str) -> Result<Option<RunLock>> {
        let row = sqlx::query_as::<_, LockRow>(
            r#"
            SELECT key, acquired_at, expires_at FROM run_locks
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    pub async fn delete_lock(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM run_locks WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Remove every lock whose deadline has passed. Returns the number removed.
    pub async fn sweep_expired_locks(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM run_locks WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "Swept expired run locks");
        }
        Ok(removed)
    }

    // --- Records ---

    /// Upsert records keyed by (subject, record id).
    pub async fn upsert_records(
        &self,
        subject_id: &str,
        records: &[NormalizedRecord],
    ) -> Result<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for record in records {
            let flags: Vec<String> = record
                .defect_flags
                .iter()
                .map(|f| f.as_str().to_string())
                .collect();

            // xmax is zero only on rows created by this statement.
            let inserted = sqlx::query_scalar::<_, bool>(
                r#"
                INSERT INTO records
                    (subject_id, record_id, text, url, created_at,
                     views, likes, comments, shares,
                     category, source_used, defect_flags, raw)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (subject_id, record_id) DO UPDATE SET
                    text = EXCLUDED.text,
                    url = EXCLUDED.url,
                    created_at = EXCLUDED.created_at,
                    views = EXCLUDED.views,
                    likes = EXCLUDED.likes,
                    comments = EXCLUDED.comments,
                    shares = EXCLUDED.shares,
                    category = EXCLUDED.category,
                    source_used = EXCLUDED.source_used,
                    defect_flags = EXCLUDED.defect_flags,
                    raw = EXCLUDED.raw,
                    updated_at = now()
                RETURNING (xmax = 0)
                "#,
            )
            .bind(subject_id)
            .bind(&record.id)
            .bind(&record.text)
            .bind(&record.url)
            .bind(record.created_at)
            .bind(to_i64(record.metrics.views))
            .bind(to_i64(record.metrics.likes))
            .bind(to_i64(record.metrics.comments))
            .bind(to_i64(record.metrics.shares))
            .bind(&record.category)
            .bind(record.source_used.as_str())
            .bind(&flags)
            .bind(&record.raw)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            if inserted {
                counts.inserted += 1;
            } else {
                counts.updated += 1;
            }
        }

        tx.commit().await.map_err(db_err)?;
        debug!(
            subject_id,
            inserted = counts.inserted,
            updated = counts.updated,
            "Upserted records"
        );
        Ok(counts)
    }

    // --- Runs ---

    pub async fn insert_run(&self, run: &RunOutcome) -> Result<()> {
        let flags: Vec<String> = run.warning_flags.iter().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO runs
                (run_id, subject_id, report_date, actor_id, dataset_id, source_used,
                 fallback_reason, circuit_breaker_suppressed,
                 items_fetched_raw, items_in_range, items_inserted, items_updated,
                 status, warning_flags, missing_created_at_pct, missing_url_pct,
                 empty_day, empty_day_streak, started_at, finished_at, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.subject_id)
        .bind(run.report_date)
        .bind(&run.actor_id)
        .bind(&run.dataset_id)
        .bind(run.source_used.as_str())
        .bind(run.fallback_reason.map(|r| r.as_str()))
        .bind(run.circuit_breaker_suppressed)
        .bind(to_i32(run.items_fetched_raw))
        .bind(to_i32(run.items_in_range))
        .bind(to_i32(run.items_inserted))
        .bind(to_i32(run.items_updated))
        .bind(run.status.as_str())
        .bind(&flags)
        .bind(run.missing_created_at_pct)
        .bind(run.missing_url_pct)
        .bind(run.empty_day)
        .bind(to_i32(run.empty_day_streak))
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Most recently finished run for a subject and report date.
    pub async fn latest_run_for_date(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<RunOutcome>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT * FROM runs
            WHERE subject_id = $1 AND report_date = $2
            ORDER BY finished_at DESC
            LIMIT 1
            "#,
        )
        .bind(subject_id)
        .bind(report_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(RunOutcome::try_from).transpose()
    }

    /// Runs that used the fallback source with `from <= report_date < until`.
    pub async fn count_fallback_runs(
        &self,
        subject_id: &str,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<u32> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM runs
            WHERE subject_id = $1
              AND source_used = 'fallback'
              AND report_date >= $2
              AND report_date < $3
            "#,
        )
        .bind(subject_id)
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    // --- Reports ---

    /// Insert or refresh a report. Email delivery columns are written on insert only.
    pub async fn upsert_report(&self, report: &ReportRecord) -> Result<()> {
        let flags: Vec<String> = report.warning_flags.iter().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO reports
                (subject_id, report_date, generated_at, body_text, record_ids,
                 status, source_used, warning_flags, empty_day, empty_day_streak,
                 email_status, email_sent_at, email_message_id, email_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (subject_id, report_date) DO UPDATE SET
                generated_at = EXCLUDED.generated_at,
                body_text = EXCLUDED.body_text,
                record_ids = EXCLUDED.record_ids,
                status = EXCLUDED.status,
                source_used = EXCLUDED.source_used,
                warning_flags = EXCLUDED.warning_flags,
                empty_day = EXCLUDED.empty_day,
                empty_day_streak = EXCLUDED.empty_day_streak
            "#,
        )
        .bind(&report.subject_id)
        .bind(report.report_date)
        .bind(report.generated_at)
        .bind(&report.body_text)
        .bind(&report.record_ids)
        .bind(report.status.as_str())
        .bind(report.source_used.as_str())
        .bind(&flags)
        .bind(report.empty_day)
        .bind(to_i32(report.empty_day_streak))
        .bind(report.email.status.map(|s| s.as_str()))
        .bind(report.email.sent_at)
        .bind(&report.email.message_id)
        .bind(&report.email.error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_report(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<ReportRecord>> {
        let row = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT * FROM reports
            WHERE subject_id = $1 AND report_date = $2
            "#,
        )
        .bind(subject_id)
        .bind(report_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(ReportRecord::try_from).transpose()
    }

    pub async fn update_report_email(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
        email: &EmailDelivery,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reports SET
                email_status = $3,
                email_sent_at = $4,
                email_message_id = $5,
                email_error = $6
            WHERE subject_id = $1 AND report_date = $2
            "#,
        )
        .bind(subject_id)
        .bind(report_date)
        .bind(email.status.map(|s| s.as_str()))
        .bind(email.sent_at)
        .bind(&email.message_id)
        .bind(&email.error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("report {subject_id}:{report_date}")));
        }
        Ok(())
    }
}

/// Map a sqlx error onto the store taxonomy. Unique violations become `Duplicate`.
fn db_err(err: sqlx::Error) -> StoreError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::Duplicate(db.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
