use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::warn;

use creatorwatch_common::RunStatus;

use crate::traits::RunStore;

/// Days walked back, the report date included.
pub const MAX_LOOKBACK_DAYS: i64 = 14;

/// A streak this long is reported as an anomaly.
pub const STREAK_WARNING_THRESHOLD: u32 = 2;

pub struct StreakTracker {
    store: Arc<dyn RunStore>,
}

impl StreakTracker {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Consecutive days ending at `report_date` whose latest run succeeded with nothing in range.
    pub async fn streak(&self, subject_id: &str, report_date: NaiveDate) -> u32 {
        let mut streak = 0;
        for offset in 0..MAX_LOOKBACK_DAYS {
            let day = report_date - Duration::days(offset);
            match self.store.latest_run_for_date(subject_id, day).await {
                Ok(Some(run)) if run.items_in_range == 0 && run.status == RunStatus::Succeeded => {
                    streak += 1;
                }
                Ok(_) => break,
                Err(e) => {
                    warn!(subject_id, %day, error = %e, "Streak lookup failed, stopping walk");
                    break;
                }
            }
        }
        streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run_outcome, MemoryStore};
    use creatorwatch_common::SourceKind;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[tokio::test]
    async fn counts_consecutive_empty_successes() {
        let store = Arc::new(MemoryStore::new());
        for d in [10, 9, 8] {
            store.push_run(run_outcome("creator", date(d), SourceKind::Primary, 0));
        }
        store.push_run(run_outcome("creator", date(7), SourceKind::Primary, 12));

        assert_eq!(StreakTracker::new(store).streak("creator", date(10)).await, 3);
    }

    #[tokio::test]
    async fn gap_ends_the_streak() {
        let store = Arc::new(MemoryStore::new());
        store.push_run(run_outcome("creator", date(10), SourceKind::Primary, 0));
        store.push_run(run_outcome("creator", date(8), SourceKind::Primary, 0));

        assert_eq!(StreakTracker::new(store).streak("creator", date(10)).await, 1);
    }

    #[tokio::test]
    async fn non_succeeded_day_ends_the_streak() {
        let store = Arc::new(MemoryStore::new());
        store.push_run(run_outcome("creator", date(10), SourceKind::Primary, 0));
        let mut partial = run_outcome("creator", date(9), SourceKind::Primary, 0);
        partial.status = RunStatus::Partial;
        store.push_run(partial);
        store.push_run(run_outcome("creator", date(8), SourceKind::Primary, 0));

        assert_eq!(StreakTracker::new(store).streak("creator", date(10)).await, 1);
    }

    #[tokio::test]
    async fn walk_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        for d in 1..=20 {
            store.push_run(run_outcome("creator", date(d), SourceKind::Primary, 0));
        }
        assert_eq!(
            StreakTracker::new(store).streak("creator", date(20)).await,
            MAX_LOOKBACK_DAYS as u32
        );
    }

    #[tokio::test]
    async fn store_error_yields_zero() {
        let store = Arc::new(MemoryStore::new());
        store.push_run(run_outcome("creator", date(10), SourceKind::Primary, 0));
        store.fail_queries(true);
        assert_eq!(StreakTracker::new(store).streak("creator", date(10)).await, 0);
    }
}
