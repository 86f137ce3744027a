use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use creatorwatch_common::StoreError;

use crate::lock::FailurePolicy;
use crate::traits::RunStore;

/// Calendar days looked back from the report date (48 hours).
pub const WINDOW_DAYS: i64 = 2;

/// Caps paid fallback runs per subject over the trailing two report dates.
pub struct CircuitBreaker {
    store: Arc<dyn RunStore>,
    max_fallbacks: u32,
    policy: FailurePolicy,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn RunStore>, max_fallbacks: u32, policy: FailurePolicy) -> Self {
        Self {
            store,
            max_fallbacks,
            policy,
        }
    }

    /// Fallback runs with report date in `[report_date - 2 days, report_date)`.
    pub async fn fallback_runs_in_window(
        &self,
        subject_id: &str,
        report_date: NaiveDate,
    ) -> Result<u32, StoreError> {
        let from = report_date - Duration::days(WINDOW_DAYS);
        self.store
            .count_fallback_runs(subject_id, from, report_date)
            .await
    }

    /// True when the fallback must be suppressed.
    pub async fn is_open(&self, subject_id: &str, report_date: NaiveDate) -> bool {
        match self.fallback_runs_in_window(subject_id, report_date).await {
            Ok(count) => {
                let open = count >= self.max_fallbacks;
                info!(
                    subject_id,
                    %report_date,
                    fallback_runs = count,
                    cap = self.max_fallbacks,
                    open,
                    "Circuit breaker checked"
                );
                open
            }
            Err(e) => {
                let open = self.policy == FailurePolicy::Closed;
                warn!(subject_id, error = %e, open, "Circuit breaker query failed");
                open
            }
        }
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

    fn breaker(store: &Arc<MemoryStore>, policy: FailurePolicy) -> CircuitBreaker {
        CircuitBreaker::new(store.clone(), 1, policy)
    }

    #[tokio::test]
    async fn fallback_on_previous_day_opens_breaker() {
        let store = Arc::new(MemoryStore::new());
        store.push_run(run_outcome("creator", date(9), SourceKind::Fallback, 5));

        assert!(breaker(&store, FailurePolicy::Open).is_open("creator", date(10)).await);
    }

    #[tokio::test]
    async fn fallback_three_days_back_is_outside_window() {
        let store = Arc::new(MemoryStore::new());
        store.push_run(run_outcome("creator", date(7), SourceKind::Fallback, 5));

        assert!(!breaker(&store, FailurePolicy::Open).is_open("creator", date(10)).await);
    }

    #[tokio::test]
    async fn same_day_fallback_is_not_counted() {
        let store = Arc::new(MemoryStore::new());
        store.push_run(run_outcome("creator", date(10), SourceKind::Fallback, 5));
        store.push_run(run_outcome("creator", date(9), SourceKind::Primary, 5));
        store.push_run(run_outcome("other", date(9), SourceKind::Fallback, 5));

        let breaker = breaker(&store, FailurePolicy::Open);
        assert_eq!(breaker.fallback_runs_in_window("creator", date(10)).await.unwrap(), 0);
        assert!(!breaker.is_open("creator", date(10)).await);
    }

    #[tokio::test]
    async fn query_errors_follow_failure_policy() {
        let store = Arc::new(MemoryStore::new());
        store.fail_queries(true);

        assert!(!breaker(&store, FailurePolicy::Open).is_open("creator", date(10)).await);
        assert!(breaker(&store, FailurePolicy::Closed).is_open("creator", date(10)).await);
    }
}
