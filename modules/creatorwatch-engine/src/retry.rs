use std::future::Future;
use std::time::Duration;

/// Exponential backoff without jitter.
///
/// `max_attempts` counts every call to the operation, the first one included.
/// The wait after failed attempt `n` (0-based) is `min(initial_delay * base^n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub base: u32,
}

impl RetryPolicy {
    /// Provider HTTP calls: 4 attempts, 2s doubling up to 30s.
    pub fn network() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            base: 2,
        }
    }

    /// Store writes: 4 attempts, 1s doubling up to 5s.
    pub fn database() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            base: 2,
        }
    }

    /// Email sends: `max_retries` retries after the first attempt, 2s doubling up to 10s.
    pub fn email(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            base: 2,
        }
    }

    /// Same attempt budget, no waiting.
    pub fn without_delay(self) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..self
        }
    }

    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let factor = self.base.saturating_pow(failed_attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Retry every error until the attempt budget runs out.
    pub async fn execute<T, E, F, Fut, R>(&self, operation: F, on_retry: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E, u32),
    {
        self.execute_when(operation, |_| true, on_retry).await
    }

    /// Like `execute`, but stops at the first error `is_retryable` rejects.
    pub async fn execute_when<T, E, F, Fut, P, R>(
        &self,
        mut operation: F,
        is_retryable: P,
        mut on_retry: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        R: FnMut(&E, u32),
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt + 1 >= attempts || !is_retryable(&e) {
                        return Err(e);
                    }
                    on_retry(&e, attempt + 1);
                    let delay = self.delay_for(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_schedule_doubles_then_caps() {
        let policy = RetryPolicy::network();
        let delays: Vec<u64> = (0..6).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn database_preset_caps_at_five_seconds() {
        let policy = RetryPolicy::database();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
    }

    #[test]
    fn email_preset_counts_first_attempt() {
        assert_eq!(RetryPolicy::email(3).max_attempts, 4);
        assert_eq!(RetryPolicy::email(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn returns_last_error_after_budget_is_spent() {
        let policy = RetryPolicy::network().without_delay();
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let result: Result<(), String> = policy
            .execute(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("boom {n}"))
                },
                |e, attempt| retries.push((e.clone(), attempt)),
            )
            .await;

        assert_eq!(result, Err("boom 4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            retries,
            vec![
                ("boom 1".to_string(), 1),
                ("boom 2".to_string(), 2),
                ("boom 3".to_string(), 3)
            ]
        );
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::database().without_delay();
        let calls = AtomicU32::new(0);

        let result: Result<u32, &str> = policy
            .execute(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(n)
                    }
                },
                |_, _| {},
            )
            .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::email(3).without_delay();
        let calls = AtomicU32::new(0);
        let mut retried = false;

        let result: Result<(), u16> = policy
            .execute_when(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(400)
                },
                |status| *status >= 500,
                |_, _| retried = true,
            )
            .await;

        assert_eq!(result, Err(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!retried);
    }
}
