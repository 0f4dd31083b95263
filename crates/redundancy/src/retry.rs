//! Fixed-interval, bounded retry.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Retries an operation at a fixed interval, up to a fixed number of attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before every attempt.
    pub interval: Duration,

    /// Maximum number of attempts.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 200,
        }
    }
}

impl RetryPolicy {
    /// Total time spent sleeping when every attempt fails.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Runs `attempt` until it yields `Some`, the attempts run out, or `cancel`
    /// fires. Each attempt is preceded by one interval of sleep and receives its
    /// 1-based attempt number.
    pub async fn retry<T, F, Fut>(&self, cancel: &CancellationToken, mut attempt: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        for number in 1..=self.max_attempts {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(self.interval) => {}
            }

            if let Some(value) = attempt(number).await {
                return Some(value);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(100),
            max_attempts: 5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_success() {
        let start = Instant::now();

        let result = policy()
            .retry(&CancellationToken::new(), |attempt| async move {
                (attempt == 3).then_some(attempt)
            })
            .await;

        assert_eq!(result, Some(3));
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let start = Instant::now();
        let mut attempts = 0;

        let result: Option<()> = policy()
            .retry(&CancellationToken::new(), |_| {
                attempts += 1;
                async { None }
            })
            .await;

        assert_eq!(result, None);
        assert_eq!(attempts, 5);
        assert_eq!(start.elapsed(), policy().budget());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retrying() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut attempts = 0;

        let result: Option<()> = policy()
            .retry(&cancel, |_| {
                attempts += 1;
                async { None }
            })
            .await;

        assert_eq!(result, None);
        assert_eq!(attempts, 0);
    }

    #[test]
    fn test_default_budget_is_twenty_seconds() {
        assert_eq!(RetryPolicy::default().budget(), Duration::from_secs(20));
    }
}
