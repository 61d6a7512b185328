use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

/// Repeatedly builds and awaits futures from `get_future` until one succeeds or the policy gives up.
///
/// The error of the last attempt is returned when all attempts fail.
pub async fn with_retry<F, Fut, R, Err>(get_future: F, policy: RetryPolicy) -> Result<R, Err>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<R, Err>>,
{
    let mut attempt: u64 = 1;

    loop {
        match get_future().await {
            Ok(result) => return Ok(result),
            Err(err) => match policy.delay_after(attempt) {
                Some(delay) => {
                    debug!(attempt, ?delay, "attempt failed, retrying");
                    sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                None => return Err(err),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    RepeatConstant { sleep: Duration, max_attempts: u64 },
}

impl RetryPolicy {
    pub fn repeat_constant(sleep: Duration, max_attempts: u64) -> Self {
        Self::RepeatConstant {
            sleep,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u64 {
        match self {
            RetryPolicy::RepeatConstant { max_attempts, .. } => *max_attempts,
        }
    }

    /// Returns how long to wait after the given failed attempt, or `None` if there should be no further attempt.
    fn delay_after(&self, failed_attempts: u64) -> Option<Duration> {
        match self {
            RetryPolicy::RepeatConstant {
                sleep,
                max_attempts,
            } if failed_attempts < *max_attempts => Some(*sleep),
            RetryPolicy::RepeatConstant { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let calls = AtomicU64::new(0);

        let result = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(5)
            },
            RetryPolicy::repeat_constant(Duration::from_secs(1), 3),
        )
        .await;

        assert_eq!(result, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_constant_delay() {
        let calls = AtomicU64::new(0);
        let start = Instant::now();

        let result = with_retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("not yet")
                } else {
                    Ok(())
                }
            },
            RetryPolicy::repeat_constant(Duration::from_secs(2), 2),
        )
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_last_error() {
        let calls = AtomicU64::new(0);

        let result: Result<(), u64> = with_retry(
            || async { Err(calls.fetch_add(1, Ordering::SeqCst)) },
            RetryPolicy::repeat_constant(Duration::from_millis(100), 2),
        )
        .await;

        assert_eq!(result, Err(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn single_attempt_policy_never_sleeps() {
        let policy = RetryPolicy::repeat_constant(Duration::from_secs(1), 1);

        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_after(1), None);
    }
}
