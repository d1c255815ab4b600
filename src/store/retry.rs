use std::{future::Future, time::Duration};

use tokio::time::Instant;

use super::StoreError;
use crate::observability::log_warn;

/// Randomized exponential backoff bounded by a total retry duration.
///
/// The wait before attempt `n` is drawn uniformly from
/// `[0, min(max_backoff, multiplier * 2^n)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base wait that doubles on every attempt.
    pub multiplier: Duration,
    /// Upper bound on any single wait.
    pub max_backoff: Duration,
    /// Give up once this much time has elapsed since the first attempt.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            multiplier: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(30 * 60),
        }
    }
}

impl RetryPolicy {
    /// Build a policy.
    pub fn new(multiplier: Duration, max_backoff: Duration, max_elapsed: Duration) -> Self {
        Self {
            multiplier,
            max_backoff,
            max_elapsed,
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .multiplier
            .saturating_mul(2u32.saturating_pow(attempt.min(31)));
        let cap = exp.min(self.max_backoff);
        cap.mul_f64(fastrand::f64())
    }
}

/// Run `op`, retrying [`StoreError::Retryable`] failures under `policy`.
///
/// Non-retryable errors surface immediately. Once the next wait would exceed
/// `max_elapsed`, the last retryable error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                let wait = policy.backoff(attempt);
                if started.elapsed() + wait >= policy.max_elapsed {
                    return Err(err);
                }
                log_warn!(
                    component = "store",
                    event = "retrying_store_op",
                    op = op_name,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                );
                tokio::time::sleep(wait).await;
                attempt = attempt.saturating_add(1);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::{with_retry, RetryPolicy};
    use crate::store::StoreError;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn retries_retryable_until_success() {
        let calls = AtomicUsize::new(0);
        let value = with_retry(&fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Retryable {
                        url: "mem://b/k".into(),
                        message: "throttled".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .expect("eventually succeeds");
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_surfaces_immediately() {
        let calls = AtomicUsize::new(0);
        let err = with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(StoreError::NonRetryable {
                    url: "mem://b/k".into(),
                    message: "denied".into(),
                })
            }
        })
        .await
        .expect_err("fails");
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_elapsed() {
        let err = with_retry(&RetryPolicy::none(), "test", || async {
            Err::<(), _>(StoreError::Retryable {
                url: "mem://b/k".into(),
                message: "timeout".into(),
            })
        })
        .await
        .expect_err("bounded");
        assert!(err.is_retryable());
    }
}
