use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Decision returned by the error classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abort,
}

/// Exponential backoff policy with jitter, used for idempotent GET requests.
///
/// Jitter spreads out retries so a burst of page fetches hitting the same
/// transient failure does not stampede the API in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (0-indexed): `min(base * 2^n, max)` plus
    /// up to one `base_delay` of random jitter.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp.min(self.max_delay.as_millis() as u64);
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..base)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}

/// Run `operation` until it succeeds, the classifier aborts, or attempts run
/// out. Returns the first `Ok` value or the last error.
pub async fn with_retries<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    classify: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryDecision,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err: Option<E> = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if classify(&e) == RetryDecision::Abort {
                    return Err(e);
                }
                if attempt + 1 >= attempts {
                    last_err = Some(e);
                    break;
                }
                let delay = policy.delay(attempt);
                tracing::warn!(
                    "Retryable error (attempt {}/{}), retrying in {}ms: {}",
                    attempt + 1,
                    attempts,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    // The loop body runs at least once, so last_err is always set here.
    match last_err {
        Some(e) => Err(e),
        None => unreachable!("retry loop exited without an error"),
    }
}
