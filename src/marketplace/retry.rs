use super::error::{CallError, CallFailure};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Bounded retry budget for one outbound call. Rate-limited responses get the
/// larger ceiling; transient server/transport failures get the smaller one;
/// validation rejections are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub rate_limit_attempts: u32,
    pub transient_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_attempts: 5,
            transient_attempts: 3,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rate_limit_attempts: env_u32("RETRY_RATE_LIMIT_ATTEMPTS")
                .unwrap_or(defaults.rate_limit_attempts),
            transient_attempts: env_u32("RETRY_TRANSIENT_ATTEMPTS")
                .unwrap_or(defaults.transient_attempts),
            base_delay: env_u32("RETRY_BASE_DELAY_MS")
                .map(|ms| Duration::from_millis(ms as u64))
                .unwrap_or(defaults.base_delay),
            max_delay: env_u32("RETRY_MAX_DELAY_MS")
                .map(|ms| Duration::from_millis(ms as u64))
                .unwrap_or(defaults.max_delay),
        }
    }

    fn ceiling(&self, error: &CallError) -> u32 {
        match error {
            CallError::RateLimited { .. } => self.rate_limit_attempts.max(1),
            _ => self.transient_attempts.max(1),
        }
    }

    /// Exponential delay with proportional jitter. The jitter stays below half
    /// of the current step, so consecutive delays never decrease until the cap
    /// flattens them.
    fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let step_ms = base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(20));
        let jitter_ms = if step_ms >= 2 {
            rand::rng().random_range(0..step_ms / 2)
        } else {
            0
        };
        Duration::from_millis(step_ms + jitter_ms).min(self.max_delay)
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok()?.parse::<u32>().ok().filter(|v| *v > 0)
}

/// A successful call plus how many attempts it took, for observability.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Drive one outbound call to completion under `policy`. A `Retry-After` hint
/// from the platform overrides the computed backoff for that wait.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<Attempted<T>, CallFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) => {
                if !error.is_retryable() || attempt >= policy.ceiling(&error) {
                    return Err(CallFailure { error, attempts: attempt });
                }
                let wait = match &error {
                    CallError::RateLimited {
                        retry_after: Some(secs),
                        ..
                    } => Duration::from_secs(*secs).min(policy.max_delay),
                    _ => policy.backoff(attempt),
                };
                warn!(
                    target = "crosslist.marketplace",
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %error,
                    "retrying outbound call"
                );
                crate::metrics::retry_wait(attempt, wait.as_millis());
                sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            rate_limit_attempts: 5,
            transient_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    fn rate_limited() -> CallError {
        CallError::RateLimited {
            retry_after: None,
            detail: "too many requests".into(),
        }
    }

    #[tokio::test]
    async fn two_rate_limits_then_success_dispatches_three_calls() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = call_with_retry(&quick_policy(), move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(rate_limited()) } else { Ok(n) }
            }
        })
        .await
        .expect("should succeed on third attempt");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.value, 3);
    }

    #[tokio::test]
    async fn rate_limit_ceiling_bounds_dispatched_calls() {
        let policy = quick_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let failure = call_with_retry(&policy, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(rate_limited())
            }
        })
        .await
        .expect_err("all attempts rate limited");

        assert_eq!(calls.load(Ordering::SeqCst), policy.rate_limit_attempts);
        assert_eq!(failure.attempts, policy.rate_limit_attempts);
        assert!(matches!(failure.error, CallError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn validation_rejection_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let failure = call_with_retry(&quick_policy(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CallError::Validation {
                    status: 400,
                    detail: "bad payload".into(),
                })
            }
        })
        .await
        .expect_err("validation fails immediately");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempts, 1);
    }

    #[tokio::test]
    async fn transient_errors_use_smaller_ceiling() {
        let policy = quick_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let failure = call_with_retry(&policy, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CallError::Transient {
                    status: 503,
                    detail: "unavailable".into(),
                })
            }
        })
        .await
        .expect_err("all attempts transient");

        assert_eq!(calls.load(Ordering::SeqCst), policy.transient_attempts);
        assert_eq!(failure.attempts, policy.transient_attempts);
    }

    #[test]
    fn backoff_never_decreases_before_cap() {
        let policy = RetryPolicy {
            rate_limit_attempts: 8,
            transient_attempts: 3,
            base_delay: Duration::from_millis(4),
            max_delay: Duration::from_secs(3600),
        };
        for _ in 0..32 {
            let mut previous = Duration::ZERO;
            for attempt in 1..=8 {
                let delay = policy.backoff(attempt);
                assert!(delay >= previous, "delay shrank at attempt {attempt}");
                previous = delay;
            }
        }
    }
}
