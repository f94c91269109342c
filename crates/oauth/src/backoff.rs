//! Retry with exponential backoff and jitter.

use std::{future::Future, time::Duration};

use {rand::Rng, tracing::debug};

/// Retry schedule for [`retry_with_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `retries + 1` attempts in total.
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after failed attempt number `attempt` (zero based):
    /// `min(max_delay, base_delay * 2^attempt)`.
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.5..1.5);
        self.nominal_delay(attempt).mul_f64(jitter)
    }
}

/// Run `op` until it succeeds or the policy is exhausted, sleeping
/// `nominal_delay(attempt) * U[0.5, 1.5)` between attempts.
///
/// The error of the final attempt is returned unchanged.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries => {
                let delay = policy.jittered_delay(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    use super::*;

    #[test]
    fn nominal_delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.nominal_delay(0), Duration::from_millis(500));
        assert_eq!(policy.nominal_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.nominal_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.nominal_delay(3), Duration::from_millis(2000));
        assert_eq!(policy.nominal_delay(40), Duration::from_millis(2000));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn two_failures_then_success_sleeps_twice() {
        let policy = RetryPolicy::default();
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&calls);
        let result: Result<&str, String> = retry_with_backoff(policy, move |attempt| {
            recorded.lock().unwrap().push(Instant::now());
            async move {
                if attempt < 2 {
                    Err(format!("failure {attempt}"))
                } else {
                    Ok("discovered")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "discovered");
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);

        for (i, pair) in calls.windows(2).enumerate() {
            let waited = pair[1] - pair[0];
            let expected = policy.nominal_delay(i as u32);
            assert!(waited >= expected.mul_f64(0.5), "delay {i} too short: {waited:?}");
            assert!(waited <= expected.mul_f64(1.5), "delay {i} too long: {waited:?}");
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let policy = RetryPolicy {
            retries: 2,
            ..RetryPolicy::default()
        };
        let attempts = Arc::new(Mutex::new(0u32));

        let counter = Arc::clone(&attempts);
        let result: Result<(), String> = retry_with_backoff(policy, move |attempt| {
            *counter.lock().unwrap() += 1;
            async move { Err(format!("failure {attempt}")) }
        })
        .await;

        assert_eq!(result.unwrap_err(), "failure 2");
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn retries_any_operation_and_error_type() {
        let policy = RetryPolicy {
            retries: 1,
            ..RetryPolicy::default()
        };
        let start = Instant::now();
        let result: Result<u16, std::io::Error> = retry_with_backoff(policy, |attempt| async move {
            if attempt == 0 {
                Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
            } else {
                Ok(8669)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 8669);
        let waited = Instant::now() - start;
        assert!(waited >= policy.nominal_delay(0).mul_f64(0.5));
        assert!(waited <= policy.nominal_delay(0).mul_f64(1.5));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn success_on_first_attempt_never_sleeps() {
        let start = Instant::now();
        let result: Result<u8, String> =
            retry_with_backoff(RetryPolicy::default(), |_| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(Instant::now(), start);
    }
}
