//! Retry policy for database teardown.
//!
//! Attempts are separated by a uniformly random delay so concurrent
//! teardowns against the same server spread out instead of colliding again.

use std::time::Duration;

use jobrig_core::config::TeardownConfig;
use rand::Rng;
use tracing::warn;

/// Bounded retry with random backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownPolicy {
    /// Total attempts including the first one; at least 1.
    pub max_attempts: u32,
    /// Upper bound of the delay between attempts.
    pub max_backoff: Duration,
}

/// The operation kept failing; `last_error` is from the final attempt.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl TeardownPolicy {
    pub fn new(max_attempts: u32, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_backoff,
        }
    }

    pub fn from_config(config: &TeardownConfig) -> Self {
        Self::new(config.max_attempts, config.max_backoff())
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Random delay in `0..=max_backoff`, millisecond granularity.
    pub fn backoff(&self) -> Duration {
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// `op` receives the 1-based attempt number. On success returns the value
    /// and the number of attempts it took.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<(T, u32), RetryExhausted<E>>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    })
                }
                Err(e) => {
                    let delay = self.backoff();
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying: {e}"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for TeardownPolicy {
    fn default() -> Self {
        Self::from_config(&TeardownConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(max_attempts: u32) -> TeardownPolicy {
        TeardownPolicy::new(max_attempts, Duration::ZERO)
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = Vec::new();
        let (value, attempts) = fast(4)
            .run(|attempt| {
                calls.push(attempt);
                if attempt < 3 {
                    Err("locked")
                } else {
                    Ok("dropped")
                }
            })
            .unwrap();

        assert_eq!(value, "dropped");
        assert_eq!(attempts, 3);
        assert_eq!(calls, vec![1, 2, 3]);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let err = fast(3)
            .run(|attempt| -> Result<(), String> {
                calls += 1;
                Err(format!("failure {attempt}"))
            })
            .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "failure 3");
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = fast(0);
        assert_eq!(policy.max_attempts, 1);
        assert!(policy.run(|_| Err::<(), _>("no")).is_err());
        assert_eq!(TeardownPolicy::once().max_attempts, 1);
    }

    #[test]
    fn backoff_stays_within_bounds() {
        let policy = TeardownPolicy::new(3, Duration::from_millis(300));
        for _ in 0..100 {
            assert!(policy.backoff() <= Duration::from_millis(300));
        }
        assert_eq!(fast(3).backoff(), Duration::ZERO);
    }

    #[test]
    fn default_follows_config_defaults() {
        let policy = TeardownPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.max_backoff, Duration::from_millis(300));
    }
}
