//! Bounded exponential backoff for broker and feed calls.

use std::fmt::Display;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(2u32.pow(exp))
    }

    /// Run `op` until it succeeds or the retry budget is spent, calling
    /// `sleep` between attempts. Returns the last error on exhaustion.
    pub fn run_with<T, E, F, S>(&self, what: &str, op: F, sleep: S) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        S: FnMut(Duration),
    {
        self.run_filtered(what, op, |_| true, sleep)
    }

    /// Like [`run_with`](Self::run_with), but an error for which
    /// `retryable` is false is returned at once.
    pub fn run_filtered<T, E, F, R, S>(&self, what: &str, mut op: F, retryable: R, mut sleep: S) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
        S: FnMut(Duration),
    {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && retryable(&e) => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    tracing::warn!(call = what, attempt, ?delay, error = %e, "call failed, retrying");
                    sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn run<T, E, F>(&self, what: &str, op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        self.run_with(what, op, std::thread::sleep)
    }
}
