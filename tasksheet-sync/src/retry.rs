//! Explicit retry policy applied around every sheet operation.

use std::time::Duration;

use crate::error::SheetError;

/// Bounded exponential backoff.
///
/// Attempt `n` (1-based) that fails with a retryable error waits
/// `clamp(multiplier * 2^(n-1), min_delay, max_delay)` before attempt `n+1`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub retryable: fn(&SheetError) -> bool,
}

impl RetryPolicy {
    /// Connection establishment: up to 5 attempts.
    pub fn connect() -> Self {
        Self {
            max_attempts: 5,
            multiplier: Duration::from_secs(1),
            min_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            retryable: SheetError::is_retryable,
        }
    }

    /// Per-operation calls: up to 3 attempts.
    pub fn operation() -> Self {
        Self {
            max_attempts: 3,
            multiplier: Duration::from_secs(1),
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            retryable: SheetError::is_retryable,
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            multiplier: Duration::ZERO,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            retryable: SheetError::is_retryable,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self.multiplier.saturating_mul(1u32 << exponent);
        raw.clamp(self.min_delay, self.max_delay.max(self.min_delay))
    }
}

/// Run `call` until it succeeds, fails permanently, or attempts run out.
///
/// `call` receives the 1-based attempt number.
pub fn run<T, F>(policy: &RetryPolicy, op: &'static str, mut call: F) -> Result<T, SheetError>
where
    F: FnMut(u32) -> Result<T, SheetError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if (policy.retryable)(&err) && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    op,
                    attempt,
                    max_attempts,
                    code = err.code(),
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "sheet call failed; retrying",
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::error!(op, attempt, code = err.code(), error = %err, "sheet call gave up");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> SheetError {
        SheetError::Connection("reset by peer".to_string())
    }

    #[test]
    fn backoff_is_clamped() {
        let policy = RetryPolicy::connect();
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = run(&RetryPolicy::immediate(3), "test", |_| {
            calls += 1;
            if calls < 3 {
                Err(connection())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn exhaustion_propagates_last_error() {
        let mut calls = 0;
        let result: Result<(), _> = run(&RetryPolicy::immediate(5), "test", |_| {
            calls += 1;
            Err(connection())
        });
        assert_eq!(calls, 5);
        assert_eq!(result, Err(connection()));
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = run(&RetryPolicy::immediate(3), "test", |_| {
            calls += 1;
            Err(SheetError::Api {
                status: 400,
                message: "bad range".to_string(),
            })
        });
        assert_eq!(calls, 1);
        assert!(result.is_err());
    }

    #[test]
    fn custom_predicate_controls_retries() {
        let mut policy = RetryPolicy::immediate(4);
        policy.retryable = |_| false;
        let mut calls = 0;
        let _: Result<(), _> = run(&policy, "test", |_| {
            calls += 1;
            Err(connection())
        });
        assert_eq!(calls, 1);
    }
}
