//! Minimum-spacing rate limiter for outbound sheet calls.
//!
//! A `governor` GCRA quota with a period of `min_interval` and a burst of one.
//! Callers that arrive too early sleep until eligible; nothing is rejected.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

pub struct RateLimiter {
    min_interval: Duration,
    /// `None` when spacing is disabled (zero interval).
    inner: Option<DirectLimiter>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .field("enabled", &self.inner.is_some())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        let inner = Quota::with_period(min_interval)
            .map(|quota| GovernorLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            min_interval,
            inner,
        }
    }

    /// Block until the quota admits one more call. Returns how long the
    /// caller slept.
    pub fn acquire(&self) -> Duration {
        let Some(limiter) = &self.inner else {
            return Duration::ZERO;
        };
        let clock = DefaultClock::default();
        let mut waited = Duration::ZERO;
        while let Err(not_until) = limiter.check() {
            let wait = not_until.wait_time_from(clock.now());
            tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limiter sleeping");
            std::thread::sleep(wait);
            waited += wait;
        }
        waited
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn first_call_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        assert_eq!(limiter.acquire(), Duration::ZERO);
    }

    #[test]
    fn back_to_back_calls_are_spaced() {
        let spacing = Duration::from_millis(40);
        let limiter = RateLimiter::new(spacing);
        limiter.acquire();
        let first = Instant::now();
        assert!(limiter.acquire() > Duration::ZERO);
        assert!(
            first.elapsed() >= spacing - Duration::from_millis(1),
            "second call came after only {:?}",
            first.elapsed()
        );
    }

    #[test]
    fn burst_is_limited_to_one_call() {
        let limiter = RateLimiter::new(Duration::from_millis(30));
        limiter.acquire();
        let started = Instant::now();
        limiter.acquire();
        limiter.acquire();
        assert!(started.elapsed() >= Duration::from_millis(58));
    }

    #[test]
    fn zero_interval_never_sleeps() {
        let limiter = RateLimiter::new(Duration::ZERO);
        limiter.acquire();
        assert_eq!(limiter.acquire(), Duration::ZERO);
    }
}
