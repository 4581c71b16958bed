//! Clocks, retry policy and rate limiting for external calls.
//!
//! Everything that waits (retry backoff, RPC rate limiting) goes through the
//! [`Clock`] trait so tests can drive it with [`FakeClock`] instead of
//! sleeping.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Nanoseconds on a monotonic timeline. Only differences are meaningful.
pub type Nanos = i64;

/// Monotonic time source that can also block.
pub trait Clock: Send + Sync {
    fn now(&self) -> Nanos;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `Instant` and `thread::sleep`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Nanos {
        self.origin.elapsed().as_nanos() as Nanos
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock: `sleep` advances time instantly and is recorded.
#[derive(Debug, Default)]
pub struct FakeClock {
    current: Mutex<Nanos>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new(start: Nanos) -> Self {
        Self {
            current: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Advance time without recording a sleep.
    pub fn advance_by(&self, delta: Duration) {
        *self.current.lock() += delta.as_nanos() as Nanos;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Nanos {
        *self.current.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        *self.current.lock() += duration.as_nanos() as Nanos;
    }
}

impl fmt::Display for FakeClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let now = self.now();
        write!(f, "{}.{:09}s", now / 1_000_000_000, now % 1_000_000_000)
    }
}

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Fixed-backoff retry. `max_attempts` includes the first try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds or attempts run out; returns the last error.
    pub fn run<T, E, F>(&self, clock: &dyn Clock, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    debug!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label, attempt, self.max_attempts, e, self.backoff
                    );
                    clock.sleep(self.backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250))
    }
}

// =============================================================================
// RATE LIMITER
// =============================================================================

/// Enforces a minimum interval between successive permits.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    last_permit: Mutex<Option<Nanos>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, min_interval: Duration) -> Self {
        Self {
            clock,
            min_interval,
            last_permit: Mutex::new(None),
        }
    }

    /// Block (via the clock) until the next call is allowed.
    pub fn acquire(&self) {
        let mut last = self.last_permit.lock();
        if let Some(prev) = *last {
            let elapsed = self.clock.now() - prev;
            let min = self.min_interval.as_nanos() as Nanos;
            if elapsed < min {
                self.clock.sleep(Duration::from_nanos((min - elapsed) as u64));
            }
        }
        *last = Some(self.clock.now());
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_succeeds_after_failures() {
        let clock = FakeClock::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let mut calls = 0;

        let result: Result<u32, String> = policy.run(&clock, "op", || {
            calls += 1;
            if calls < 3 {
                Err("boom".to_string())
            } else {
                Ok(7)
            }
        });

        assert_eq!(result, Ok(7));
        assert_eq!(calls, 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(100); 2]);
    }

    #[test]
    fn test_retry_gives_up() {
        let clock = FakeClock::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(50));
        let result: Result<(), String> = policy.run(&clock, "op", || Err("down".to_string()));

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(clock.sleeps().len(), 1);
    }

    #[test]
    fn test_no_retry_never_sleeps() {
        let clock = FakeClock::new(0);
        let result: Result<(), &str> = RetryPolicy::no_retry().run(&clock, "op", || Err("x"));
        assert!(result.is_err());
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_rate_limiter_spaces_calls() {
        let clock = Arc::new(FakeClock::new(0));
        let limiter = RateLimiter::new(clock.clone(), Duration::from_millis(100));

        limiter.acquire();
        limiter.acquire();
        limiter.acquire();

        assert_eq!(clock.total_slept(), Duration::from_millis(200));
    }

    #[test]
    fn test_rate_limiter_no_wait_when_idle_long_enough() {
        let clock = Arc::new(FakeClock::new(0));
        let limiter = RateLimiter::new(clock.clone(), Duration::from_millis(100));

        limiter.acquire();
        clock.advance_by(Duration::from_millis(250));
        limiter.acquire();

        assert!(clock.sleeps().is_empty());
    }
}
