//! Bounded retry with a fixed delay between attempts
//!
//! The wrapped operation is expected to make as much progress as it can and
//! to stop at the first failure; the next attempt continues from there.
//!
//! The delay between attempts is interruptible. An interrupted delay ends
//! early, but the retry loop keeps going: buffered data should still be
//! persisted if at all possible. Once raised, an [`Interrupt`] stays raised,
//! so every later delay is skipped as well.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Default maximum number of attempts per save.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default delay between two attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(25);

/// A failed attempt, as reported to the failure callback.
#[derive(Debug)]
pub struct FailedAttempt<'a, E> {
    /// 1-based number of the attempt that failed.
    pub attempt: u32,
    /// Error raised by that attempt.
    pub error: &'a E,
    /// Whether another attempt follows.
    pub will_retry: bool,
}

impl<E> FailedAttempt<'_, E> {
    /// Whether this failure deserves a full report.
    ///
    /// The first and the final failure are reported in full; the ones in
    /// between get a compact one-line summary.
    pub fn is_verbose(&self) -> bool {
        self.attempt == 1 || !self.will_retry
    }
}

/// Fixed-delay, bounded-attempt retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between two attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `operation` until it succeeds or the attempts are exhausted.
    ///
    /// `on_failure` is invoked after every failed attempt. On exhaustion the
    /// error of the last attempt is returned.
    pub fn run<T, E, F, C>(&self, interrupt: &Interrupt, mut operation: F, mut on_failure: C) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        C: FnMut(&FailedAttempt<'_, E>),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match operation() {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let will_retry = attempt < self.max_attempts;
            on_failure(&FailedAttempt {
                attempt,
                error: &error,
                will_retry,
            });

            if !will_retry {
                return Err(error);
            }

            if interrupt.sleep(self.delay) {
                tracing::debug!(attempt, "retry delay interrupted, retrying right away");
            }
        }
    }
}

/// Cooperative interruption signal for retry delays.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Interrupt {
    /// Create a signal that is not raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes every sleeper.
    pub fn raise(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    /// Whether the signal has been raised.
    pub fn is_raised(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `duration` unless the signal is (or gets) raised.
    ///
    /// Returns `true` if the sleep was cut short by the signal.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut raised = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*raised {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            raised = cvar
                .wait_timeout(raised, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
