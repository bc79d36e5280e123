//! Exponential backoff around flaky network operations.
//!
//! After failed attempt `n` (1-indexed) the caller waits
//! `base_delay * 2^n + jitter`, where jitter is uniform in `[0, base_delay)`.
//! Sleeping goes through [`Sleeper`] so tests can record delays instead of
//! blocking.

use crate::error::{DevxError, Result};
use rand::Rng;
use std::cell::RefCell;
use std::fmt::Display;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Sleeper
// ---------------------------------------------------------------------------

pub trait Sleeper {
    fn sleep(&self, delay: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Records requested delays without sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        self.delays.borrow_mut().push(delay);
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total number of invocations before giving up.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-indexed) for a jitter factor in `[0, 1)`.
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(self.base_delay.mul_f64(jitter.clamp(0.0, 1.0)))
    }

    /// Invoke `op` until it succeeds or `max_retries` invocations have failed.
    ///
    /// `what` names the operation in log lines and in the terminal error.
    pub fn run<T, E, F>(&self, what: &str, sleeper: &dyn Sleeper, mut op: F) -> Result<T>
    where
        E: Display,
        F: FnMut() -> std::result::Result<T, E>,
    {
        let attempts = self.max_retries.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last = e.to_string();
                    let delay = self.delay_for(attempt, rand::thread_rng().gen::<f64>());
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %last,
                        "attempt failed, backing off"
                    );
                    sleeper.sleep(delay);
                }
            }
        }
        Err(DevxError::MaxRetriesExceeded {
            attempts,
            last: format!("{what}: {last}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
