//! Generic timed wait combinator.
//!
//! The predicate is evaluated on the calling thread. Reading application state
//! from inside a predicate goes through the gateway, so each poll is one
//! round-trip onto the loop thread.

#![allow(missing_docs)]

use std::thread;
use std::time::{Duration, Instant};

use crate::core::errors::{AlhError, Result};

/// Poll interval used when none is given.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(20);

/// Shortest sleep between polls; a zero interval would spin.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Timing parameters for a wait. The predicate is supplied per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCondition {
    pub timeout: Duration,
    pub interval: Duration,
}

/// What a successful wait cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    pub elapsed: Duration,
    /// Number of predicate evaluations, including the one that succeeded.
    pub polls: u32,
}

impl WaitCondition {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            interval: DEFAULT_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll `predicate` until it returns `true` or the timeout elapses.
    ///
    /// `description` names the condition in the timeout error.
    pub fn wait<F>(&self, description: &str, mut predicate: F) -> Result<WaitOutcome>
    where
        F: FnMut() -> bool,
    {
        self.try_wait(description, || Ok(predicate()))
    }

    /// Like [`Self::wait`], but a predicate error aborts the wait at once.
    pub fn try_wait<F>(&self, description: &str, mut predicate: F) -> Result<WaitOutcome>
    where
        F: FnMut() -> Result<bool>,
    {
        let interval = self.interval.max(MIN_INTERVAL);
        let start = Instant::now();
        // A timeout past the end of the clock means no deadline at all.
        let deadline = start.checked_add(self.timeout);
        let mut polls: u32 = 0;

        loop {
            polls = polls.saturating_add(1);
            if predicate()? {
                return Ok(WaitOutcome {
                    elapsed: start.elapsed(),
                    polls,
                });
            }

            let now = Instant::now();
            let Some(deadline) = deadline else {
                thread::sleep(interval);
                continue;
            };
            if now >= deadline {
                return Err(AlhError::Timeout {
                    condition: description.to_string(),
                    elapsed: now.duration_since(start),
                    timeout: self.timeout,
                });
            }

            // Sleep never overshoots the deadline, so the final poll lands on it.
            thread::sleep(interval.min(deadline - now));
        }
    }
}

impl Default for WaitCondition {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Wait for `predicate` with explicit timeout and interval.
pub fn wait_for<F>(predicate: F, timeout: Duration, interval: Duration) -> Result<WaitOutcome>
where
    F: FnMut() -> bool,
{
    WaitCondition::new(timeout)
        .with_interval(interval)
        .wait("condition", predicate)
}

/// Fallible counterpart of [`wait_for`].
pub fn try_wait_for<F>(predicate: F, timeout: Duration, interval: Duration) -> Result<WaitOutcome>
where
    F: FnMut() -> Result<bool>,
{
    WaitCondition::new(timeout)
        .with_interval(interval)
        .try_wait("condition", predicate)
}
