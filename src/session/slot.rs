//! Process-wide session slot: at most one live application per process.

#![allow(missing_docs)]

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::errors::{AlhError, Result};

static HELD: Mutex<bool> = Mutex::new(false);
static RELEASED: Condvar = Condvar::new();

/// Ownership of the slot. Released on drop.
#[derive(Debug)]
pub struct SessionSlot {
    _held: (),
}

impl SessionSlot {
    /// Block until the previous session releases the slot, or `timeout` passes.
    pub fn acquire(timeout: Duration) -> Result<Self> {
        let start = Instant::now();
        let deadline = start.checked_add(timeout);
        let mut held = HELD.lock();
        while *held {
            let Some(deadline) = deadline else {
                RELEASED.wait(&mut held);
                continue;
            };
            if RELEASED.wait_until(&mut held, deadline).timed_out() && *held {
                return Err(AlhError::Timeout {
                    condition: "previous session to release the session slot".to_string(),
                    elapsed: start.elapsed(),
                    timeout,
                });
            }
        }
        *held = true;
        Ok(Self { _held: () })
    }

    pub fn is_held() -> bool {
        *HELD.lock()
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        *HELD.lock() = false;
        RELEASED.notify_one();
    }
}
