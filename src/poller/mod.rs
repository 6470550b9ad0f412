//! Condition poller: block the driver thread until a predicate holds.

pub mod wait;

pub use wait::{DEFAULT_INTERVAL, WaitCondition, WaitOutcome, try_wait_for, wait_for};
