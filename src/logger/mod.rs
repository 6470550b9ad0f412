//! Session logging: a JSONL event log fed by a non-blocking logger thread.

pub mod events;
pub mod jsonl;

pub use events::{HarnessEvent, LoggerHandle, SessionLoggerConfig, spawn_logger};
