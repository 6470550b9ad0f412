//! Session logger: a dedicated thread owning the JSONL writer.
//!
//! Harness components send `HarnessEvent`s through a bounded crossbeam channel.
//! `try_send()` keeps the driver and the application loop from ever blocking on
//! logging back-pressure; overflow is counted and reported on the next write.

#![allow(missing_docs)]

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::LogConfig;
use crate::core::errors::{AlhError, Result};
use crate::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};

// ──────────────────── public event type ────────────────────

/// Events recorded in the session log.
#[derive(Debug, Clone)]
pub enum HarnessEvent {
    SessionStarted {
        config_hash: String,
        sentinel: String,
    },
    StateChanged {
        from: &'static str,
        to: &'static str,
    },
    ReadinessReached {
        elapsed_ms: u64,
        polls: u32,
    },
    WaitTimedOut {
        condition: String,
        elapsed_ms: u64,
    },
    InvocationFailed {
        operation: String,
        thread: String,
        message: String,
    },
    OverrideInstalled {
        target: String,
        attribute: String,
        depth: usize,
    },
    OverrideRestored {
        target: String,
        attribute: String,
        error: Option<String>,
    },
    InvariantViolated {
        details: String,
    },
    SessionStopped {
        state: &'static str,
        duration_ms: u64,
        failures: usize,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

impl HarnessEvent {
    /// Build an `Error` event from a harness error.
    pub fn from_error(err: &AlhError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable handle for sending log events. Non-blocking.
///
/// A disabled handle accepts and discards everything, so components never
/// branch on whether logging is configured.
#[derive(Clone, Default)]
pub struct LoggerHandle {
    tx: Option<Sender<HarnessEvent>>,
    dropped_events: Arc<AtomicU64>,
    verbose: bool,
}

impl LoggerHandle {
    /// A handle that records nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A disabled handle that still mirrors diagnostics to stderr.
    pub fn stderr_only(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Send an event to the logger thread. Drops and counts on a full channel.
    pub fn send(&self, event: HarnessEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(TrySendError::Full(_)) = tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Print a tagged stderr diagnostic when verbose output is on.
    pub fn note(&self, tag: &str, message: impl Display) {
        if self.verbose {
            eprintln!("[{tag}] {message}");
        }
    }

    /// Request graceful shutdown. Blocks only if the channel is full.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(HarnessEvent::Shutdown);
        }
    }
}

// ──────────────────── configuration ────────────────────

/// Options for the session logger thread.
#[derive(Debug, Clone)]
pub struct SessionLoggerConfig {
    pub jsonl_path: PathBuf,
    pub channel_capacity: usize,
    /// Stamped on every line.
    pub session_id: String,
    pub verbose: bool,
}

impl SessionLoggerConfig {
    pub fn from_log_config(log: &LogConfig, session_id: impl Into<String>) -> Self {
        Self {
            jsonl_path: log.jsonl_path.clone(),
            channel_capacity: log.channel_capacity,
            session_id: session_id.into(),
            verbose: log.verbose,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle.
///
/// The thread runs until `handle.shutdown()` is called or all senders drop.
pub fn spawn_logger(config: SessionLoggerConfig) -> Result<(LoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<HarnessEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = LoggerHandle {
        tx: Some(tx),
        dropped_events: dropped,
        verbose: config.verbose,
    };

    let join = thread::Builder::new()
        .name("alh-logger".to_string())
        .spawn(move || {
            logger_thread_main(rx, config.jsonl_path, config.session_id, dropped_clone);
        })
        .map_err(|e| AlhError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(
    rx: Receiver<HarnessEvent>,
    path: PathBuf,
    session_id: String,
    dropped: Arc<AtomicU64>,
) {
    let mut jsonl = JsonlWriter::open(path);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.session = Some(session_id.clone());
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, HarnessEvent::Shutdown) {
            break;
        }

        let mut entry = event_to_log_entry(&event);
        entry.session = Some(session_id.clone());
        jsonl.write_entry(&entry);
    }

    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &HarnessEvent) -> LogEntry {
    match event {
        HarnessEvent::SessionStarted {
            config_hash,
            sentinel,
        } => {
            let mut e = LogEntry::new(EventType::SessionStart, Severity::Info);
            e.details = Some(format!(
                "version={} config_hash={config_hash} sentinel={sentinel}",
                env!("CARGO_PKG_VERSION")
            ));
            e.ok = Some(true);
            e
        }
        HarnessEvent::StateChanged { from, to } => {
            let mut e = LogEntry::new(EventType::StateChange, Severity::Info);
            e.state = Some(format!("{from}->{to}"));
            e
        }
        HarnessEvent::ReadinessReached { elapsed_ms, polls } => {
            let mut e = LogEntry::new(EventType::Readiness, Severity::Info);
            e.duration_ms = Some(*elapsed_ms);
            e.details = Some(format!("polls={polls}"));
            e.ok = Some(true);
            e
        }
        HarnessEvent::WaitTimedOut {
            condition,
            elapsed_ms,
        } => {
            let mut e = LogEntry::new(EventType::WaitTimeout, Severity::Warning);
            e.operation = Some(condition.clone());
            e.duration_ms = Some(*elapsed_ms);
            e.ok = Some(false);
            e
        }
        HarnessEvent::InvocationFailed {
            operation,
            thread,
            message,
        } => {
            let mut e = LogEntry::new(EventType::InvocationFailure, Severity::Warning);
            e.operation = Some(operation.clone());
            e.details = Some(format!("thread={thread}"));
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        HarnessEvent::OverrideInstalled {
            target,
            attribute,
            depth,
        } => {
            let mut e = LogEntry::new(EventType::OverrideInstall, Severity::Info);
            e.target = Some(target.clone());
            e.attribute = Some(attribute.clone());
            e.details = Some(format!("depth={depth}"));
            e
        }
        HarnessEvent::OverrideRestored {
            target,
            attribute,
            error,
        } => {
            let severity = if error.is_some() {
                Severity::Critical
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::OverrideRestore, severity);
            e.target = Some(target.clone());
            e.attribute = Some(attribute.clone());
            e.ok = Some(error.is_none());
            e.error_message.clone_from(error);
            e
        }
        HarnessEvent::InvariantViolated { details } => {
            let mut e = LogEntry::new(EventType::InvariantViolation, Severity::Critical);
            e.error_code = Some("ALH-3002".to_string());
            e.details = Some(details.clone());
            e.ok = Some(false);
            e
        }
        HarnessEvent::SessionStopped {
            state,
            duration_ms,
            failures,
        } => {
            let mut e = LogEntry::new(EventType::SessionStop, Severity::Info);
            e.state = Some((*state).to_string());
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!("teardown_failures={failures}"));
            e.ok = Some(*failures == 0);
            e
        }
        HarnessEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        HarnessEvent::Shutdown => {
            // Handled by the thread loop before conversion.
            LogEntry::new(EventType::SessionStop, Severity::Info)
        }
    }
}
