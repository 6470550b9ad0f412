//! ALH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, AlhError>;

/// Which side of the harness boundary a failure came from.
///
/// Lets a test report separate "the application under test is broken" from
/// "the harness itself misbehaved".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// The application raised, never became ready, or left stray UI state.
    Application,
    /// Harness mechanics: waits, channels, overrides, state machine misuse.
    Harness,
    /// Configuration files, scratch storage, OS resources.
    Environment,
}

/// Top-level error type for the application-loop harness.
#[derive(Debug, Error)]
pub enum AlhError {
    #[error("[ALH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ALH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ALH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ALH-1101] interpolation failure for [{section}] {key}: {details}")]
    Interpolation {
        section: String,
        key: String,
        details: String,
    },

    #[error("[ALH-2001] timed out waiting for {condition} after {elapsed:?} (timeout {timeout:?})")]
    Timeout {
        condition: String,
        elapsed: Duration,
        timeout: Duration,
    },

    #[error("[ALH-2101] invocation `{operation}` failed on thread {thread}: {message}")]
    InvocationFailed {
        operation: String,
        thread: String,
        message: String,
    },

    #[error("[ALH-2102] application thread unavailable for `{operation}`: {details}")]
    AppThreadGone { operation: String, details: String },

    #[error("[ALH-2103] application state unavailable: {details}")]
    AppState { details: String },

    #[error("[ALH-2201] {target} has no attribute `{attribute}`")]
    NoAttribute { target: String, attribute: String },

    #[error("[ALH-2202] attribute {target}.{attribute} does not hold a {expected}")]
    AttributeType {
        target: String,
        attribute: String,
        expected: &'static str,
    },

    #[error("[ALH-2203] restoring {target}.{attribute} failed: {details}")]
    Restoration {
        target: String,
        attribute: String,
        details: String,
    },

    #[error("[ALH-2204] spent override {target}.{attribute} still installed before `{action}`")]
    StaleOverride {
        target: String,
        attribute: String,
        action: &'static str,
    },

    #[error("[ALH-2301] simulated `{action}` on {target} did not take effect: {details}")]
    Interaction {
        action: &'static str,
        target: String,
        details: String,
    },

    #[error("[ALH-3001] session setup failed during {phase} (worker exited: {worker_exited}): {cause}")]
    SetupFailed {
        phase: &'static str,
        worker_exited: bool,
        #[source]
        cause: Box<AlhError>,
    },

    #[error("[ALH-3002] shutdown invariant violated: {details}")]
    InvariantViolation { details: String },

    #[error("[ALH-3003] illegal session transition {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("[ALH-3004] application handle requested in state {state}")]
    NotReady { state: &'static str },

    #[error("[ALH-3005] worker thread did not exit within {timeout:?}")]
    JoinTimeout { timeout: Duration },

    #[error("[ALH-3006] worker thread panicked: {message}")]
    WorkerPanicked { message: String },

    #[error("[ALH-3901] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ALH-3902] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[ALH-3903] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ALH-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl AlhError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ALH-1001",
            Self::MissingConfig { .. } => "ALH-1002",
            Self::ConfigParse { .. } => "ALH-1003",
            Self::Interpolation { .. } => "ALH-1101",
            Self::Timeout { .. } => "ALH-2001",
            Self::InvocationFailed { .. } => "ALH-2101",
            Self::AppThreadGone { .. } => "ALH-2102",
            Self::AppState { .. } => "ALH-2103",
            Self::NoAttribute { .. } => "ALH-2201",
            Self::AttributeType { .. } => "ALH-2202",
            Self::Restoration { .. } => "ALH-2203",
            Self::StaleOverride { .. } => "ALH-2204",
            Self::Interaction { .. } => "ALH-2301",
            Self::SetupFailed { .. } => "ALH-3001",
            Self::InvariantViolation { .. } => "ALH-3002",
            Self::InvalidTransition { .. } => "ALH-3003",
            Self::NotReady { .. } => "ALH-3004",
            Self::JoinTimeout { .. } => "ALH-3005",
            Self::WorkerPanicked { .. } => "ALH-3006",
            Self::Io { .. } => "ALH-3901",
            Self::ChannelClosed { .. } => "ALH-3902",
            Self::Serialization { .. } => "ALH-3903",
            Self::Runtime { .. } => "ALH-3900",
        }
    }

    /// Which side of the harness boundary produced the failure.
    #[must_use]
    pub fn origin(&self) -> FailureOrigin {
        match self {
            Self::InvocationFailed { .. }
            | Self::AppState { .. }
            | Self::Interaction { .. }
            | Self::InvariantViolation { .. }
            | Self::WorkerPanicked { .. } => FailureOrigin::Application,
            Self::InvalidConfig { .. }
            | Self::MissingConfig { .. }
            | Self::ConfigParse { .. }
            | Self::Interpolation { .. }
            | Self::Io { .. } => FailureOrigin::Environment,
            Self::SetupFailed { cause, .. } => cause.origin(),
            _ => FailureOrigin::Harness,
        }
    }

    /// Whether this is a poller timeout (directly or as a setup cause).
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::SetupFailed { cause, .. } => cause.is_timeout(),
            _ => false,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for AlhError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for AlhError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
