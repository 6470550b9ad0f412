//! Session lifecycle states and the legal transitions between them.

#![allow(missing_docs)]

use std::fmt;

use serde::Serialize;

use crate::core::errors::{AlhError, Result};
use crate::logger::{HarnessEvent, LoggerHandle};

/// Where a test session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Starting,
    Ready,
    Running,
    TearingDown,
    Stopped,
    Failed,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::TearingDown => "tearing_down",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether a live handle may be used in this state.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    /// `Failed` is reachable from every non-terminal state. A session whose
    /// handle was never taken may go straight from `Ready` to teardown.
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Self::Failed)
                | (Self::NotStarted, Self::Starting)
                | (Self::Starting, Self::Ready)
                | (Self::Ready, Self::Running | Self::TearingDown)
                | (Self::Running, Self::TearingDown)
                | (Self::TearingDown, Self::Stopped)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus the logger every transition is reported to.
#[derive(Clone)]
pub(crate) struct Lifecycle {
    state: SessionState,
    logger: LoggerHandle,
}

impl Lifecycle {
    pub(crate) fn new(logger: LoggerHandle) -> Self {
        Self {
            state: SessionState::NotStarted,
            logger,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: SessionState) -> Result<()> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(AlhError::InvalidTransition {
                from: from.as_str(),
                to: next.as_str(),
            });
        }
        self.logger.send(HarnessEvent::StateChanged {
            from: from.as_str(),
            to: next.as_str(),
        });
        self.logger.note("ALH-SESSION", format!("{from} -> {next}"));
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    pub(crate) fn fail(&mut self) {
        if !self.state.is_terminal() {
            let _ = self.advance(SessionState::Failed);
        }
    }
}
