//! Convenience re-exports for test code.
//!
//! ```rust,no_run
//! use apploop_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::HarnessConfig;
pub use crate::core::errors::{AlhError, FailureOrigin, Result};

// Poller
pub use crate::poller::{WaitCondition, WaitOutcome, try_wait_for, wait_for};

// Monkeypatching
pub use crate::patch::{
    AttributeTable, CallRecorder, OverrideGuard, PatchRegistry, PatchTarget, patch_value,
};

// Runtime and gateway
pub use crate::gateway::Gateway;
pub use crate::runtime::{Application, ExecutionContext, LaunchEnv, LoopContext};

// Interaction
pub use crate::simulate::{
    ConfirmRequest, Confirmer, DialogExpectation, Dialogs, FileChooser, FileDialogRequest,
    InputEvent, Key, KeyAction, Modifiers, MouseButton, Simulator, WidgetId,
};

// Environment
pub use crate::env::{MockConfig, Provisioner, ScratchEnvironment};

// Sessions
pub use crate::session::{AppHandle, SessionBuilder, SessionState, TeardownReport, TestSession};
