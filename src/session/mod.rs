//! Lifecycle controller: one application per session, one session per process.

pub mod handle;
#[allow(clippy::module_inception)]
pub mod session;
pub mod slot;
pub mod state;

pub use handle::AppHandle;
pub use session::{JoinOutcome, SessionBuilder, TeardownReport, TestSession};
pub use slot::SessionSlot;
pub use state::SessionState;
