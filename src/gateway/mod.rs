//! Cross-thread invocation gateway into the application's loop.

pub mod handle;
pub mod invocation;

pub use handle::Gateway;
pub use invocation::{InvocationError, InvocationFailure, PendingInvocation};
