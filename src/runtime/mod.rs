//! Event-loop runtime hosting the application on its own thread.

pub mod app;
pub mod context;
pub mod event_loop;

pub use app::Application;
pub use context::{ExecutionContext, LaunchEnv};
pub use event_loop::{LoopContext, LoopMessage, panic_message, spawn_app_thread};
