//! The contract an application implements to run under the harness.

use crate::core::errors::Result;
use crate::runtime::context::LaunchEnv;
use crate::runtime::event_loop::LoopContext;
use crate::simulate::input::{InputEvent, WidgetId};

/// An event-loop application driven from a test.
///
/// All methods run on the application's loop thread. The value itself never
/// leaves that thread, so it need not be `Send`.
pub trait Application: Sized + 'static {
    /// Entry point: build the application inside its loop.
    ///
    /// Readiness is signalled separately through [`LaunchEnv::signal_ready`],
    /// possibly later from a deferred task or timer.
    fn launch(cx: &LoopContext<Self>, env: &LaunchEnv) -> Result<Self>;

    /// Deliver one posted event to `target`.
    fn dispatch(&mut self, cx: &LoopContext<Self>, target: &WidgetId, event: &InputEvent)
    -> Result<()>;

    /// Whether the main window is the active window.
    fn is_active_window(&self) -> bool;

    /// Close the main window. The default quits the loop.
    fn close(&mut self, cx: &LoopContext<Self>) -> Result<()> {
        cx.quit();
        Ok(())
    }

    /// Rows currently selected in `view`, if the application reports them.
    fn selected_rows(&self, _view: &WidgetId) -> Option<Vec<usize>> {
        None
    }
}
