//! Interaction simulator: synthetic input and scripted dialog answers.
//!
//! Every action is posted into the application's event queue through the
//! gateway. With flushing on (the default) the posted events for the target
//! are dispatched before the action returns, so the driver observes their
//! effects without waiting for a loop iteration.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::errors::{AlhError, Result};
use crate::gateway::Gateway;
use crate::patch::recorder::CallRecorder;
use crate::patch::registry::{OverrideGuard, PatchRegistry};
use crate::patch::target::PatchTarget;
use crate::runtime::app::Application;
use crate::simulate::dialogs::{
    ConfirmRequest, Confirmer, Dialogs, FileChooser, FileDialogRequest, OPEN_FILE_NAMES, QUESTION,
};
use crate::simulate::input::{InputEvent, Key, KeyAction, Modifiers, MouseButton, WidgetId};

/// State shared between a dialog expectation and its installed stand-in.
#[derive(Debug)]
struct ExpectationState {
    attribute: &'static str,
    live: AtomicBool,
    spent: AtomicBool,
}

impl ExpectationState {
    fn new(attribute: &'static str) -> Arc<Self> {
        Arc::new(Self {
            attribute,
            live: AtomicBool::new(true),
            spent: AtomicBool::new(false),
        })
    }

    fn is_stale(&self) -> bool {
        self.live.load(Ordering::SeqCst) && self.spent.load(Ordering::SeqCst)
    }
}

/// A scripted dialog answer installed over the application's dialog table.
///
/// The answer is given once; later calls get the cancel answer and still
/// appear in [`Self::calls`]. Dropping the expectation restores the dialog.
#[must_use = "dropping the expectation removes the scripted answer immediately"]
pub struct DialogExpectation<Req> {
    guard: Option<OverrideGuard>,
    state: Arc<ExpectationState>,
    calls: CallRecorder<Req>,
}

impl<Req: Clone + std::fmt::Debug> DialogExpectation<Req> {
    /// Requests the stand-in received, in call order.
    pub fn calls(&self) -> Vec<Req> {
        self.calls.calls()
    }

    pub fn call_count(&self) -> usize {
        self.calls.call_count()
    }

    /// Whether the scripted answer has been handed out.
    pub fn is_spent(&self) -> bool {
        self.state.spent.load(Ordering::SeqCst)
    }

    pub fn recorder(&self) -> &CallRecorder<Req> {
        &self.calls
    }

    #[track_caller]
    pub fn assert_not_called(&self) {
        self.calls.assert_not_called();
    }

    #[track_caller]
    pub fn assert_called_once(&self) -> Req {
        self.calls.assert_called_once()
    }

    /// Restore the real dialog, surfacing any restoration failure.
    pub fn finish(mut self) -> Result<Vec<Req>> {
        self.state.live.store(false, Ordering::SeqCst);
        if let Some(guard) = self.guard.take() {
            guard.restore()?;
        }
        Ok(self.calls.calls())
    }
}

impl<Req> Drop for DialogExpectation<Req> {
    fn drop(&mut self) {
        self.state.live.store(false, Ordering::SeqCst);
    }
}

/// Drives the application the way a user would.
pub struct Simulator<A> {
    gateway: Gateway<A>,
    registry: PatchRegistry,
    dialogs: Arc<Dialogs>,
    flush: bool,
    expectations: Arc<Mutex<Vec<Weak<ExpectationState>>>>,
}

impl<A> Clone for Simulator<A> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            registry: self.registry.clone(),
            dialogs: Arc::clone(&self.dialogs),
            flush: self.flush,
            expectations: Arc::clone(&self.expectations),
        }
    }
}

impl<A: Application> Simulator<A> {
    pub fn new(gateway: Gateway<A>, registry: PatchRegistry, dialogs: Arc<Dialogs>) -> Self {
        Self {
            gateway,
            registry,
            dialogs,
            flush: true,
            expectations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Leave posted events for the loop to deliver on its own schedule.
    #[must_use]
    pub fn without_flush(mut self) -> Self {
        self.flush = false;
        self
    }

    pub fn gateway(&self) -> &Gateway<A> {
        &self.gateway
    }

    pub fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    // ──────────────────── input ────────────────────

    /// Press and release `key` on `target`.
    pub fn post_key_event(
        &self,
        target: impl Into<WidgetId>,
        key: Key,
        modifiers: Modifiers,
    ) -> Result<()> {
        let events = [KeyAction::Press, KeyAction::Release].map(|action| InputEvent::Key {
            action,
            key,
            modifiers,
        });
        self.post("key event", target.into(), events.into())
    }

    /// Type `text` into `target`, one key press per character.
    pub fn type_text(&self, target: impl Into<WidgetId>, text: &str) -> Result<()> {
        let events: Vec<InputEvent> = text
            .chars()
            .flat_map(|c| {
                [KeyAction::Press, KeyAction::Release].map(move |action| InputEvent::Key {
                    action,
                    key: Key::Char(c),
                    modifiers: Modifiers::NONE,
                })
            })
            .collect();
        self.post("typing", target.into(), events)
    }

    /// Left click with no modifiers.
    pub fn post_mouse_click(&self, target: impl Into<WidgetId>) -> Result<()> {
        self.post_mouse_click_with(target, MouseButton::Left, Modifiers::NONE)
    }

    pub fn post_mouse_click_with(
        &self,
        target: impl Into<WidgetId>,
        button: MouseButton,
        modifiers: Modifiers,
    ) -> Result<()> {
        self.post(
            "mouse click",
            target.into(),
            vec![InputEvent::Click { button, modifiers }],
        )
    }

    /// Give keyboard focus to `target`.
    pub fn set_focus(&self, target: impl Into<WidgetId>) -> Result<()> {
        self.post("focus", target.into(), vec![InputEvent::Focus])
    }

    /// Replace the selection of `view` and confirm the application took it.
    pub fn set_selection(&self, view: impl Into<WidgetId>, rows: &[usize]) -> Result<()> {
        const ACTION: &str = "selection";
        self.check_stale(ACTION)?;
        let view = view.into();
        let rows = rows.to_vec();
        let flush = self.flush;

        self.gateway.try_run_named("set_selection", move |cx| {
            cx.post_event(view.clone(), InputEvent::Select { rows: rows.clone() });
            if !flush {
                return Ok(());
            }
            cx.send_posted_events(Some(&view))?;
            let reported = cx.app()?.selected_rows(&view);
            // Views report selected rows in their own order.
            let requested: BTreeSet<usize> = rows.iter().copied().collect();
            match reported {
                Some(actual) if actual.iter().copied().collect::<BTreeSet<_>>() != requested => {
                    Err(AlhError::Interaction {
                        action: ACTION,
                        target: view.to_string(),
                        details: format!(
                            "requested rows {rows:?}, application reports {actual:?}"
                        ),
                    })
                }
                _ => Ok(()),
            }
        })
    }

    /// Deliver posted events now, for `target` or all targets.
    pub fn flush(&self, target: Option<WidgetId>) -> Result<usize> {
        self.gateway
            .try_run_named("flush", move |cx| cx.send_posted_events(target.as_ref()))
    }

    fn post(&self, action: &'static str, target: WidgetId, events: Vec<InputEvent>) -> Result<()> {
        self.check_stale(action)?;
        let flush = self.flush;
        self.gateway.try_run_named(action, move |cx| {
            for event in events {
                cx.post_event(target.clone(), event);
            }
            if flush {
                cx.send_posted_events(Some(&target))?;
            }
            Ok(())
        })
    }

    // ──────────────────── dialogs ────────────────────

    /// Answer the next file chooser with `paths`.
    pub fn expect_file_dialog(
        &self,
        paths: Vec<PathBuf>,
    ) -> Result<DialogExpectation<FileDialogRequest>> {
        self.check_stale("file dialog expectation")?;
        let state = ExpectationState::new(OPEN_FILE_NAMES);
        let calls = CallRecorder::new();

        let answer = Mutex::new(Some(paths));
        let (seen, flag) = (calls.clone(), Arc::clone(&state));
        let chooser: FileChooser = Arc::new(move |request: &FileDialogRequest| {
            seen.record(request.clone());
            flag.spent.store(true, Ordering::SeqCst);
            answer.lock().take().unwrap_or_default()
        });

        let guard = self
            .registry
            .with_override(&self.dialogs, OPEN_FILE_NAMES, chooser)?;
        self.track(&state);
        Ok(DialogExpectation {
            guard: Some(guard),
            state,
            calls,
        })
    }

    /// Answer the next confirmation with `accept`.
    pub fn expect_confirmation(&self, accept: bool) -> Result<DialogExpectation<ConfirmRequest>> {
        self.check_stale("confirmation expectation")?;
        let state = ExpectationState::new(QUESTION);
        let calls = CallRecorder::new();

        let (seen, flag) = (calls.clone(), Arc::clone(&state));
        let confirmer: Confirmer = Arc::new(move |request: &ConfirmRequest| {
            seen.record(request.clone());
            // First caller gets the scripted answer, later ones "no".
            !flag.spent.swap(true, Ordering::SeqCst) && accept
        });

        let guard = self
            .registry
            .with_override(&self.dialogs, QUESTION, confirmer)?;
        self.track(&state);
        Ok(DialogExpectation {
            guard: Some(guard),
            state,
            calls,
        })
    }

    /// Run `body` with the file chooser answering `paths`.
    pub fn with_file_dialog<R, F>(
        &self,
        paths: Vec<PathBuf>,
        body: F,
    ) -> Result<(R, Vec<FileDialogRequest>)>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        let expectation = self.expect_file_dialog(paths)?;
        let value = body(self)?;
        let calls = expectation.finish()?;
        Ok((value, calls))
    }

    /// Run `body` with confirmations answering `accept`.
    pub fn with_confirmation<R, F>(
        &self,
        accept: bool,
        body: F,
    ) -> Result<(R, Vec<ConfirmRequest>)>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        let expectation = self.expect_confirmation(accept)?;
        let value = body(self)?;
        let calls = expectation.finish()?;
        Ok((value, calls))
    }

    // ──────────────────── stale tracking ────────────────────

    fn track(&self, state: &Arc<ExpectationState>) {
        self.expectations.lock().push(Arc::downgrade(state));
    }

    fn check_stale(&self, action: &'static str) -> Result<()> {
        let mut tracked = self.expectations.lock();
        tracked.retain(|weak| {
            weak.upgrade()
                .is_some_and(|state| state.live.load(Ordering::SeqCst))
        });
        for state in tracked.iter().filter_map(Weak::upgrade) {
            if state.is_stale() {
                return Err(AlhError::StaleOverride {
                    target: self.dialogs.target_name().to_string(),
                    attribute: state.attribute.to_string(),
                    action,
                });
            }
        }
        Ok(())
    }
}
