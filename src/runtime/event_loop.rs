//! Single-threaded cooperative event loop hosting the application.
//!
//! Each iteration runs deferred tasks, due timers and posted events, then
//! blocks on the gateway channel (or until the next timer is due) and runs one
//! message. Work submitted through the channel therefore executes between
//! iterations, never inside another task.

#![allow(missing_docs)]

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};

use crate::core::errors::{AlhError, Result};
use crate::gateway::Gateway;
use crate::logger::{HarnessEvent, LoggerHandle};
use crate::runtime::app::Application;
use crate::runtime::context::{ExecutionContext, LaunchEnv};
use crate::simulate::input::{InputEvent, PostedEvent, WidgetId};

/// Work queued on the loop from the same thread.
pub type Task<A> = Box<dyn FnOnce(&LoopContext<A>)>;

/// A job sent from another thread.
pub type Job<A> = Box<dyn FnOnce(&LoopContext<A>) + Send>;

/// Messages accepted by the loop channel.
pub enum LoopMessage<A> {
    Invoke(Job<A>),
    Quit,
}

struct Timer<A> {
    due: Instant,
    seq: u64,
    task: Task<A>,
}

// ──────────────────── loop context ────────────────────

/// Loop-thread state: the application plus its queues.
pub struct LoopContext<A> {
    app: RefCell<Option<A>>,
    posted: RefCell<VecDeque<PostedEvent>>,
    deferred: RefCell<VecDeque<Task<A>>>,
    timers: RefCell<Vec<Timer<A>>>,
    next_seq: Cell<u64>,
    quit: Cell<bool>,
    focus: RefCell<Option<WidgetId>>,
    globals: Arc<ExecutionContext>,
    logger: LoggerHandle,
    thread_name: String,
}

impl<A: Application> LoopContext<A> {
    fn new(globals: Arc<ExecutionContext>, logger: LoggerHandle, thread_name: String) -> Self {
        Self {
            app: RefCell::new(None),
            posted: RefCell::new(VecDeque::new()),
            deferred: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Vec::new()),
            next_seq: Cell::new(0),
            quit: Cell::new(false),
            focus: RefCell::new(None),
            globals,
            logger,
            thread_name,
        }
    }

    /// Shared borrow of the application.
    pub fn app(&self) -> Result<Ref<'_, A>> {
        let slot = self.app.try_borrow().map_err(|_| AlhError::AppState {
            details: "application is mutably borrowed by an event in progress".to_string(),
        })?;
        Ref::filter_map(slot, Option::as_ref).map_err(|_| not_running())
    }

    /// Exclusive borrow of the application.
    pub fn app_mut(&self) -> Result<RefMut<'_, A>> {
        let slot = self.app.try_borrow_mut().map_err(|_| AlhError::AppState {
            details: "application is already borrowed by an event in progress".to_string(),
        })?;
        RefMut::filter_map(slot, Option::as_mut).map_err(|_| not_running())
    }

    /// Run `f` against a shared borrow of the application.
    pub fn with_app<R>(&self, f: impl FnOnce(&A) -> R) -> Result<R> {
        self.app().map(|app| f(&app))
    }

    /// Run `f` against an exclusive borrow of the application.
    pub fn with_app_mut<R>(&self, f: impl FnOnce(&mut A) -> R) -> Result<R> {
        self.app_mut().map(|mut app| f(&mut app))
    }

    pub fn is_launched(&self) -> bool {
        self.app.try_borrow().is_ok_and(|slot| slot.is_some())
    }

    pub fn globals(&self) -> &Arc<ExecutionContext> {
        &self.globals
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    // ── posted events ──

    /// Queue an event for `target`. Returns its sequence number.
    pub fn post_event(&self, target: WidgetId, event: InputEvent) -> u64 {
        let seq = self.bump_seq();
        self.posted.borrow_mut().push_back(PostedEvent { target, event, seq });
        seq
    }

    pub fn pending_events(&self) -> usize {
        self.posted.borrow().len()
    }

    /// Dispatch queued events, in posting order, for `target` (or all targets).
    ///
    /// Events posted while dispatching are delivered in the same call. Every
    /// matching event is dispatched; the first failure is returned.
    pub fn send_posted_events(&self, target: Option<&WidgetId>) -> Result<usize> {
        let mut delivered = 0;
        let mut first_error = None;
        while let Some(posted) = self.take_posted(target) {
            delivered += 1;
            if let Err(e) = self.dispatch_one(&posted)
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        first_error.map_or(Ok(delivered), Err)
    }

    fn take_posted(&self, target: Option<&WidgetId>) -> Option<PostedEvent> {
        let mut queue = self.posted.borrow_mut();
        let pos = match target {
            None => 0,
            Some(t) => queue.iter().position(|p| &p.target == t)?,
        };
        queue.remove(pos)
    }

    fn dispatch_one(&self, posted: &PostedEvent) -> Result<()> {
        if matches!(posted.event, InputEvent::Focus) {
            *self.focus.borrow_mut() = Some(posted.target.clone());
        }
        let mut app = self.app_mut()?;
        app.dispatch(self, &posted.target, &posted.event)
    }

    // ── focus ──

    pub fn focus(&self) -> Option<WidgetId> {
        self.focus.borrow().clone()
    }

    pub fn set_focus(&self, target: WidgetId) {
        *self.focus.borrow_mut() = Some(target);
    }

    // ── deferred work ──

    /// Run `task` at the start of the next iteration.
    pub fn defer<F>(&self, task: F)
    where
        F: FnOnce(&Self) + 'static,
    {
        self.deferred.borrow_mut().push_back(Box::new(task));
    }

    /// Run `task` once `delay` has passed.
    ///
    /// A delay beyond the end of the clock never comes due, so the task is
    /// dropped without running.
    pub fn single_shot<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce(&Self) + 'static,
    {
        let Some(due) = Instant::now().checked_add(delay) else {
            return;
        };
        let seq = self.bump_seq();
        self.timers.borrow_mut().push(Timer {
            due,
            seq,
            task: Box::new(task),
        });
    }

    /// Ask the loop to exit after the current iteration.
    pub fn quit(&self) {
        self.quit.set(true);
    }

    pub fn is_quitting(&self) -> bool {
        self.quit.get()
    }

    // ── internals ──

    fn bump_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().iter().map(|t| t.due).min()
    }

    fn take_due_timer(&self, now: Instant) -> Option<Task<A>> {
        let mut timers = self.timers.borrow_mut();
        let pos = timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= now)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;
        Some(timers.swap_remove(pos).task)
    }

    /// One pass over background work. Failures are logged, never fatal.
    fn process_pending(&self) {
        let queued = self.deferred.borrow().len();
        for _ in 0..queued {
            let Some(task) = self.deferred.borrow_mut().pop_front() else {
                break;
            };
            self.run_guarded("deferred task", || task(self));
        }

        let now = Instant::now();
        while let Some(task) = self.take_due_timer(now) {
            self.run_guarded("timer", || task(self));
        }

        if self.pending_events() > 0 {
            self.run_guarded("posted events", || {
                if let Err(e) = self.send_posted_events(None) {
                    self.report(&format!("dispatch failed: {e}"), Some(&e));
                }
            });
        }
    }

    fn run_guarded<F: FnOnce()>(&self, what: &str, work: F) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(work)) {
            let message = panic_message(payload.as_ref());
            self.report(&format!("{what} panicked: {message}"), None);
        }
    }

    fn report(&self, message: &str, error: Option<&AlhError>) {
        eprintln!("[ALH-LOOP] {message}");
        let event = error.map_or_else(
            || HarnessEvent::Error {
                code: "ALH-3900".to_string(),
                message: message.to_string(),
            },
            HarnessEvent::from_error,
        );
        self.logger.send(event);
    }
}

fn not_running() -> AlhError {
    AlhError::AppState {
        details: "application is not running (not launched yet or already closed)".to_string(),
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// ──────────────────── current loop ────────────────────

thread_local! {
    static CURRENT_LOOP: RefCell<Option<Rc<dyn Any>>> = const { RefCell::new(None) };
}

/// Registers the loop context for this thread while alive.
struct CurrentLoop;

impl CurrentLoop {
    fn enter(cx: Rc<dyn Any>) -> Self {
        CURRENT_LOOP.with(|slot| *slot.borrow_mut() = Some(cx));
        Self
    }
}

impl Drop for CurrentLoop {
    fn drop(&mut self) {
        CURRENT_LOOP.with(|slot| *slot.borrow_mut() = None);
    }
}

/// Run `f` against the loop hosted by the calling thread, if any.
pub(crate) fn with_current_loop<A, R, F>(f: F) -> Option<R>
where
    A: Application,
    F: FnOnce(&LoopContext<A>) -> R,
{
    // Clone out so `f` may re-enter without holding the slot borrow.
    let cx = CURRENT_LOOP.with(|slot| slot.borrow().clone())?;
    let cx = cx.downcast::<LoopContext<A>>().ok()?;
    Some(f(&cx))
}

// ──────────────────── loop driver ────────────────────

/// Launch the application and run its loop until quit.
#[allow(clippy::needless_pass_by_value)]
pub fn run_event_loop<A: Application>(
    env: LaunchEnv,
    rx: Receiver<LoopMessage<A>>,
    logger: LoggerHandle,
    thread_name: String,
) -> Result<()> {
    let cx = Rc::new(LoopContext::<A>::new(
        Arc::clone(&env.globals),
        logger.clone(),
        thread_name,
    ));
    let _current = CurrentLoop::enter(Rc::clone(&cx) as Rc<dyn Any>);

    let app = match catch_unwind(AssertUnwindSafe(|| A::launch(&cx, &env))) {
        Ok(Ok(app)) => app,
        Ok(Err(e)) => {
            logger.note("ALH-LOOP", format!("launch failed: {e}"));
            drain(&rx);
            return Err(e);
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            logger.note("ALH-LOOP", format!("launch panicked: {message}"));
            drain(&rx);
            return Err(AlhError::WorkerPanicked { message });
        }
    };
    *cx.app.borrow_mut() = Some(app);
    logger.note("ALH-LOOP", format!("loop running on {}", cx.thread_name));

    loop {
        cx.process_pending();
        if cx.is_quitting() {
            break;
        }

        let message = match cx.next_deadline() {
            Some(deadline) => match rx.recv_deadline(deadline) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            LoopMessage::Invoke(job) => job(&cx),
            LoopMessage::Quit => cx.quit(),
        }
    }

    drain(&rx);
    // Drop the application on its own thread.
    let app = cx.app.borrow_mut().take();
    cx.run_guarded("application drop", move || drop(app));
    logger.note("ALH-LOOP", format!("loop on {} exited", cx.thread_name));
    Ok(())
}

/// Drop queued messages so blocked callers observe the loop's exit.
fn drain<A>(rx: &Receiver<LoopMessage<A>>) {
    while rx.try_recv().is_ok() {}
}

/// Spawn the application's loop thread and return a gateway into it.
pub fn spawn_app_thread<A: Application>(
    env: LaunchEnv,
    capacity: usize,
    thread_name: &str,
    logger: LoggerHandle,
) -> Result<(Gateway<A>, thread::JoinHandle<Result<()>>)> {
    let (tx, rx) = bounded::<LoopMessage<A>>(capacity.max(1));
    let loop_logger = logger.clone();
    let name = thread_name.to_string();

    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || run_event_loop::<A>(env, rx, loop_logger, name))
        .map_err(|e| AlhError::Runtime {
            details: format!("failed to spawn application thread: {e}"),
        })?;

    let gateway = Gateway::new(tx, handle.thread().id(), thread_name, logger);
    Ok((gateway, handle))
}
