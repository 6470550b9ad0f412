//! Test-thread handle onto the application's loop.

#![allow(missing_docs)]

use std::cell::RefMut;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};

use crate::core::errors::{AlhError, Result};
use crate::gateway::invocation::{InvocationError, InvocationFailure, PendingInvocation};
use crate::logger::{HarnessEvent, LoggerHandle};
use crate::runtime::app::Application;
use crate::runtime::event_loop::{LoopContext, LoopMessage, with_current_loop};

/// How long `request_quit` waits for room in a saturated channel.
const QUIT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Marshals callables onto the application's loop thread.
///
/// Calls block until the callable has run. Invocations execute one at a
/// time, in submission order. A call made from the loop thread itself runs
/// inline.
pub struct Gateway<A> {
    tx: Sender<LoopMessage<A>>,
    worker: ThreadId,
    thread_name: String,
    logger: LoggerHandle,
}

impl<A> Clone for Gateway<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            worker: self.worker,
            thread_name: self.thread_name.clone(),
            logger: self.logger.clone(),
        }
    }
}

impl<A: Application> Gateway<A> {
    pub(crate) fn new(
        tx: Sender<LoopMessage<A>>,
        worker: ThreadId,
        thread_name: &str,
        logger: LoggerHandle,
    ) -> Self {
        Self {
            tx,
            worker,
            thread_name: thread_name.to_string(),
            logger,
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn worker_thread(&self) -> ThreadId {
        self.worker
    }

    /// Whether the caller is the loop thread.
    pub fn is_app_thread(&self) -> bool {
        thread::current().id() == self.worker
    }

    /// Run `f` on the loop thread and return its value.
    pub fn run_on_app_thread<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&LoopContext<A>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.run_named("invoke", f)
    }

    /// [`Self::run_on_app_thread`] with an operation name for errors and logs.
    pub fn run_named<R, F>(&self, operation: &str, f: F) -> Result<R>
    where
        F: FnOnce(&LoopContext<A>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.execute(operation, f).map_err(InvocationError::into_error)
    }

    /// Run a fallible callable, flattening its error into the result.
    pub fn try_run_named<R, F>(&self, operation: &str, f: F) -> Result<R>
    where
        F: FnOnce(&LoopContext<A>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run_named(operation, f)?
    }

    /// Driver-friendly call: a panic on the loop thread is re-raised here with
    /// its original payload, so assertion failures read as usual.
    pub fn call<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&LoopContext<A>) -> R + Send + 'static,
        R: Send + 'static,
    {
        match self.execute("call", f) {
            Ok(value) => value,
            Err(err) => err.resume(),
        }
    }

    /// Read application state.
    pub fn read<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&A) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.try_run_named("read", move |cx| cx.app().map(|app| f(&app)))
    }

    /// Mutate application state.
    pub fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut A) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.try_run_named("write", move |cx| {
            cx.app_mut().map(|mut app: RefMut<'_, A>| f(&mut app))
        })
    }

    /// Post the quit sentinel. Returns `false` if the loop is gone or stuck.
    pub fn request_quit(&self) -> bool {
        match self.tx.send_timeout(LoopMessage::Quit, QUIT_SEND_TIMEOUT) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                self.logger.note(
                    "ALH-GATEWAY",
                    format!("quit request to {} timed out", self.thread_name),
                );
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => false,
        }
    }

    // ──────────────────── internals ────────────────────

    fn execute<R, F>(&self, operation: &str, f: F) -> std::result::Result<R, InvocationError>
    where
        F: FnOnce(&LoopContext<A>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let outcome = if self.is_app_thread() {
            self.execute_inline(operation, f)?
        } else {
            self.execute_queued(operation, f)?
        };

        outcome.map_err(|payload| {
            let failure = InvocationFailure::new(operation, &self.thread_name, payload);
            self.logger.send(HarnessEvent::InvocationFailed {
                operation: failure.operation.clone(),
                thread: failure.thread.clone(),
                message: failure.message.clone(),
            });
            self.logger.note(
                "ALH-GATEWAY",
                format!("`{operation}` panicked on {}: {}", self.thread_name, failure.message),
            );
            InvocationError::Panicked(failure)
        })
    }

    /// Reentrant path: already on the loop thread, so run now.
    fn execute_inline<R, F>(
        &self,
        operation: &str,
        f: F,
    ) -> std::result::Result<thread::Result<R>, InvocationError>
    where
        F: FnOnce(&LoopContext<A>) -> R,
    {
        with_current_loop::<A, _, _>(|cx| catch_unwind(AssertUnwindSafe(|| f(cx)))).ok_or_else(
            || {
                InvocationError::Unavailable(AlhError::AppThreadGone {
                    operation: operation.to_string(),
                    details: "loop thread is not running its event loop".to_string(),
                })
            },
        )
    }

    fn execute_queued<R, F>(
        &self,
        operation: &str,
        f: F,
    ) -> std::result::Result<thread::Result<R>, InvocationError>
    where
        F: FnOnce(&LoopContext<A>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let gone = |details: &str| {
            InvocationError::Unavailable(AlhError::AppThreadGone {
                operation: operation.to_string(),
                details: details.to_string(),
            })
        };

        let (pending, done) = PendingInvocation::new(operation, f);
        self.tx
            .send(LoopMessage::Invoke(pending.into_job()))
            .map_err(|_| gone("event loop has exited"))?;
        done.recv()
            .map_err(|_| gone("event loop exited before running the invocation"))
    }
}
