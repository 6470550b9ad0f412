//! One cross-thread call: the callable, its completion signal and its result.

#![allow(missing_docs)]

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::core::errors::AlhError;
use crate::runtime::event_loop::{Job, LoopContext, panic_message};

/// A callable waiting to run on the loop thread.
///
/// The completion sender moves into the job, so the result slot is filled at
/// most once; a job dropped unrun closes the channel instead.
pub struct PendingInvocation<A, R> {
    operation: String,
    callable: Box<dyn FnOnce(&LoopContext<A>) -> R + Send>,
    completion: Sender<thread::Result<R>>,
}

impl<A: 'static, R: Send + 'static> PendingInvocation<A, R> {
    /// Build the invocation and the receiver its caller blocks on.
    pub fn new<F>(operation: &str, callable: F) -> (Self, Receiver<thread::Result<R>>)
    where
        F: FnOnce(&LoopContext<A>) -> R + Send + 'static,
    {
        let (completion, done) = bounded(1);
        (
            Self {
                operation: operation.to_string(),
                callable: Box::new(callable),
                completion,
            },
            done,
        )
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Run the callable, capturing a panic as the result.
    pub fn fulfill(self, cx: &LoopContext<A>) {
        let callable = self.callable;
        let outcome = catch_unwind(AssertUnwindSafe(|| callable(cx)));
        // The caller may have given up; nothing to do then.
        let _ = self.completion.send(outcome);
    }

    /// Type-erase into a loop job.
    pub fn into_job(self) -> Job<A> {
        Box::new(move |cx| self.fulfill(cx))
    }
}

/// A callable that panicked on the loop thread.
pub struct InvocationFailure {
    pub operation: String,
    pub thread: String,
    pub message: String,
    payload: Box<dyn Any + Send>,
}

impl InvocationFailure {
    pub fn new(operation: &str, thread: &str, payload: Box<dyn Any + Send>) -> Self {
        Self {
            operation: operation.to_string(),
            thread: thread.to_string(),
            message: panic_message(payload.as_ref()),
            payload,
        }
    }

    /// Re-raise the original panic on the calling thread.
    pub fn resume(self) -> ! {
        resume_unwind(self.payload)
    }

    pub fn into_error(self) -> AlhError {
        AlhError::InvocationFailed {
            operation: self.operation,
            thread: self.thread,
            message: self.message,
        }
    }
}

impl fmt::Debug for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationFailure")
            .field("operation", &self.operation)
            .field("thread", &self.thread)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Why an invocation produced no value.
#[derive(Debug)]
pub enum InvocationError {
    /// The callable panicked.
    Panicked(InvocationFailure),
    /// The call never ran or its result could not be delivered.
    Unavailable(AlhError),
}

impl InvocationError {
    pub fn into_error(self) -> AlhError {
        match self {
            Self::Panicked(failure) => failure.into_error(),
            Self::Unavailable(err) => err,
        }
    }

    /// Re-raise a panic as-is; turn anything else into a panic with the error.
    pub fn resume(self) -> ! {
        match self {
            Self::Panicked(failure) => failure.resume(),
            Self::Unavailable(err) => panic!("{err}"),
        }
    }
}
