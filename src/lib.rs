#![forbid(unsafe_code)]

//! Apploop Harness (alh): drive an event-loop application end-to-end from a
//! test without modifying it.
//!
//! The application runs its single-threaded loop on a dedicated worker thread.
//! The test thread talks to it through five parts:
//! 1. **Condition poller** ([`poller`]): bounded waits on any predicate
//! 2. **Monkeypatch guard** ([`patch`]): scoped, LIFO-restored attribute overrides
//! 3. **Invocation gateway** ([`gateway`]): run closures on the loop thread and block for the result
//! 4. **Interaction simulator** ([`simulate`]): synthetic input and scripted dialogs
//! 5. **Lifecycle controller** ([`session`]): provision, launch, readiness, teardown
//!
//! # Library usage
//!
//! ```rust,no_run
//! use apploop_harness::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use apploop_harness::core::config::HarnessConfig;
//! use apploop_harness::poller::wait::WaitCondition;
//! ```

pub mod prelude;

pub mod core;
pub mod env;
pub mod gateway;
pub mod logger;
pub mod patch;
pub mod poller;
pub mod runtime;
pub mod session;
pub mod simulate;
