//! Handle the test holds onto a running application.

#![allow(missing_docs)]

use std::any::Any;
use std::sync::Arc;

use crate::core::errors::Result;
use crate::gateway::Gateway;
use crate::runtime::app::Application;
use crate::runtime::context::ExecutionContext;
use crate::runtime::event_loop::LoopContext;

/// A lookup path into the running application.
///
/// The handle owns none of the application's objects: every access goes
/// through the gateway, and globals are whatever the application published.
/// Handles are only issued once the session is ready.
pub struct AppHandle<A> {
    gateway: Gateway<A>,
    globals: Arc<ExecutionContext>,
    sentinel: String,
}

impl<A> Clone for AppHandle<A> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            globals: Arc::clone(&self.globals),
            sentinel: self.sentinel.clone(),
        }
    }
}

impl<A: Application> AppHandle<A> {
    pub(crate) fn new(gateway: Gateway<A>, globals: Arc<ExecutionContext>, sentinel: &str) -> Self {
        Self {
            gateway,
            globals,
            sentinel: sentinel.to_string(),
        }
    }

    pub fn gateway(&self) -> &Gateway<A> {
        &self.gateway
    }

    pub fn globals(&self) -> &ExecutionContext {
        &self.globals
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// The value the application published as its readiness sentinel.
    pub fn sentinel_value<T: Any + Clone>(&self) -> Result<T> {
        self.globals.get(&self.sentinel)
    }

    /// A named global published by the application.
    pub fn global<T: Any + Clone>(&self, name: &str) -> Result<T> {
        self.globals.get(name)
    }

    pub fn run_on_app_thread<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&LoopContext<A>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.gateway.run_on_app_thread(f)
    }

    /// See [`Gateway::call`].
    pub fn call<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&LoopContext<A>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.gateway.call(f)
    }

    pub fn read<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&A) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.gateway.read(f)
    }

    pub fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut A) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.gateway.write(f)
    }
}
