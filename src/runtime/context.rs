//! What the application receives at launch and what it publishes back.

#![allow(missing_docs)]

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::errors::{AlhError, Result};
use crate::env::{MockConfig, ProvisionedEnv};
use crate::patch::target::AttributeTable;
use crate::simulate::dialogs::Dialogs;

/// Named globals the application publishes for the driver to find.
///
/// Readable from any thread, so the readiness check never needs the loop.
#[derive(Debug)]
pub struct ExecutionContext {
    table: AttributeTable,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            table: AttributeTable::new("globals"),
        }
    }

    pub fn publish<V: Any + Send + Sync>(&self, name: &str, value: V) {
        self.table.insert(name, value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains(name)
    }

    pub fn get<T: Any + Clone>(&self, name: &str) -> Result<T> {
        self.table.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.table.names()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit configuration for the application entry point.
#[derive(Debug, Clone)]
pub struct LaunchEnv {
    pub dialogs: Arc<Dialogs>,
    pub globals: Arc<ExecutionContext>,
    /// Name under which the application signals readiness.
    pub sentinel: String,
    pub mock_config: Option<Arc<MockConfig>>,
    pub config_path: Option<PathBuf>,
    pub scratch_root: Option<PathBuf>,
}

impl LaunchEnv {
    /// Headless dialogs, empty globals, no provisioned environment.
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            dialogs: Arc::new(Dialogs::headless()),
            globals: Arc::new(ExecutionContext::new()),
            sentinel: sentinel.into(),
            mock_config: None,
            config_path: None,
            scratch_root: None,
        }
    }

    #[must_use]
    pub fn with_dialogs(mut self, dialogs: Arc<Dialogs>) -> Self {
        self.dialogs = dialogs;
        self
    }

    #[must_use]
    pub fn with_provisioned(mut self, env: &ProvisionedEnv) -> Self {
        self.mock_config = Some(Arc::new(env.config.clone()));
        self.config_path = Some(env.config_path.clone());
        self.scratch_root = Some(env.root.clone());
        self
    }

    /// The provisioned mock configuration.
    pub fn mock_config(&self) -> Result<&MockConfig> {
        self.mock_config
            .as_deref()
            .ok_or_else(|| AlhError::InvalidConfig {
                details: "no mock configuration was provisioned for this launch".to_string(),
            })
    }

    pub fn scratch_root(&self) -> Option<&Path> {
        self.scratch_root.as_deref()
    }

    /// Publish the readiness sentinel.
    pub fn signal_ready<V: Any + Send + Sync>(&self, value: V) {
        self.globals.publish(&self.sentinel, value);
    }

    pub fn is_ready(&self) -> bool {
        self.globals.contains(&self.sentinel)
    }
}
