//! Test environment provisioning: mock configuration and scratch storage.

pub mod mock_config;
pub mod scratch;

pub use mock_config::{MockConfig, TemplateParams};
pub use scratch::{MOCK_CONFIG_FILE, ProvisionedEnv, Provisioner, ScratchEnvironment};
