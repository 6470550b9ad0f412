//! Scratch storage for a session's mock environment.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::config::HarnessConfig;
use crate::core::errors::{AlhError, Result};
use crate::env::mock_config::{DEFAULT_SECTION, MockConfig, TemplateParams};

/// File name of the mock config inside the scratch root.
pub const MOCK_CONFIG_FILE: &str = "mock_config.ini";

/// What provisioning produced; handed to the application through `LaunchEnv`.
#[derive(Debug, Clone)]
pub struct ProvisionedEnv {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub config: MockConfig,
    pub created_dirs: Vec<PathBuf>,
    /// Leave the tree in place at teardown.
    pub keep: bool,
}

/// Creates the environment before the application starts and removes it after.
pub trait Provisioner: Send {
    fn provision(&mut self, config: &HarnessConfig) -> Result<ProvisionedEnv>;
    fn teardown(&mut self, env: &ProvisionedEnv) -> Result<()>;
}

type ConfigEdit = Box<dyn FnMut(&mut MockConfig) + Send>;

/// Default provisioner: a unique scratch directory holding the mock config
/// and the directories it names.
pub struct ScratchEnvironment {
    dir_keys: Vec<(String, String)>,
    edits: Vec<ConfigEdit>,
    keep: Option<bool>,
}

impl Default for ScratchEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchEnvironment {
    /// Creates the experiment shot storage directory by default.
    pub fn new() -> Self {
        Self {
            dir_keys: vec![(
                DEFAULT_SECTION.to_string(),
                "experiment_shot_storage".to_string(),
            )],
            edits: Vec::new(),
            keep: None,
        }
    }

    /// Also create the directory named by `[section] key`.
    #[must_use]
    pub fn create_dir_for(mut self, section: &str, key: &str) -> Self {
        self.dir_keys.push((section.to_string(), key.to_string()));
        self
    }

    /// Adjust the mock config before it is written.
    #[must_use]
    pub fn with_config_edit<F>(mut self, edit: F) -> Self
    where
        F: FnMut(&mut MockConfig) + Send + 'static,
    {
        self.edits.push(Box::new(edit));
        self
    }

    /// Override `scratch.keep` from the harness config.
    #[must_use]
    pub const fn keep(mut self, keep: bool) -> Self {
        self.keep = Some(keep);
        self
    }

    fn populate(&mut self, root: &Path, config: &HarnessConfig) -> Result<ProvisionedEnv> {
        let mut mock = MockConfig::template(&TemplateParams {
            experiment_name: config.scratch.experiment_name.clone(),
            shared_drive: root.join("test_shared_drive"),
            suite_dir: root.join("suite"),
            analysislib: root.join("test_analysislib"),
        });
        for edit in &mut self.edits {
            edit(&mut mock);
        }

        let mut created_dirs = Vec::with_capacity(self.dir_keys.len());
        for (section, key) in &self.dir_keys {
            let dir = mock.get_path(section, key)?;
            fs::create_dir_all(&dir).map_err(|source| AlhError::io(&dir, source))?;
            created_dirs.push(dir);
        }

        let config_path = root.join(MOCK_CONFIG_FILE);
        mock.write_to(&config_path)?;

        Ok(ProvisionedEnv {
            root: root.to_path_buf(),
            config_path,
            config: mock,
            created_dirs,
            keep: self.keep.unwrap_or(config.scratch.keep),
        })
    }
}

impl Provisioner for ScratchEnvironment {
    fn provision(&mut self, config: &HarnessConfig) -> Result<ProvisionedEnv> {
        let root = config.scratch.root.join(format!(
            "session-{}-{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));
        fs::create_dir_all(&root).map_err(|source| AlhError::io(&root, source))?;

        match self.populate(&root, config) {
            Ok(env) => Ok(env),
            Err(e) => {
                let _ = remove_tree(&root);
                Err(e)
            }
        }
    }

    fn teardown(&mut self, env: &ProvisionedEnv) -> Result<()> {
        if env.keep {
            eprintln!("[ALH-SESSION] keeping scratch tree {}", env.root.display());
            return Ok(());
        }
        remove_tree(&env.root)
    }
}

/// Remove a directory tree; a tree that is already gone is fine.
fn remove_tree(root: &Path) -> Result<()> {
    match fs::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(AlhError::io(root, source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> HarnessConfig {
        let mut cfg = HarnessConfig::default();
        cfg.scratch.root = dir.to_path_buf();
        cfg
    }

    #[test]
    fn provision_writes_config_and_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let mut scratch = ScratchEnvironment::new();
        let env = scratch.provision(&cfg).unwrap();

        assert!(env.root.starts_with(dir.path()));
        assert!(env.config_path.is_file());
        let storage = env
            .config
            .get_path("DEFAULT", "experiment_shot_storage")
            .unwrap();
        assert!(storage.ends_with("Experiments/test_experiment"));
        assert!(storage.is_dir());
        assert_eq!(env.created_dirs, vec![storage]);

        let reloaded = MockConfig::load(&env.config_path).unwrap();
        assert_eq!(reloaded, env.config);

        scratch.teardown(&env).unwrap();
        assert!(!env.root.exists());
        // Second teardown tolerates the missing tree.
        scratch.teardown(&env).unwrap();
    }

    #[test]
    fn sessions_get_distinct_roots() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let a = ScratchEnvironment::new().provision(&cfg).unwrap();
        let b = ScratchEnvironment::new().provision(&cfg).unwrap();
        assert_ne!(a.root, b.root);
    }

    #[test]
    fn config_edits_apply_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let mut scratch = ScratchEnvironment::new()
            .with_config_edit(|mock| mock.set("app", "routine_dir", "%(analysislib)s/routines"))
            .create_dir_for("app", "routine_dir");
        let env = scratch.provision(&cfg).unwrap();

        let routines = env.config.get_path("app", "routine_dir").unwrap();
        assert!(routines.is_dir());
        assert!(routines.starts_with(&env.root));
        let on_disk = MockConfig::load(&env.config_path).unwrap();
        assert_eq!(on_disk.get_path("app", "routine_dir").unwrap(), routines);
    }

    #[test]
    fn keep_leaves_tree_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let mut scratch = ScratchEnvironment::new().keep(true);
        let env = scratch.provision(&cfg).unwrap();
        scratch.teardown(&env).unwrap();
        assert!(env.root.exists());
    }

    #[test]
    fn failed_provision_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let mut scratch = ScratchEnvironment::new().create_dir_for("app", "missing_key");
        let err = scratch.provision(&cfg).unwrap_err();
        assert_eq!(err.code(), "ALH-1101");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
