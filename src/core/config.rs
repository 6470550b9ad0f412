//! Configuration system: TOML file + env var overrides + harness defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{AlhError, Result};
use crate::poller::WaitCondition;

/// File name probed in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "alh.toml";
/// Env var naming an explicit config file.
pub const CONFIG_ENV: &str = "ALH_CONFIG";

/// Full harness configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HarnessConfig {
    pub session: SessionConfig,
    pub poll: PollConfig,
    pub gateway: GatewayConfig,
    pub scratch: ScratchConfig,
    pub log: LogConfig,
    /// Where this config was loaded from (`None` for pure defaults).
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Lifecycle controller knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Budget for the readiness sentinel to appear.
    pub readiness_timeout_ms: u64,
    /// Bound on joining the worker thread at teardown.
    pub join_timeout_ms: u64,
    /// How long `start` waits for a previous session to release the slot.
    pub slot_timeout_ms: u64,
    /// Name the application publishes into its execution context when ready.
    pub sentinel: String,
    /// Thread name for the application worker.
    pub worker_thread_name: String,
    /// Treat "application window not active at teardown" as a test failure.
    pub fail_on_focus_leak: bool,
}

/// Condition poller defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollConfig {
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

/// Cross-thread gateway tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bounded capacity of the submission channel.
    pub capacity: usize,
}

/// Scratch storage for mock environment files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScratchConfig {
    /// Parent directory; each session gets a unique child.
    pub root: PathBuf,
    /// Keep the session's scratch tree after teardown (debugging aid).
    pub keep: bool,
    /// Experiment name substituted into the mock config template.
    pub experiment_name: String,
}

/// Session log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub jsonl_path: PathBuf,
    pub channel_capacity: usize,
    /// Mirror lifecycle events to stderr.
    pub verbose: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: 10_000,
            join_timeout_ms: 5_000,
            slot_timeout_ms: 120_000,
            sentinel: "app".to_string(),
            worker_thread_name: "alh-app".to_string(),
            fail_on_focus_leak: true,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            interval_ms: 20,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: env::temp_dir().join("alh-scratch"),
            keep: false,
            experiment_name: "test_experiment".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_path: env::temp_dir().join("alh-logs").join("sessions.jsonl"),
            channel_capacity: 1024,
            verbose: false,
        }
    }
}

impl HarnessConfig {
    /// Load config from an explicit path, `ALH_CONFIG`, or `./alh.toml`, then
    /// apply env overrides.
    ///
    /// Only an explicit path (argument or `ALH_CONFIG`) must exist; otherwise
    /// defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    /// [`Self::load`] with an injectable env lookup.
    pub fn load_with<F>(path: Option<&Path>, mut lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| lookup(CONFIG_ENV).map(PathBuf::from));

        let mut cfg = match explicit {
            Some(path_buf) if path_buf.exists() => Self::read_file(&path_buf)?,
            Some(path_buf) => return Err(AlhError::MissingConfig { path: path_buf }),
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::read_file(&local)?
                } else {
                    Self::default()
                }
            }
        };

        cfg.apply_env_overrides_from(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| AlhError::io(path, source))?;
        let mut parsed: Self = toml::from_str(&raw)?;
        parsed.source = Some(path.to_path_buf());
        Ok(parsed)
    }

    /// Deterministic hash of the effective config for session logs.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    #[must_use]
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.session.readiness_timeout_ms)
    }

    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.session.join_timeout_ms)
    }

    #[must_use]
    pub fn slot_timeout(&self) -> Duration {
        Duration::from_millis(self.session.slot_timeout_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }

    /// Default wait used by session-level `wait_for` helpers.
    #[must_use]
    pub fn wait_condition(&self) -> WaitCondition {
        WaitCondition::new(Duration::from_millis(self.poll.timeout_ms))
            .with_interval(self.poll_interval())
    }

    /// Apply `ALH_*` overrides using the given lookup.
    pub fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // session
        if let Some(raw) = lookup("ALH_READINESS_TIMEOUT_MS") {
            self.session.readiness_timeout_ms = parse_env("ALH_READINESS_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("ALH_JOIN_TIMEOUT_MS") {
            self.session.join_timeout_ms = parse_env("ALH_JOIN_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("ALH_SLOT_TIMEOUT_MS") {
            self.session.slot_timeout_ms = parse_env("ALH_SLOT_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("ALH_SENTINEL") {
            self.session.sentinel = raw;
        }
        if let Some(raw) = lookup("ALH_FAIL_ON_FOCUS_LEAK") {
            self.session.fail_on_focus_leak = parse_env_bool("ALH_FAIL_ON_FOCUS_LEAK", &raw)?;
        }

        // poll
        if let Some(raw) = lookup("ALH_POLL_TIMEOUT_MS") {
            self.poll.timeout_ms = parse_env("ALH_POLL_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("ALH_POLL_INTERVAL_MS") {
            self.poll.interval_ms = parse_env("ALH_POLL_INTERVAL_MS", &raw)?;
        }

        // gateway
        if let Some(raw) = lookup("ALH_GATEWAY_CAPACITY") {
            self.gateway.capacity = parse_env("ALH_GATEWAY_CAPACITY", &raw)?;
        }

        // scratch
        if let Some(raw) = lookup("ALH_SCRATCH_ROOT") {
            self.scratch.root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ALH_SCRATCH_KEEP") {
            self.scratch.keep = parse_env_bool("ALH_SCRATCH_KEEP", &raw)?;
        }

        // log
        if let Some(raw) = lookup("ALH_LOG_ENABLED") {
            self.log.enabled = parse_env_bool("ALH_LOG_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("ALH_LOG_PATH") {
            self.log.jsonl_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ALH_TEST_VERBOSE") {
            self.log.verbose = parse_env_bool("ALH_TEST_VERBOSE", &raw)?;
        }

        Ok(())
    }

    /// Reject settings the harness cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, val) in [
            ("session.readiness_timeout_ms", self.session.readiness_timeout_ms),
            ("session.join_timeout_ms", self.session.join_timeout_ms),
            ("poll.timeout_ms", self.poll.timeout_ms),
            ("poll.interval_ms", self.poll.interval_ms),
        ] {
            if val == 0 {
                return Err(AlhError::InvalidConfig {
                    details: format!("{name} must be > 0"),
                });
            }
        }

        if self.poll.interval_ms > self.poll.timeout_ms {
            return Err(AlhError::InvalidConfig {
                details: format!(
                    "poll.interval_ms ({}) must be <= poll.timeout_ms ({})",
                    self.poll.interval_ms, self.poll.timeout_ms
                ),
            });
        }

        // A rendezvous channel would make every submission wait for the loop.
        if self.gateway.capacity == 0 {
            return Err(AlhError::InvalidConfig {
                details: "gateway.capacity must be >= 1".to_string(),
            });
        }

        if self.log.channel_capacity == 0 {
            return Err(AlhError::InvalidConfig {
                details: "log.channel_capacity must be >= 1".to_string(),
            });
        }

        let sentinel = self.session.sentinel.trim();
        if sentinel.is_empty() || sentinel.chars().any(char::is_whitespace) {
            return Err(AlhError::InvalidConfig {
                details: format!(
                    "session.sentinel must be a non-empty name without whitespace, got {:?}",
                    self.session.sentinel
                ),
            });
        }

        if self.session.worker_thread_name.is_empty() {
            return Err(AlhError::InvalidConfig {
                details: "session.worker_thread_name must not be empty".to_string(),
            });
        }

        if self.scratch.root.as_os_str().is_empty() {
            return Err(AlhError::InvalidConfig {
                details: "scratch.root must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| AlhError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AlhError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: expected a boolean"),
        }),
    }
}
