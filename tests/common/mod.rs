#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use apploop_harness::prelude::*;

// ──────────────────── routine box application ────────────────────

pub const ADD_BUTTON: &str = "add_routines";
pub const REMOVE_BUTTON: &str = "remove_routines";
pub const TREE: &str = "routine_tree";
pub const POPOUT_BUTTON: &str = "popout";

/// Mock config section the application reads its test knobs from.
pub const APP_SECTION: &str = "routinebox";

/// How long a removed routine takes to shut down.
pub const ROUTINE_EXIT_DELAY: Duration = Duration::from_millis(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    pub path: PathBuf,
    pub name: String,
    pub enabled: bool,
    pub exiting: bool,
}

/// A miniature analysis-routine manager: a list of routines with add/remove
/// buttons, a tree view with selection, and Delete / Shift+Delete shortcuts.
///
/// Knobs from `[routinebox]` in the mock config:
/// - `startup_ms`: delay before publishing the readiness sentinel; anything
///   that is not a number means "never".
pub struct RoutineBoxApp {
    dialogs: Arc<Dialogs>,
    analysislib: PathBuf,
    pub routines: Vec<Routine>,
    pub selection: Vec<usize>,
    pub active: bool,
    pub log: Vec<u32>,
}

impl RoutineBoxApp {
    fn add_routines(&mut self) {
        let picked = self.dialogs.open_file_names(&FileDialogRequest {
            parent: Some(WidgetId::new(ADD_BUTTON)),
            caption: "Select analysis routines".to_string(),
            directory: self.analysislib.clone(),
            filter: "Python files (*.py)".to_string(),
        });
        for path in picked {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.routines.push(Routine {
                path,
                name,
                enabled: true,
                exiting: false,
            });
        }
    }

    fn remove_selected(&mut self, cx: &LoopContext<Self>, confirm: bool) {
        if self.selection.is_empty() {
            return;
        }
        if confirm {
            let accepted = self.dialogs.question(&ConfirmRequest {
                parent: Some(WidgetId::new(TREE)),
                title: "Remove routines".to_string(),
                message: format!("Remove {} routines?", self.selection.len()),
            });
            if !accepted {
                return;
            }
        }
        for &row in &self.selection {
            if let Some(routine) = self.routines.get_mut(row) {
                routine.exiting = true;
            }
        }
        self.selection.clear();
        // Routines take a moment to shut down before they leave the list.
        cx.single_shot(ROUTINE_EXIT_DELAY, |cx| {
            let _ = cx.with_app_mut(|app| app.routines.retain(|r| !r.exiting));
        });
    }
}

impl Application for RoutineBoxApp {
    fn launch(cx: &LoopContext<Self>, env: &LaunchEnv) -> Result<Self> {
        let config = env.mock_config()?;
        let analysislib = config.get_path("DEFAULT", "analysislib")?;
        env.globals.publish("analysislib", analysislib.clone());

        let startup = config
            .get_raw(APP_SECTION, "startup_ms")
            .unwrap_or("0")
            .parse::<u64>()
            .ok();
        if let Some(ms) = startup {
            let env = env.clone();
            cx.single_shot(Duration::from_millis(ms), move |_| {
                env.signal_ready("routinebox".to_string());
            });
        }

        Ok(Self {
            dialogs: Arc::clone(&env.dialogs),
            analysislib,
            routines: Vec::new(),
            selection: Vec::new(),
            active: true,
            log: Vec::new(),
        })
    }

    fn dispatch(
        &mut self,
        cx: &LoopContext<Self>,
        target: &WidgetId,
        event: &InputEvent,
    ) -> Result<()> {
        match (target.as_str(), event) {
            (ADD_BUTTON, InputEvent::Click { .. }) => self.add_routines(),
            (REMOVE_BUTTON, InputEvent::Click { .. }) => self.remove_selected(cx, true),
            (POPOUT_BUTTON, InputEvent::Click { .. }) => self.active = false,
            (TREE, InputEvent::Select { rows }) => {
                self.selection = rows
                    .iter()
                    .copied()
                    .filter(|row| *row < self.routines.len())
                    .collect();
            }
            (TREE, event) if event.is_key_press(Key::Delete) => {
                if cx.focus().as_ref().is_some_and(|f| f.as_str() == TREE) {
                    let InputEvent::Key { modifiers, .. } = event else {
                        return Ok(());
                    };
                    self.remove_selected(cx, !modifiers.contains(Modifiers::SHIFT));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn is_active_window(&self) -> bool {
        self.active
    }

    fn selected_rows(&self, view: &WidgetId) -> Option<Vec<usize>> {
        (view.as_str() == TREE).then(|| self.selection.clone())
    }
}

/// Harness config rooted in `dir`, with fast polling.
pub fn session_config(dir: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.scratch.root = dir.join("scratch");
    config.log.jsonl_path = dir.join("logs").join("sessions.jsonl");
    config.session.readiness_timeout_ms = 5_000;
    config.poll.interval_ms = 5;
    config
}

/// Start a routine box whose readiness arrives after `startup_ms`.
pub fn start_routinebox(
    config: HarnessConfig,
    startup_ms: &str,
) -> Result<TestSession<RoutineBoxApp>> {
    let startup = startup_ms.to_string();
    let scratch = ScratchEnvironment::new()
        .create_dir_for("DEFAULT", "analysislib")
        .with_config_edit(move |cfg| cfg.set(APP_SECTION, "startup_ms", startup.clone()));
    TestSession::builder(config).provisioner(scratch).start()
}

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn transcript_name(case_name: &str) -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let slug: String = case_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{slug}-{stamp}.txt")
}

fn alh_binary() -> PathBuf {
    // Absent when the `cli` feature is off and the binary is not built.
    option_env!("CARGO_BIN_EXE_alh")
        .map(PathBuf::from)
        .expect("alh binary is only built with the `cli` feature")
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("alh-cli-transcripts");
    fs::create_dir_all(&root).expect("create transcript dir");
    let log_path = root.join(transcript_name(case_name));
    let bin_path = alh_binary();

    let output = Command::new(&bin_path)
        .args(args)
        .env("ALH_TEST_VERBOSE", "1")
        .env_remove("ALH_CONFIG")
        .env_remove("ALH_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .envs(envs.iter().copied())
        .output()
        .expect("execute alh command");

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let mut transcript = String::new();
    let _ = writeln!(transcript, "$ {} {}", bin_path.display(), args.join(" "));
    let _ = writeln!(transcript, "# case {case_name}, {}", output.status);
    let _ = writeln!(transcript, "## stdout\n{stdout}");
    let _ = writeln!(transcript, "## stderr\n{stderr}");
    fs::write(&log_path, transcript).expect("write cli transcript");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
