//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcessCommand};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use apploop_harness::core::config::{CONFIG_ENV, DEFAULT_CONFIG_FILE, HarnessConfig};
use apploop_harness::env::{MockConfig, TemplateParams};

/// Environment variable the child test run sees when coverage is requested.
const COVERAGE_ENV: &str = "ALH_COVERAGE";
/// How often the runner checks on the child and the interrupt flag.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Exit code reported when the run was interrupted and the child was killed.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Apploop Harness: run and support end-to-end event-loop application tests.
#[derive(Debug, Parser)]
#[command(
    name = "alh",
    author,
    version,
    about = "Apploop Harness - end-to-end test runner for event-loop applications",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the test command, then optional report commands.
    Run(RunArgs),
    /// View and validate harness configuration.
    Config(ConfigArgs),
    /// Print a mock environment config rendered from the built-in template.
    MockConfig(MockConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct RunArgs {
    /// Ask the test run to collect coverage (sets ALH_COVERAGE=1 for the child).
    #[arg(long)]
    coverage: bool,
    /// Command run after the tests to aggregate reports. Repeatable.
    #[arg(long = "report-cmd", value_name = "CMD")]
    report_cmds: Vec<String>,
    /// Test command and its arguments. Defaults to `cargo test`.
    #[arg(last = true, value_name = "CMD")]
    command: Vec<String>,
}

#[derive(Debug, Clone, Args, Serialize)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args, Serialize)]
struct MockConfigArgs {
    /// Experiment name written to `[DEFAULT] experiment_name`.
    #[arg(long, value_name = "NAME")]
    experiment_name: Option<String>,
    /// Root the template's shared drive and suite paths live under.
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
    /// Write to this file instead of stdout.
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Args, Serialize)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// The test command finished unsuccessfully; its exit code is ours.
    #[error("test command exited with status {0}")]
    TestsFailed(i32),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::TestsFailed(code) => *code,
        }
    }

    /// Whether `main` should print the error. A failed test run has already
    /// spoken for itself.
    pub const fn should_report(&self) -> bool {
        !matches!(self, Self::TestsFailed(_))
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_tests(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::MockConfig(args) => emit_mock_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
        Command::Version(args) => emit_version(cli, args),
    }
}

// ---------------------------------------------------------------------------
// run: test command, then report aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ReportOutcome {
    command: String,
    ok: bool,
    exit_code: Option<i32>,
}

fn run_tests(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let argv = test_command(args);
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| CliError::User("empty test command".to_string()))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))
    {
        eprintln!("[ALH-RUN] failed to register SIGINT handler: {e}");
    }

    let mut child_cmd = ProcessCommand::new(program);
    child_cmd.args(rest);
    if args.coverage {
        child_cmd.env(COVERAGE_ENV, "1");
    }
    if let Some(path) = &cli.config {
        child_cmd.env(CONFIG_ENV, path);
    }
    if mode == OutputMode::Json {
        // Keep our stdout a clean JSON stream.
        child_cmd.stdout(io::stderr());
    }

    let started = Instant::now();
    let child = child_cmd
        .spawn()
        .map_err(|e| CliError::Runtime(format!("failed to start `{}`: {e}", argv.join(" "))))?;
    let (exit_code, was_interrupted) = supervise(child, &interrupted)?;
    let elapsed = started.elapsed();

    let reports = if args.report_cmds.is_empty() {
        Vec::new()
    } else {
        if mode == OutputMode::Human {
            println!("processing coverage data...");
        }
        let outcomes: Vec<ReportOutcome> = args
            .report_cmds
            .iter()
            .map(|cmd| run_report_command(cmd, mode))
            .collect();
        if mode == OutputMode::Human {
            println!("done");
        }
        outcomes
    };

    match mode {
        OutputMode::Human => {
            let summary = format!("{} ({:.1}s)", argv.join(" "), elapsed.as_secs_f64());
            if was_interrupted {
                eprintln!("{} {summary}", "interrupted:".yellow().bold());
            } else if exit_code == 0 {
                println!("{} {summary}", "tests passed:".green().bold());
            } else {
                eprintln!(
                    "{} {summary} exited with status {exit_code}",
                    "tests failed:".red().bold()
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "test_command": argv,
                "coverage": args.coverage,
                "exit_code": exit_code,
                "interrupted": was_interrupted,
                "elapsed_ms": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "reports": serde_json::to_value(&reports)?,
            });
            write_json_line(&payload)?;
        }
    }

    if exit_code == 0 {
        Ok(())
    } else {
        Err(CliError::TestsFailed(exit_code))
    }
}

fn test_command(args: &RunArgs) -> Vec<String> {
    if args.command.is_empty() {
        vec!["cargo".to_string(), "test".to_string()]
    } else {
        args.command.clone()
    }
}

/// Wait for the child, killing it if SIGINT arrives.
fn supervise(mut child: Child, interrupted: &AtomicBool) -> Result<(i32, bool), CliError> {
    let mut killed = false;
    loop {
        if let Some(status) = child.try_wait()? {
            let code = if killed {
                INTERRUPTED_EXIT_CODE
            } else {
                status.code().unwrap_or(INTERRUPTED_EXIT_CODE)
            };
            return Ok((code, killed));
        }
        if !killed && interrupted.load(Ordering::SeqCst) {
            eprintln!("[ALH-RUN] interrupt received, stopping test command");
            // The child may exit on its own between try_wait and kill.
            let _ = child.kill();
            killed = true;
        }
        thread::sleep(CHILD_POLL_INTERVAL);
    }
}

/// Report commands are best effort: failures are printed, never fatal.
fn run_report_command(cmd: &str, mode: OutputMode) -> ReportOutcome {
    let mut parts = cmd.split_whitespace();
    let Some(program) = parts.next() else {
        return ReportOutcome {
            command: cmd.to_string(),
            ok: false,
            exit_code: None,
        };
    };

    let mut command = ProcessCommand::new(program);
    command.args(parts);
    if mode == OutputMode::Json {
        command.stdout(io::stderr());
    }
    match command.status() {
        Ok(status) => {
            if !status.success() {
                eprintln!("[ALH-RUN] report command `{cmd}` exited with {status}");
            }
            ReportOutcome {
                command: cmd.to_string(),
                ok: status.success(),
                exit_code: status.code(),
            }
        }
        Err(e) => {
            eprintln!("[ALH-RUN] report command `{cmd}` failed to start: {e}");
            ReportOutcome {
                command: cmd.to_string(),
                ok: false,
                exit_code: None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

/// Where config would be read from: flag, `ALH_CONFIG`, then `./alh.toml`.
fn resolved_config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    match args.command.as_ref().unwrap_or(&ConfigCommand::Path) {
        ConfigCommand::Path => config_path(cli, mode),
        ConfigCommand::Show => config_show(cli, mode),
        ConfigCommand::Validate => config_validate(cli, mode),
    }
}

fn load_config(cli: &Cli) -> Result<HarnessConfig, CliError> {
    HarnessConfig::load(cli.config.as_deref()).map_err(|e| CliError::Runtime(e.to_string()))
}

fn config_path(cli: &Cli, mode: OutputMode) -> Result<(), CliError> {
    let path = resolved_config_path(cli);
    let exists = path.is_file();
    if mode == OutputMode::Json {
        return write_json_line(&json!({
            "command": "config path",
            "path": path.display().to_string(),
            "exists": exists,
        }));
    }
    let note = if exists { "" } else { " (not found, built-in defaults apply)" };
    println!("{}{note}", path.display());
    Ok(())
}

fn config_show(cli: &Cli, mode: OutputMode) -> Result<(), CliError> {
    let config = load_config(cli)?;
    if mode == OutputMode::Json {
        return write_json_line(&json!({
            "command": "config show",
            "source": source_label(config.source.as_deref()),
            "config": serde_json::to_value(&config)?,
        }));
    }
    let rendered = toml::to_string_pretty(&config)
        .map_err(|e| CliError::Runtime(format!("render config: {e}")))?;
    println!("# source: {}", source_label(config.source.as_deref()));
    print!("{rendered}");
    Ok(())
}

fn config_validate(cli: &Cli, mode: OutputMode) -> Result<(), CliError> {
    let outcome = HarnessConfig::load(cli.config.as_deref()).and_then(|config| {
        let hash = config.stable_hash()?;
        Ok((source_label(config.source.as_deref()), hash))
    });

    match (outcome, mode) {
        (Ok((source, hash)), OutputMode::Human) => {
            println!("{} {source} (hash {hash})", "config ok:".green().bold());
            Ok(())
        }
        (Ok((source, hash)), OutputMode::Json) => write_json_line(&json!({
            "command": "config validate",
            "valid": true,
            "source": source,
            "hash": hash,
        })),
        (Err(e), mode) => {
            if mode == OutputMode::Json {
                write_json_line(&json!({
                    "command": "config validate",
                    "valid": false,
                    "code": e.code(),
                    "error": e.to_string(),
                }))?;
            } else {
                eprintln!("{} {e}", "config rejected:".red().bold());
            }
            Err(CliError::User(format!("config rejected: {e}")))
        }
    }
}

fn source_label(source: Option<&Path>) -> String {
    source.map_or_else(|| "(defaults)".to_string(), |p| p.display().to_string())
}

// ---------------------------------------------------------------------------
// mock-config
// ---------------------------------------------------------------------------

fn emit_mock_config(cli: &Cli, args: &MockConfigArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let root = args
        .root
        .clone()
        .unwrap_or_else(|| config.scratch.root.clone());
    let params = TemplateParams {
        experiment_name: args
            .experiment_name
            .clone()
            .unwrap_or_else(|| config.scratch.experiment_name.clone()),
        shared_drive: root.join("test_shared_drive"),
        suite_dir: root.join("suite"),
        analysislib: root.join("test_analysislib"),
    };
    let mock = MockConfig::template(&params);

    if let Some(path) = &args.output {
        mock.write_to(path)
            .map_err(|e| CliError::Runtime(e.to_string()))?;
        match output_mode(cli) {
            OutputMode::Human => println!("wrote {}", path.display()),
            OutputMode::Json => {
                let payload = json!({
                    "command": "mock-config",
                    "path": path.to_string_lossy(),
                    "sections": mock.sections(),
                });
                write_json_line(&payload)?;
            }
        }
        return Ok(());
    }

    match output_mode(cli) {
        OutputMode::Human => print!("{}", mock.render()),
        OutputMode::Json => {
            let payload = json!({
                "command": "mock-config",
                "sections": mock.sections(),
                "text": mock.render(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// version / output helpers
// ---------------------------------------------------------------------------

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let rustc_target = format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS);
    let build = if cfg!(debug_assertions) { "debug" } else { "release" };

    if output_mode(cli) == OutputMode::Json {
        return write_json_line(&json!({
            "binary": "alh",
            "version": version,
            "package": env!("CARGO_PKG_NAME"),
            "platform": rustc_target,
            "build": build,
            "config_file": DEFAULT_CONFIG_FILE,
            "config_env": CONFIG_ENV,
        }));
    }

    println!("alh {version}");
    if args.verbose {
        println!("{:<10} {}", "package", env!("CARGO_PKG_NAME"));
        println!("{:<10} {rustc_target}", "platform");
        println!("{:<10} {build}", "build");
        println!("{:<10} {DEFAULT_CONFIG_FILE} (or ${CONFIG_ENV})", "config");
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("ALH_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
