//! Smoke tests for the `alh` binary.

mod common;

use std::fs;

use common::{run_cli_case, run_cli_case_with_env};
use serde_json::Value;

const HUMAN: (&str, &str) = ("ALH_OUTPUT_FORMAT", "human");

fn json_line(stdout: &str) -> Value {
    let line = stdout.lines().last().unwrap_or_default();
    serde_json::from_str(line).unwrap_or_else(|e| panic!("not JSON ({e}): {stdout:?}"))
}

#[test]
fn version_reports_package_version() {
    let human = run_cli_case_with_env("version_human", &["version"], &[HUMAN]);
    assert!(human.status.success(), "log: {}", human.log_path.display());
    assert!(
        human
            .stdout
            .contains(&format!("alh {}", env!("CARGO_PKG_VERSION"))),
        "stdout: {}",
        human.stdout
    );

    let json = run_cli_case("version_json", &["--json", "version"]);
    assert!(json.status.success(), "log: {}", json.log_path.display());
    let value = json_line(&json.stdout);
    assert_eq!(value["binary"], "alh");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn config_validate_and_show_read_the_given_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alh.toml");
    fs::write(
        &path,
        "[session]\nreadiness_timeout_ms = 1234\nsentinel = \"lyse_app\"\n\n[poll]\ninterval_ms = 7\n",
    )
    .unwrap();
    let path_arg = path.to_str().unwrap();

    let validate = run_cli_case("config_validate", &["--json", "--config", path_arg, "config", "validate"]);
    assert!(validate.status.success(), "log: {}", validate.log_path.display());
    let value = json_line(&validate.stdout);
    assert_eq!(value["valid"], true);
    assert!(value["source"].as_str().unwrap().contains("alh.toml"));
    assert!(!value["hash"].as_str().unwrap().is_empty());

    let show = run_cli_case("config_show", &["--json", "--config", path_arg, "config", "show"]);
    assert!(show.status.success(), "log: {}", show.log_path.display());
    let value = json_line(&show.stdout);
    assert_eq!(value["config"]["session"]["readiness_timeout_ms"], 1234);
    assert_eq!(value["config"]["session"]["sentinel"], "lyse_app");
    assert_eq!(value["config"]["poll"]["interval_ms"], 7);
}

#[test]
fn invalid_config_is_a_user_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alh.toml");
    fs::write(&path, "[gateway]\ncapacity = 0\n").unwrap();

    let result = run_cli_case(
        "config_invalid",
        &["--json", "--config", path.to_str().unwrap(), "config", "validate"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    let value = json_line(&result.stdout);
    assert_eq!(value["valid"], false);
    assert_eq!(value["code"], "ALH-1001");
}

#[test]
fn missing_explicit_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let result = run_cli_case(
        "config_missing",
        &["--config", path.to_str().unwrap(), "config", "show"],
    );
    assert_eq!(result.status.code(), Some(2), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("ALH-1002"), "stderr: {}", result.stderr);
}

#[test]
fn mock_config_writes_the_lab_template() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("labconfig.ini");
    let result = run_cli_case_with_env(
        "mock_config_output",
        &[
            "mock-config",
            "--experiment-name",
            "sine_scan",
            "--root",
            dir.path().to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
        ],
        &[HUMAN],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("wrote"), "stdout: {}", result.stdout);

    let text = fs::read_to_string(&out).unwrap();
    assert!(text.contains("experiment_name = sine_scan"), "{text}");
    assert!(text.contains("[ports]"), "{text}");
    assert!(text.contains("test_analysislib"), "{text}");
}

#[test]
fn completions_are_generated() {
    let result = run_cli_case("completions_bash", &["completions", "bash"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("alh"));
}

#[cfg(unix)]
#[test]
fn run_passes_through_the_test_command_status() {
    let ok = run_cli_case("run_true", &["--json", "run", "--", "true"]);
    assert!(ok.status.success(), "log: {}", ok.log_path.display());
    let value = json_line(&ok.stdout);
    assert_eq!(value["exit_code"], 0);
    assert_eq!(value["test_command"][0], "true");

    let failed = run_cli_case("run_false", &["--json", "run", "--", "false"]);
    assert_eq!(failed.status.code(), Some(1), "log: {}", failed.log_path.display());
    assert_eq!(json_line(&failed.stdout)["exit_code"], 1);
}

#[cfg(unix)]
#[test]
fn run_coverage_is_visible_to_the_test_command() {
    let result = run_cli_case(
        "run_coverage_env",
        &["--json", "run", "--coverage", "--", "sh", "-c", "test \"$ALH_COVERAGE\" = 1"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert_eq!(json_line(&result.stdout)["coverage"], true);

    let without = run_cli_case(
        "run_no_coverage_env",
        &["--json", "run", "--", "sh", "-c", "test \"$ALH_COVERAGE\" = 1"],
    );
    assert!(!without.status.success(), "log: {}", without.log_path.display());
}

#[cfg(unix)]
#[test]
fn run_report_commands_are_bracketed() {
    let result = run_cli_case_with_env(
        "run_report_cmd",
        &["run", "--report-cmd", "true", "--report-cmd", "false", "--", "true"],
        &[HUMAN],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let start = result.stdout.find("processing coverage data...").unwrap();
    let end = result.stdout.find("done").unwrap();
    assert!(start < end, "stdout: {}", result.stdout);
    assert!(result.stderr.contains("report command `false`"), "stderr: {}", result.stderr);
}
