//! Unit and BDD tests for the CLI runtime.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;
use tether_plugins::PluginManager;
use tether_plugins::testing::InProcessNegotiator;

use super::*;


/// Writes a registry file; each plugin is `(name, secret)`.
pub(crate) fn write_config(dir: &Path, plugins: &[(&str, &str)]) -> PathBuf {
    let entries: Vec<_> = plugins
        .iter()
        .map(|(name, secret)| {
            json!({
                "name": name,
                "path": "calculator",
                "handshake": {
                    "protocol_version": 1,
                    "magic_cookie_key": "TETHER_CALC",
                    "magic_cookie_value": secret,
                },
            })
        })
        .collect();
    let path = dir.join("plugins.json");
    fs::write(&path, json!({ "plugins": entries }).to_string()).expect("write config");
    path
}

/// Output captured from one CLI run.
#[derive(Debug, Default)]
pub(crate) struct Captured {
    pub(crate) code: u8,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

pub(crate) fn run_cli(manager: &PluginManager<InProcessNegotiator>, args: &[&str]) -> Captured {
    let argv = std::iter::once("tether")
        .chain(args.iter().copied())
        .map(OsString::from);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run_with_manager(argv, manager, &mut stdout, &mut stderr);
    Captured {
        code,
        stdout: String::from_utf8(stdout).expect("stdout utf8"),
        stderr: String::from_utf8(stderr).expect("stderr utf8"),
    }
}

struct Harness {
    _dir: TempDir,
    config: String,
    probe: InProcessNegotiator,
    manager: PluginManager<InProcessNegotiator>,
}

impl Harness {
    fn run(&self, args: &[&str]) -> Captured {
        let mut full = vec!["--config", self.config.as_str()];
        full.extend_from_slice(args);
        run_cli(&self.manager, &full)
    }
}

#[fixture]
fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = write_config(dir.path(), &[("calc", "calculator"), ("imposter", "wrong")]);
    let probe = InProcessNegotiator::new();
    Harness {
        config: config.display().to_string(),
        _dir: dir,
        manager: PluginManager::with_negotiator(probe.clone()),
        probe,
    }
}

#[rstest]
#[case::text("text", "8\n")]
#[case::json("json", "8\n")]
fn invoke_prints_result(harness: Harness, #[case] output: &str, #[case] expected: &str) {
    let captured = harness.run(&["--output", output, "invoke", "calc", "Add", "5", "3"]);
    assert_eq!(captured.code, 0, "stderr: {}", captured.stderr);
    assert_eq!(captured.stdout, expected);
}

#[rstest]
fn invoke_loads_only_the_named_plugin_and_unloads_it(harness: Harness) {
    let captured = harness.run(&["invoke", "calc", "Add", "-2", "3"]);
    assert_eq!(captured.stdout, "1\n");
    assert_eq!(harness.probe.spawned(), 1);
    assert_eq!(harness.probe.terminated(), 1);
    assert!(harness.manager.loaded_names().is_empty());
}

#[rstest]
fn remote_failure_exits_non_zero(harness: Harness) {
    let captured = harness.run(&["invoke", "calc", "Divide", "5", "0"]);
    assert_eq!(captured.code, 1);
    assert!(captured.stdout.is_empty());
    assert!(captured.stderr.contains("division by zero"), "{}", captured.stderr);
}

#[rstest]
fn describe_renders_methods(harness: Harness) {
    let captured = harness.run(&["describe", "calc"]);
    assert_eq!(captured.code, 0, "stderr: {}", captured.stderr);
    assert_eq!(
        captured.stdout,
        "calc 1.0.0\n  Add(int64, int64) -> int64\n  Divide(int64, int64) -> int64,error\n"
    );
}

#[rstest]
fn describe_json_is_an_abi_array(harness: Harness) {
    let captured = harness.run(&["--output", "json", "describe", "calc"]);
    let abis: Vec<PluginAbi> = serde_json::from_str(&captured.stdout).expect("abi json");
    assert_eq!(abis.len(), 1);
    assert!(abis.first().is_some_and(|abi| abi.method("Divide").is_some()));
}

#[rstest]
fn help_and_version(harness: Harness) {
    assert_eq!(
        harness.run(&["help", "calc", "Add"]).stdout,
        "Adds two integers.\n"
    );
    assert!(harness.run(&["help", "calc"]).stdout.contains("Divide"));
    assert_eq!(harness.run(&["version", "calc"]).stdout, "1.0.0\n");
    let document: serde_json::Value =
        serde_json::from_str(&harness.run(&["--output", "json", "version", "calc"]).stdout)
            .expect("version json");
    assert_eq!(document, json!({ "plugin": "calc", "version": "1.0.0" }));
}

#[rstest]
fn list_reports_partial_failures(harness: Harness) {
    let captured = harness.run(&["list"]);
    assert_eq!(captured.code, 1);
    assert!(captured.stdout.starts_with("calc 1.0.0\n"), "{}", captured.stdout);
    assert!(captured.stderr.contains("1 plugin(s) failed to load"));
    assert!(captured.stderr.contains("imposter"));
}

#[rstest]
fn unknown_plugin_is_usage_error(harness: Harness) {
    let captured = harness.run(&["version", "ghost"]);
    assert_eq!(captured.code, errors::USAGE_EXIT);
    assert!(captured.stderr.contains("'ghost' is not listed"), "{}", captured.stderr);
    assert_eq!(harness.probe.spawned(), 0);
}

#[rstest]
fn missing_config_fails() {
    let manager = PluginManager::with_negotiator(InProcessNegotiator::new());
    let captured = run_cli(&manager, &["--config", "/definitely/not/here.json", "list"]);
    assert_eq!(captured.code, 1);
    assert!(captured.stderr.contains("failed to read"), "{}", captured.stderr);
}

#[rstest]
#[case::no_command(&[], 2, "Usage")]
#[case::zero_timeout(&["--call-timeout-ms", "0", "list"], 2, "invalid value '0'")]
#[case::help(&["--help"], 0, "Usage")]
fn usage_paths(#[case] args: &[&str], #[case] code: u8, #[case] fragment: &str) {
    let manager = PluginManager::with_negotiator(InProcessNegotiator::new());
    let captured = run_cli(&manager, args);
    assert_eq!(captured.code, code);
    let shown = if code == 0 {
        &captured.stdout
    } else {
        &captured.stderr
    };
    assert!(shown.contains(fragment), "{shown}");
}

#[rstest]
fn call_timeout_override_applies(harness: Harness) {
    let captured = harness.run(&["--call-timeout-ms", "5000", "invoke", "calc", "Add", "1", "1"]);
    assert_eq!(captured.stdout, "2\n");
}
