#![allow(clippy::unwrap_used, clippy::expect_used)]

//! CLI smoke tests for the control-plane-server binary.

use std::io::Write;
use std::process::{Command, Output, Stdio};

fn run_server(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_control-plane-server"))
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute control-plane-server")
}

#[test]
fn help_lists_subcommands() {
    let output = run_server(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("check"));
    assert!(stdout.contains("--grpc-port"));
}

#[test]
fn check_accepts_sample_config() {
    let sample = concat!(env!("CARGO_MANIFEST_DIR"), "/config/control-plane.yaml");
    let output = run_server(&["--config", sample, "check"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Configuration is valid"));
}

#[test]
fn print_config_applies_port_overrides() {
    let output = run_server(&["--grpc-port", "6100", "--print-config"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("0.0.0.0:6100"));
    assert!(stdout.contains("route_prefix"));
}

#[test]
fn missing_config_file_fails() {
    let output = run_server(&["--config", "/nonexistent/control-plane.yaml", "check"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not exist"));
}

#[test]
fn unknown_keys_are_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "control_plane:\n  health:\n    sweep_every: 1s").unwrap();
    let output = run_server(&["--config", file.path().to_str().unwrap(), "check"]);
    assert!(!output.status.success());
}
