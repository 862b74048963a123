//! CLI subprocess integration tests.
//!
//! These tests invoke the `dockyard` binary as a subprocess against a
//! throwaway workspace of `sh` scripts and a fake builder, and verify exit
//! codes, stdout content, and JSON output stability.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

fn dockyard_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dockyard"));
    // Tests never relaunch through sudo.
    cmd.env("DOCKYARD_SKIP_ELEVATION", "1");
    cmd.env_remove("DOCKYARD_CONFIG");
    cmd.env_remove("DOCKYARD_LOG");
    cmd
}

fn write_executable(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Lay out scripts, a fake builder, and a one-entry catalog under `root`,
/// and return the path of a config file describing them.
fn write_workspace(root: &Path) -> PathBuf {
    let scripts = root.join("Scripts");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::write(scripts.join("install_containerd.sh"), "echo runtime up\n").unwrap();
    std::fs::write(scripts.join("install_buildkit.sh"), "echo builder up\n").unwrap();
    std::fs::write(
        scripts.join("uninstall_buildkit_containerd.sh"),
        "echo removed\n",
    )
    .unwrap();

    std::fs::create_dir_all(root.join("bin")).unwrap();
    write_executable(
        &root.join("bin/buildctl"),
        r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    type=oci,*) dest="${arg##*dest=}" ;;
  esac
done
echo oci > "$dest"
"#,
    );

    let demo = root.join("Dockerfiles/demo");
    std::fs::create_dir_all(&demo).unwrap();
    std::fs::write(demo.join("Dockerfile"), "FROM scratch\n").unwrap();

    let config = root.join("dockyard.toml");
    std::fs::write(
        &config,
        format!(
            r#"[scripts]
dir = "{root}/Scripts"
interpreter = "/bin/sh"
timeout_secs = 10

[builder]
executable = "{root}/bin/buildctl"

[packaging]
archive_dir = "{root}/temp"

[catalog]
dockerfiles_dir = "{root}/Dockerfiles"
output_dir = "{root}/out"

[log]
readiness_poll_ms = 10
"#,
            root = root.display()
        ),
    )
    .unwrap();
    config
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {stdout}"))
}

#[test]
fn cli_version_exits_zero() {
    let output = dockyard_bin().arg("--version").output().unwrap();
    assert!(output.status.success(), "dockyard --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("dockyard"),
        "version output must contain 'dockyard': {stdout}"
    );
}

#[test]
fn cli_help_lists_commands() {
    let output = dockyard_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["up", "build", "teardown", "catalog", "doctor"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_catalog_json_reports_unbuilt_entry() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());
    let output = dockyard_bin()
        .args(["catalog", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = stdout_json(&output);
    let entries = json.as_array().expect("catalog JSON must be an array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["name"], "demo");
    assert_eq!(entries[0]["built"], false);
    assert_eq!(entries[0]["status"], "build");
}

#[test]
fn cli_build_catalog_entry_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());
    let output = dockyard_bin()
        .args(["build", "demo", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "build must exit 0: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json = stdout_json(&output);
    assert_eq!(json["name"], "demo");
    assert_eq!(json["status"], "built");
    assert!(json["log_tail"].is_array());
    assert!(dir.path().join("out/demo").is_file());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("temp/demo.tar")).unwrap(),
        "Dockerfile\n"
    );

    let output = dockyard_bin()
        .args(["catalog", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(stdout_json(&output)[0]["built"], true);
}

#[test]
fn cli_build_missing_dockerfile_is_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());
    let output = dockyard_bin()
        .args(["build", "demo", "--config"])
        .arg(&config)
        .arg("--dockerfile")
        .arg(dir.path().join("nope/Dockerfile"))
        .arg("--context")
        .arg(dir.path())
        .arg("--output")
        .arg(dir.path().join("out/demo"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("validation error"), "stderr: {stderr}");
    // Nothing was provisioned.
    assert!(!dir.path().join("temp").exists());
}

#[test]
fn cli_build_unknown_catalog_entry_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());
    let output = dockyard_bin()
        .args(["build", "missing", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn cli_invalid_config_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("dockyard.toml");
    std::fs::write(&config, "[scripts]\ntimeout_secs = 0\n").unwrap();
    let output = dockyard_bin()
        .args(["catalog", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));

    let output = dockyard_bin()
        .args(["catalog", "--config"])
        .arg(dir.path().join("absent.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_teardown_runs_uninstall_script() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());
    let output = dockyard_bin()
        .args(["teardown", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    let tail: Vec<String> = json["log_tail"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_owned())
        .collect();
    assert!(tail.iter().any(|l| l.ends_with("removed")), "tail: {tail:?}");
}

#[test]
fn cli_teardown_without_uninstall_script_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());
    std::fs::remove_file(dir.path().join("Scripts/uninstall_buildkit_containerd.sh")).unwrap();
    let output = dockyard_bin()
        .args(["teardown", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("script not found"), "stderr: {stderr}");
}

#[test]
fn cli_up_tears_down_on_interrupt() {
    use std::io::{BufRead, BufReader};
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());
    let marker = dir.path().join("uninstalled");
    std::fs::write(
        dir.path().join("Scripts/uninstall_buildkit_containerd.sh"),
        format!("touch {}\n", marker.display()),
    )
    .unwrap();

    let mut child = dockyard_bin()
        .args(["up", "--config"])
        .arg(&config)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Wait until the environment is up and the process is holding.
    let stdout = child.stdout.take().unwrap();
    let mut lines = BufReader::new(stdout).lines();
    let held = lines.by_ref().map_while(Result::ok).any(|l| l.contains("Ctrl-C"));
    assert!(held, "up never reported a ready environment");
    assert!(!marker.exists());

    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("up did not exit after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(status.code(), Some(0));
    assert!(marker.exists(), "uninstall script did not run");
}

#[test]
fn cli_doctor_json_is_healthy_for_complete_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());
    let output = dockyard_bin()
        .args(["doctor", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["healthy"], true);
    assert!(json["checks"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c["name"] == "elevation" && c["status"] == "info"));
}

#[test]
fn cli_doctor_reports_missing_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());
    std::fs::remove_dir_all(dir.path().join("Scripts")).unwrap();
    let output = dockyard_bin()
        .args(["doctor", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout_json(&output)["healthy"], false);
}

#[test]
fn cli_completions_bash() {
    let output = dockyard_bin().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("dockyard"));
}

#[test]
fn cli_man_pages_written_to_dir() {
    let dir = tempfile::tempdir().unwrap();
    let output = dockyard_bin()
        .arg("man-pages")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(dir.path().join("dockyard.1").is_file());
    assert!(dir.path().join("dockyard-build.1").is_file());
}
