use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const WORKSPACE_CONFIG: &str = r#"
[[plugins]]
id = "workspace-files"
type = "native"

[[plugins]]
id = "openapi-plugin"
type = "openapi"
"#;

fn host(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("connect-host").unwrap();
    cmd.current_dir(dir)
        .env("CONNECT_SAFE_ZONE", dir)
        .env("WORKSPACE_FILES_ROOT", dir)
        .env_remove("CONNECT_CONFIG_PATH")
        .env_remove("RUST_LOG");
    cmd
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("connectors.toml"), WORKSPACE_CONFIG).unwrap();
    fs::write(dir.path().join("notes.txt"), "remember the milk").unwrap();
    dir
}

#[test]
fn test_list_shows_builtin_tools() {
    let dir = workspace();
    host(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("read_file"))
        .stdout(predicate::str::contains("list_dir"))
        .stdout(predicate::str::contains("write_file [approval]"));
}

#[test]
fn test_check_reports_plugins() {
    let dir = workspace();
    host(dir.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("workspace-files\tloaded"))
        .stdout(predicate::str::contains("openapi-plugin\tnot loaded"))
        .stdout(predicate::str::contains("1 of 2 plugins loaded, 3 tools registered"));
}

#[test]
fn test_call_tool() {
    let dir = workspace();
    host(dir.path())
        .args(["call", "read_file", "--args", r#"{"path": "notes.txt"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("remember the milk"));
}

#[test]
fn test_call_consequential_tool_is_suspended() {
    let dir = workspace();
    host(dir.path())
        .args([
            "call",
            "write_file",
            "--args",
            r#"{"path": "out.txt", "content": "x"}"#,
            "--identity",
            r#"{"user_id": "u1", "email": "u1@example.com"}"#,
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "Action suspended: Human approval required for write_file.",
        ));
    assert!(!dir.path().join("out.txt").exists());
}

#[test]
fn test_call_unknown_tool() {
    let dir = workspace();
    host(dir.path())
        .args(["call", "does_not_exist"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Error: Tool 'does_not_exist' not found."));
}

#[test]
fn test_call_rejects_non_object_args() {
    let dir = workspace();
    host(dir.path())
        .args(["call", "read_file", "--args", "[1, 2]"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--args must be a JSON object"));
}

#[test]
fn test_duplicate_ids_are_fatal() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("dupes.yaml");
    fs::write(
        &config,
        "plugins:\n  - id: a\n    type: native\n  - id: a\n    type: native\n",
    )
    .unwrap();

    host(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate plugin IDs found: a"));
}

#[test]
fn test_unsafe_plugin_path_is_fatal() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("connectors.toml"),
        "[[plugins]]\nid = \"evil\"\ntype = \"local\"\npath = \"../../../etc/passwd\"\n",
    )
    .unwrap();

    host(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Plugin path must be within the safe zone"));
}

#[test]
fn test_missing_config_is_fatal() {
    let dir = TempDir::new().unwrap();
    host(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[cfg(unix)]
#[test]
fn test_process_plugin_end_to_end() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let libs = dir.path().join("libs");
    fs::create_dir_all(&libs).unwrap();
    let script = libs.join("greeter.sh");
    fs::write(
        &script,
        r#"#!/bin/sh
read line
id=$(printf '%s' "$line" | sed 's/.*"id":"\([^"]*\)".*/\1/')
case "$line" in
  *'"method":"handshake"'*) reply='"success":true,"result":{"protocol":"connect/1"}' ;;
  *'"method":"list_tools"'*) reply='"success":true,"result":[{"name":"greet","description":"Say hello"}]' ;;
  *) reply="\"success\":true,\"result\":\"hello from $GREETER_NAME\"" ;;
esac
printf '{"id":"%s",%s}\n' "$id" "$reply"
"#,
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(
        dir.path().join("connectors.toml"),
        "[[plugins]]\nid = \"greeter\"\ntype = \"local\"\npath = \"libs/greeter.sh\"\nenv = { GREETER_NAME = \"${GREETER_SECRET}\" }\n",
    )
    .unwrap();

    host(dir.path())
        .env("GREETER_SECRET", "the plugin")
        .args(["call", "greet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from the plugin"));
}
