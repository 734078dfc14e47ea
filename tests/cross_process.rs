//! End-to-end: separate CLI processes sharing one session host

mod common;

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde_json::Value;
use tempfile::TempDir;

// Minimal MCP server: answers initialize, then echoes each call's id back
const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  if [ -z "$id" ]; then
    continue
  fi
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","capabilities":{}}}\n' "$id"
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[],"structuredContent":{"handled":%s}}}\n' "$id" "$id"
      ;;
  esac
done
"#;

fn setup() -> (TempDir, std::path::PathBuf) {
    let temp = TempDir::new().unwrap();
    let script = temp.path().join("fake-mcp.sh");
    fs::write(&script, FAKE_SERVER).unwrap();

    let transport = format!(
        "\n[transport]\ntype = \"stdio\"\ncommand = \"sh\"\nargs = [\"{}\"]\n",
        script.display()
    );
    common::write_catalogue(&temp.path().join("servers"), &transport);

    let config = temp.path().join("toolshed.yml");
    fs::write(
        &config,
        format!(
            "catalogue:\n  root: \"{}\"\nstate:\n  dir: \"{}\"\nsession:\n  idle_timeout_secs: 60\n",
            temp.path().join("servers").display(),
            temp.path().join("state").display()
        ),
    )
    .unwrap();
    (temp, config)
}

fn toolshed(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_toolshed"))
        .arg("--config")
        .arg(config)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .unwrap()
}

fn json_stdout(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_session_start_call_stop() {
    let (temp, config) = setup();
    let record = temp.path().join("state").join("sessions").join("chrome-devtools.json");

    let handle = json_stdout(&toolshed(&config, &["session", "start", "chrome-devtools"]));
    assert_eq!(handle["server"], "chrome-devtools");
    assert!(record.exists());

    // A second start attaches to the running host
    let again = json_stdout(&toolshed(&config, &["session", "start", "chrome-devtools"]));
    assert_eq!(again["id"], handle["id"]);

    let result = json_stdout(&toolshed(
        &config,
        &[
            "session",
            "call",
            "chrome-devtools",
            "navigate_page",
            r#"{"url":"https://example.com"}"#,
        ],
    ));
    assert!(result["handled"].is_number());

    let listing = json_stdout(&toolshed(&config, &["session", "list", "--json"]));
    assert_eq!(listing[0]["server"], "chrome-devtools");
    assert_eq!(listing[0]["alive"], true);
    assert_eq!(listing[0]["call_count"], 1);

    let stopped = json_stdout(&toolshed(&config, &["session", "stop", "chrome-devtools"]));
    assert_eq!(stopped["stopped"], true);
    assert!(!record.exists());

    let output = toolshed(
        &config,
        &["session", "call", "chrome-devtools", "navigate_page", "{}"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("NoActiveSession"));
}

#[test]
fn test_concurrent_starts_share_one_host() {
    let (temp, config) = setup();

    let spawn = || {
        Command::new(env!("CARGO_BIN_EXE_toolshed"))
            .arg("--config")
            .arg(&config)
            .args(["session", "start", "chrome-devtools"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    };
    let first = spawn();
    let second = spawn();

    let a = json_stdout(&first.wait_with_output().unwrap());
    let b = json_stdout(&second.wait_with_output().unwrap());
    assert_eq!(a["id"], b["id"]);

    let record_path = temp.path().join("state").join("sessions").join("chrome-devtools.json");
    let record: Value = serde_json::from_str(&fs::read_to_string(&record_path).unwrap()).unwrap();
    assert_eq!(record["id"], a["id"]);
    assert!(record["pid"].is_number());

    let listing = json_stdout(&toolshed(&config, &["session", "list", "--json"]));
    assert_eq!(listing.as_array().unwrap().len(), 1);
    assert_eq!(listing[0]["pid"], record["pid"]);
    assert_eq!(listing[0]["alive"], true);

    let stopped = json_stdout(&toolshed(&config, &["session", "stop", "chrome-devtools"]));
    assert_eq!(stopped["stopped"], true);
}

#[test]
fn test_stateless_call_through_binary() {
    let (_temp, config) = setup();
    let result = json_stdout(&toolshed(
        &config,
        &["call", "chrome-devtools", "take_screenshot", "{}"],
    ));
    assert_eq!(result["handled"], 2);
}

#[test]
fn test_failure_goes_to_stderr_only() {
    let (_temp, config) = setup();
    let output = toolshed(&config, &["discover", "info", "atlassian", "deleteJiraIssue"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("UnknownTool"));
}
