//! End-to-end tests against [`broker_core::Broker`], using a fake
//! container runtime: a small shell script standing in for `podman`/`docker`
//! that execs the generated entrypoint directly on the host instead of
//! inside a real container. This lets the frame protocol, timeout handling
//! and output capping run for real without requiring a container runtime
//! binary in CI, the same trade-off the teacher's own heavier integration
//! tests make by gating on external tooling availability.

use std::collections::HashMap;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;

use broker_core::{Broker, RunStatus, ToolServerRecord};

/// Writes a fake runtime executable that parses out the `--volume
/// host:/ipc:rw` argument `container.rs` always passes and execs
/// `python3 -u <host>/entrypoint` directly, skipping containerisation.
fn write_fake_runtime(dir: &std::path::Path) -> std::path::PathBuf {
    let script = r#"#!/usr/bin/env bash
set -euo pipefail
ipc_host=""
args=("$@")
i=0
while [ "$i" -lt "${#args[@]}" ]; do
  if [ "${args[$i]}" = "--volume" ]; then
    i=$((i + 1))
    val="${args[$i]}"
    ipc_host="${val%%:*}"
  fi
  i=$((i + 1))
done
exec python3 -u "$ipc_host/entrypoint"
"#;
    let path = dir.join("fake-runtime.sh");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(script.as_bytes()).unwrap();
    let mut perms = f.metadata().unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Writes a minimal MCP stdio JSON-RPC tool server standing in for a real
/// one: answers `initialize`, `tools/list` and `tools/call` for a single
/// `get` tool that echoes `{"temp": 72, "city": <arg>}`.
fn write_fake_tool_server(dir: &std::path::Path) -> std::path::PathBuf {
    let script = r#"#!/usr/bin/env python3
import json
import sys


def send(msg):
    sys.stdout.write(json.dumps(msg) + "\n")
    sys.stdout.flush()


for raw in sys.stdin:
    line = raw.strip()
    if not line:
        continue
    req = json.loads(line)
    method = req.get("method")
    req_id = req.get("id")
    if method == "initialize":
        send({
            "jsonrpc": "2.0",
            "id": req_id,
            "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "fake-weather", "version": "0.1.0"},
            },
        })
    elif method == "notifications/initialized":
        continue
    elif method == "tools/list":
        send({
            "jsonrpc": "2.0",
            "id": req_id,
            "result": {
                "tools": [
                    {
                        "name": "get",
                        "description": "Get the weather for a city",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"city": {"type": "string"}},
                        },
                    }
                ]
            },
        })
    elif method == "tools/call":
        params = req.get("params", {})
        args = params.get("arguments") or {}
        city = args.get("city", "")
        send({
            "jsonrpc": "2.0",
            "id": req_id,
            "result": {
                "content": [
                    {"type": "text", "text": json.dumps({"temp": 72, "city": city})}
                ],
                "isError": False,
            },
        })
    elif req_id is not None:
        send({
            "jsonrpc": "2.0",
            "id": req_id,
            "error": {"code": -32601, "message": "method not found"},
        })
"#;
    let path = dir.join("fake_tool_server.py");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(script.as_bytes()).unwrap();
    let mut perms = f.metadata().unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

async fn test_broker(state_dir: &std::path::Path, runtime: &std::path::Path) -> Broker {
    test_broker_with_records(state_dir, runtime, vec![]).await
}

async fn test_broker_with_records(
    state_dir: &std::path::Path,
    runtime: &std::path::Path,
    records: Vec<ToolServerRecord>,
) -> Broker {
    Broker::builder()
        .with_records(records)
        .with_state_dir(state_dir)
        .with_runtime_override(runtime.to_string_lossy().into_owned())
        .build()
        .await
        .expect("failed to build broker")
}

fn weather_record(tool_server_path: &std::path::Path) -> ToolServerRecord {
    ToolServerRecord {
        name: "w".to_string(),
        command: "python3".to_string(),
        args: vec![tool_server_path.to_string_lossy().into_owned()],
        env: HashMap::new(),
        cwd: None,
        description: "fake weather tool server".to_string(),
        self_exclude: false,
    }
}

#[tokio::test]
async fn s1_echo_runs_and_returns_stdout() {
    if !python3_available() {
        eprintln!("skipping: python3 not on PATH");
        return;
    }
    let state_dir = tempfile::tempdir().unwrap();
    let runtime_dir = tempfile::tempdir().unwrap();
    let runtime = write_fake_runtime(runtime_dir.path());
    let broker = test_broker(state_dir.path(), &runtime).await;

    let result = broker
        .run("print(1 + 1)".to_string(), vec![], 5)
        .await
        .expect("run should succeed");

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.stdout, "2\n");
    assert!(result.stderr.is_empty());
    broker.shutdown().await;
}

#[tokio::test]
async fn s3_variables_persist_across_runs_on_the_same_broker() {
    if !python3_available() {
        eprintln!("skipping: python3 not on PATH");
        return;
    }
    let state_dir = tempfile::tempdir().unwrap();
    let runtime_dir = tempfile::tempdir().unwrap();
    let runtime = write_fake_runtime(runtime_dir.path());
    let broker = test_broker(state_dir.path(), &runtime).await;

    let first = broker
        .run("x = 41".to_string(), vec![], 5)
        .await
        .expect("first run should succeed");
    assert_eq!(first.status, RunStatus::Success);

    let second = broker
        .run("print(x + 1)".to_string(), vec![], 5)
        .await
        .expect("second run should succeed");
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.stdout, "42\n");
    broker.shutdown().await;
}

#[tokio::test]
async fn s5_timeout_reports_status_and_broker_recovers() {
    if !python3_available() {
        eprintln!("skipping: python3 not on PATH");
        return;
    }
    let state_dir = tempfile::tempdir().unwrap();
    let runtime_dir = tempfile::tempdir().unwrap();
    let runtime = write_fake_runtime(runtime_dir.path());
    let broker = test_broker(state_dir.path(), &runtime).await;

    let timed_out = broker
        .run("while True: pass".to_string(), vec![], 1)
        .await
        .expect("timeout should surface as a status, not an error");
    assert_eq!(timed_out.status, RunStatus::Timeout);

    let recovered = broker
        .run("print(1)".to_string(), vec![], 5)
        .await
        .expect("broker should relaunch after a timeout");
    assert_eq!(recovered.status, RunStatus::Success);
    assert_eq!(recovered.stdout, "1\n");
    broker.shutdown().await;
}

#[tokio::test]
async fn unknown_server_is_rejected_before_any_container_launch() {
    let state_dir = tempfile::tempdir().unwrap();
    // A runtime path that does not exist: if this were ever invoked the
    // test would fail with a launch error instead of a validation error.
    let broker = Broker::builder()
        .with_records(vec![])
        .with_state_dir(state_dir.path())
        .with_runtime_override("/nonexistent/not-a-runtime")
        .build()
        .await
        .expect("broker construction never touches the runtime");

    let err = broker
        .run("print(1)".to_string(), vec!["ghost".to_string()], 5)
        .await
        .expect_err("unknown server must be rejected");
    assert!(matches!(err, broker_core::BrokerError::UnknownServer(name) if name == "ghost"));
}

#[tokio::test]
async fn s2_tool_call_round_trips_through_a_live_proxy() {
    if !python3_available() {
        eprintln!("skipping: python3 not on PATH");
        return;
    }
    let state_dir = tempfile::tempdir().unwrap();
    let runtime_dir = tempfile::tempdir().unwrap();
    let runtime = write_fake_runtime(runtime_dir.path());
    let tool_server_path = write_fake_tool_server(runtime_dir.path());
    let broker = test_broker_with_records(
        state_dir.path(),
        &runtime,
        vec![weather_record(&tool_server_path)],
    )
    .await;

    let result = broker
        .run(
            r#"x = await mcp_w.get(city="NYC"); print(x["temp"])"#.to_string(),
            vec!["w".to_string()],
            5,
        )
        .await
        .expect("run should succeed");

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.stdout, "72\n");
    assert!(result.stderr.is_empty());
    broker.shutdown().await;
}

#[tokio::test]
async fn s4_gate_violation_surfaces_as_a_user_visible_exception() {
    if !python3_available() {
        eprintln!("skipping: python3 not on PATH");
        return;
    }
    let state_dir = tempfile::tempdir().unwrap();
    let runtime_dir = tempfile::tempdir().unwrap();
    let runtime = write_fake_runtime(runtime_dir.path());
    let tool_server_path = write_fake_tool_server(runtime_dir.path());
    let mut record_a = weather_record(&tool_server_path);
    record_a.name = "a".to_string();
    let mut record_b = weather_record(&tool_server_path);
    record_b.name = "b".to_string();
    let broker =
        test_broker_with_records(state_dir.path(), &runtime, vec![record_a, record_b]).await;

    // Only "a" is allowed on this run, so no `mcp_b` proxy is ever bound
    // into the sandbox's evaluation context (entrypoint.rs rebinds proxies
    // strictly from the execute frame's allowed_servers). Referencing it
    // raises inside the sandbox and is reported as stderr, not an Err from
    // the broker.
    let result = broker
        .run(
            "await mcp_b.noop()".to_string(),
            vec!["a".to_string()],
            5,
        )
        .await
        .expect("gate violations surface as a status, not an Err");

    assert_eq!(result.status, RunStatus::Success);
    assert!(result.stdout.is_empty());
    assert!(result.stderr.contains("mcp_b"), "stderr: {}", result.stderr);
    broker.shutdown().await;
}

#[tokio::test]
async fn s6_stdout_over_the_cap_is_truncated_with_a_sentinel() {
    if !python3_available() {
        eprintln!("skipping: python3 not on PATH");
        return;
    }
    let state_dir = tempfile::tempdir().unwrap();
    let runtime_dir = tempfile::tempdir().unwrap();
    let runtime = write_fake_runtime(runtime_dir.path());
    let broker = test_broker(state_dir.path(), &runtime).await;

    let result = broker
        .run("print('x' * 2_000_000)".to_string(), vec![], 10)
        .await
        .expect("run should succeed even when output is capped");

    assert_eq!(result.status, RunStatus::Success);
    assert!(result.stdout.contains("...truncated..."));
    // default stdout cap (1 MiB) plus the sentinel, appended exactly once.
    assert_eq!(result.stdout.len(), (1 << 20) + "\n...truncated...\n".len());
    broker.shutdown().await;
}
