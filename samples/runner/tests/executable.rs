//! Process-level behavior of the `ipc-sample` executable
//!
//! Tests cover:
//! - A failed role exits 1 with a role-prefixed diagnostic
//! - The listener transcript appears step by step
//! - A cancelled demo lets its children release their addresses

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

fn ipc_sample(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_ipc-sample"));
    command
        .current_dir(dir)
        .env("RUST_LOG", "off")
        .env_remove("IPC_SAMPLES_CONFIG")
        .env_remove("IPC_TIMEOUT_MS")
        .env_remove("IPC_CONNECT_ATTEMPTS")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

async fn wait_for(path: &Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("{} never appeared", path.display());
}

#[tokio::test]
async fn test_connect_without_listener_exits_one_with_client_prefix() {
    let temp_dir = TempDir::new().unwrap();

    let output = ipc_sample(temp_dir.path())
        .args(["socket", "connect", "--no-local-bind", "--address", "absent.sock"])
        .output()
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.lines().any(|line| line.starts_with("CLIENT:")),
        "stderr was: {stderr}"
    );
}

#[tokio::test]
async fn test_listener_reports_each_step_as_it_happens() {
    let temp_dir = TempDir::new().unwrap();

    let mut listener = ipc_sample(temp_dir.path())
        .args(["socket", "listen", "--address", "server.sock"])
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    let mut lines = BufReader::new(listener.stdout.take().unwrap()).lines();

    // Nothing has connected yet, but the listening line is already out.
    let first = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.as_deref(), Some("SERVER: Socket listening..."));

    let connector = ipc_sample(temp_dir.path())
        .args(["socket", "connect", "--address", "server.sock", "--no-local-bind"])
        .output()
        .await
        .unwrap();
    assert!(connector.status.success());

    let mut rest = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
        rest.push(line);
    }
    assert_eq!(
        rest,
        vec![
            "SERVER: Connected to an unbound client",
            "SERVER: Waiting for message...",
            "SERVER: Server received message: HELLO FROM CLIENT.",
            "SERVER: Responded with 17 bytes",
            "SERVER: Done!",
        ]
    );
    assert!(listener.wait().await.unwrap().success());
    assert!(!temp_dir.path().join("server.sock").exists());
}

#[tokio::test]
async fn test_cancelled_socket_demo_removes_listener_address() {
    let temp_dir = TempDir::new().unwrap();
    let server_path = temp_dir.path().join("server.sock");

    // The connector cannot bind over a regular file, so the listener stays in accept.
    std::fs::write(temp_dir.path().join("client.sock"), b"occupied").unwrap();

    let demo = ipc_sample(temp_dir.path())
        .env("IPC_SERVER_SOCKET", "server.sock")
        .env("IPC_CLIENT_SOCKET", "client.sock")
        .args(["socket", "demo"])
        .spawn()
        .unwrap();

    wait_for(&server_path).await;

    let pid = i32::try_from(demo.id().unwrap()).unwrap();
    kill(Pid::from_raw(pid), Signal::SIGTERM).unwrap();

    let output = tokio::time::timeout(Duration::from_secs(10), demo.wait_with_output())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("DEMO:"), "stderr was: {stderr}");
    assert!(!server_path.exists());
    assert!(!temp_dir.path().join("server.sock.lock").exists());
}
