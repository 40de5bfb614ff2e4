use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

use runloop_core::testing::fixtures;

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Write a config using directory backends under `dir`.
fn write_config(dir: &Path, port: u16, toolchain: &Path) -> std::path::PathBuf {
    let runs = dir.join("runs");
    std::fs::create_dir_all(&runs).unwrap();

    let content = format!(
        r#"
[controller]
minimum_batch = 3
poll_interval_ms = 100
idle_poll_interval_ms = 100

[toolchain]
parameters_path = "{toolchain}"

[probe]
backend = "directory"

[probe.directory]
base_path = "{runs}"

[source]
backend = "directory"

[source.directory]
name_suffix = ".dat"

[state]
path = "{db}"
lock_path = "{lock}"

[server]
enabled = true
host = "127.0.0.1"
port = {port}
"#,
        toolchain = toolchain.display(),
        runs = runs.display(),
        db = dir.join("runloop.db").display(),
        lock = dir.join("runloop.lock").display(),
        port = port,
    );

    let path = dir.join("config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

/// Spawn the daemon and return a handle
fn spawn_daemon(config_path: &Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_runloop"))
        .env("RUNLOOP_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn daemon")
}

/// Wait for the health endpoint to answer
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let toolchain = fixtures::write_toolchain_params(dir.path());
    let config_path = write_config(dir.path(), port, &toolchain);

    let mut daemon = spawn_daemon(&config_path);
    assert!(wait_for_server(port, 60).await, "Daemon did not start in time");

    let response = Client::new()
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["controller"]["phase"], "idle");

    daemon.kill().await.ok();
}

#[tokio::test]
async fn test_second_instance_is_refused() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let toolchain = fixtures::write_toolchain_params(dir.path());
    let config_path = write_config(dir.path(), port, &toolchain);

    let mut first = spawn_daemon(&config_path);
    assert!(wait_for_server(port, 60).await, "Daemon did not start in time");

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_runloop"))
            .env("RUNLOOP_CONFIG", &config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Second instance did not exit")
    .expect("Failed to run second instance");
    assert_eq!(result.status.code(), Some(1));

    first.kill().await.ok();
}

#[tokio::test]
async fn test_missing_toolchain_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config_path = write_config(dir.path(), port, &dir.path().join("missing.jsn"));

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_runloop"))
            .env("RUNLOOP_CONFIG", &config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Daemon did not exit")
    .expect("Failed to run daemon");
    assert_eq!(result.status.code(), Some(1));
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_runloop"))
            .env("RUNLOOP_CONFIG", "/nonexistent/config.toml")
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Daemon did not exit")
    .expect("Failed to run daemon");
    assert_eq!(result.status.code(), Some(1));
}
