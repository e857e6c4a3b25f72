//! End-to-end tests: the resource front-end against a live proxy server.

#![cfg(unix)]

use proxy_core::{ActionKind, ResourceRequest, SessionTimings};
use proxy_server::{start_server, ServerConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const TOKEN: &str = "resource-token";

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn serve(action: ActionKind, program: PathBuf) -> String {
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), TOKEN)
        .with_program(action, program)
        .with_timings(SessionTimings::default().with_kill_grace(Duration::from_millis(500)));
    let addr = start_server(config).await.unwrap();
    format!("ws://{}", addr)
}

fn request(url: &str, token: &str, extra: &str) -> ResourceRequest {
    ResourceRequest::from_json(&format!(
        r#"{{"source":{{"url":"{}","token":"{}","proxied":{{"uri":"git@example.com"}}}}{}}}"#,
        url, token, extra
    ))
    .unwrap()
}

#[tokio::test]
async fn test_check_prints_versions() {
    let scripts = TempDir::new().unwrap();
    // Echo the forwarded request so the test sees what the program received.
    let program = write_script(scripts.path(), "check", "read request\necho \"$request\"");
    let url = serve(ActionKind::Check, program).await;

    let mut printed = Vec::new();
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        proxy_resource::run_action(
            ActionKind::Check,
            &request(&url, TOKEN, r#","version":{"ref":"1"}"#),
            None,
            |line| printed.push(line.to_string()),
            std::future::pending(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(!outcome.interrupted);
    assert_eq!(printed.len(), 1);
    let forwarded: serde_json::Value = serde_json::from_str(&printed[0]).unwrap();
    assert_eq!(forwarded["source"]["uri"], "git@example.com");
    assert_eq!(forwarded["version"]["ref"], "1");
    assert!(forwarded["source"].get("token").is_none());
}

#[tokio::test]
async fn test_in_writes_destination() {
    let scripts = TempDir::new().unwrap();
    let program = write_script(
        scripts.path(),
        "in",
        "read request\nprintf 'fetched' > \"$1/artifact.txt\"\necho '{\"version\":{\"ref\":\"1\"}}'",
    );
    let url = serve(ActionKind::In, program).await;
    let destination = TempDir::new().unwrap();

    let outcome = proxy_resource::run_action(
        ActionKind::In,
        &request(&url, TOKEN, r#","version":{"ref":"1"}"#),
        Some(destination.path().to_path_buf()),
        |_| {},
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.files.len(), 1);
    assert_eq!(
        std::fs::read_to_string(destination.path().join("artifact.txt")).unwrap(),
        "fetched"
    );
}

#[tokio::test]
async fn test_out_uploads_source_directory() {
    let scripts = TempDir::new().unwrap();
    let program = write_script(
        scripts.path(),
        "out",
        "read request\nwc -c < \"$1/build/output.bin\" | tr -d ' '",
    );
    let url = serve(ActionKind::Out, program).await;

    let source = TempDir::new().unwrap();
    std::fs::create_dir(source.path().join("build")).unwrap();
    std::fs::write(source.path().join("build/output.bin"), vec![7u8; 20_000]).unwrap();

    let outcome = proxy_resource::run_action(
        ActionKind::Out,
        &request(&url, TOKEN, r#","params":{"repository":"build"}"#),
        Some(source.path().to_path_buf()),
        |_| {},
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.messages, vec!["20000".to_string()]);
}

#[tokio::test]
async fn test_wrong_token_fails() {
    let scripts = TempDir::new().unwrap();
    let program = write_script(scripts.path(), "check", "cat");
    let url = serve(ActionKind::Check, program).await;

    let result = proxy_resource::run_action(
        ActionKind::Check,
        &request(&url, "nope", ""),
        None,
        |_| {},
        std::future::pending(),
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_plain_http_url_is_rejected() {
    let result = proxy_resource::run_action(
        ActionKind::Check,
        &request("http://127.0.0.1:1", TOKEN, ""),
        None,
        |_| {},
        std::future::pending(),
    )
    .await;

    assert!(result.is_err());
}
