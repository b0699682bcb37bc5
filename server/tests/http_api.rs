//! HTTP surface smoke tests

use std::sync::Arc;

use webdeployd::app::run::init_orchestrator;
use webdeployd::server::serve::serve;
use webdeployd::server::state::ServerState;
use webdeployd::storage::settings::{ServerSettings, Settings};

async fn start_server() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.data_dir = dir.path().to_string_lossy().to_string();
    settings.cloud.provider = "memory".to_string();
    settings.ai.enabled = false;

    let orchestrator = init_orchestrator(&settings).await.unwrap();
    let state = Arc::new(ServerState::new(orchestrator));

    // Ephemeral port reserved by a throwaway bind.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let options = ServerSettings {
        host: "127.0.0.1".to_string(),
        port,
    };
    serve(&options, state, std::future::pending::<()>())
        .await
        .unwrap();
    (dir, format!("http://127.0.0.1:{}", port))
}

#[tokio::test]
async fn health_and_version_respond() {
    let (_dir, base) = start_server().await;

    let health: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "webdeployd");

    let version: serde_json::Value = reqwest::get(format!("{}/version", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(version["version"].is_string());
}

#[tokio::test]
async fn unknown_deployment_is_a_404_and_list_starts_empty() {
    let (_dir, base) = start_server().await;

    let list: serde_json::Value = reqwest::get(format!("{}/api/deployments", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list, serde_json::json!([]));

    let response = reqwest::get(format!("{}/api/deployments/no-such-id", base))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = reqwest::get(format!("{}/api/deployments/no-such-id/logs", base))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deploy_rejects_a_request_without_an_archive() {
    let (_dir, base) = start_server().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/deploy", base))
        .header(
            "content-type",
            "multipart/form-data; boundary=xxBOUNDARYxx",
        )
        .body(
            "--xxBOUNDARYxx\r\n\
             Content-Disposition: form-data; name=\"mode\"\r\n\r\n\
             path-shared\r\n\
             --xxBOUNDARYxx\r\n\
             Content-Disposition: form-data; name=\"target_name\"\r\n\r\n\
             demo\r\n\
             --xxBOUNDARYxx--\r\n",
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("archive"));
}
