//! HTTP surface tests: requests go through the real router and app state

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use deploymaster::app::options::AppOptions;
use deploymaster::app::state::AppState;
use deploymaster::filesys::dir::Dir;
use deploymaster::models::task::TaskDefinition;
use deploymaster::server::serve::router;
use deploymaster::server::state::ServerState;
use deploymaster::storage::layout::StorageLayout;
use deploymaster::storage::settings::Settings;

use crate::fixtures::{node, resource};

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

/// App state under a temp data dir whose svn client hangs, so runs stay in
/// DOWNLOADING for a while
#[cfg(unix)]
async fn app_with_slow_svn(dir: &Dir) -> (Arc<AppState>, String) {
    use std::os::unix::fs::PermissionsExt;

    let svn = dir.path().join("slow-svn.sh");
    std::fs::write(&svn, "#!/bin/sh\nsleep 5\n").unwrap();
    std::fs::set_permissions(&svn, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut settings = Settings::default();
    settings.engine.svn_binary = svn.to_string_lossy().to_string();
    let options = AppOptions::from_settings(&settings, StorageLayout::new(dir.path().join("data")));
    let app = AppState::init(&options).await.unwrap();

    app.nodes.add_node(node("m", "M", true)).await.unwrap();
    app.resources.add_resource(resource()).await.unwrap();
    let task = app
        .tasks
        .create_task(TaskDefinition {
            name: "deploy app".to_string(),
            svn_resource_id: "svn-1".to_string(),
            master_server_id: "m".to_string(),
            remote_path: "/opt/app".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    (Arc::new(app), task.id)
}

#[tokio::test]
async fn test_health() {
    let dir = Dir::create_temp_dir("dm-http-health").await.unwrap();
    let options = AppOptions::from_settings(&Settings::default(), StorageLayout::new(dir.path()));
    let app = Arc::new(AppState::init(&options).await.unwrap());
    let router = router(Arc::new(ServerState::new(app)), &[]);

    let (status, body) = send(&router, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&router, Method::GET, "/runs/run-missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    dir.delete().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_live_run_conflicts_over_http() {
    let dir = Dir::create_temp_dir("dm-http-runs").await.unwrap();
    let (app, task_id) = app_with_slow_svn(&dir).await;
    let router = router(Arc::new(ServerState::new(app)), &[]);
    let runs_uri = format!("/tasks/{}/runs", task_id);

    let (status, run) = send(&router, Method::POST, &runs_uri).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = run["id"].as_str().unwrap().to_string();

    let (status, body) = send(&router, Method::POST, &runs_uri).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, body) = send(&router, Method::DELETE, &format!("/runs/{}", run_id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = send(&router, Method::DELETE, &runs_uri).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&router, Method::DELETE, &format!("/tasks/{}", task_id)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, cancelled) = send(&router, Method::POST, &format!("/runs/{}/cancel", run_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "FAILED");
}
