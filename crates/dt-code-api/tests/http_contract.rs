//! End-to-end coverage of the HTTP facade: build a real `Router` over
//! `AppState` and drive it with `tower::ServiceExt::oneshot`, the same way
//! an axum service gets exercised without binding a socket.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use dt_code_api::docker_rt::DockerRuntime;
use dt_code_api::http::{build_router, AppState};
use dt_code_api::image_index_client::ImageIndexClient;
use dt_code_api::module::{Module, ModuleIdentity};
use dt_code_api::module_updater::ModuleUpdater;
use dt_code_api::registry::Registry;
use dt_code_api::run_container::RunContainerWorker;
use dt_code_api::update_checker::UpdateChecker;
use serde_json::Value;
use tower::ServiceExt;

fn test_state() -> AppState {
    let registry = Arc::new(Registry::new());
    let docker = Arc::new(DockerRuntime::connect("unix:///var/run/docker.sock").unwrap());
    let alive = Arc::new(AtomicBool::new(true));

    let index_client = ImageIndexClient::new(
        "https://duckietown-public-storage.s3.amazonaws.com/docker/image".to_string(),
        "docker.io".to_string(),
    );
    let checker = Arc::new(
        UpdateChecker::new(
            Arc::clone(&registry),
            Arc::clone(&docker),
            index_client,
            "daffy".to_string(),
            false,
            Arc::clone(&alive),
        )
        .unwrap(),
    );
    let updater = Arc::new(ModuleUpdater::new(
        Arc::clone(&registry),
        Arc::clone(&docker),
        Some("dt-code-api".to_string()),
        "docker.io".to_string(),
        None,
        "/data/stacks".to_string(),
        Arc::clone(&alive),
    ));
    let runner = Arc::new(RunContainerWorker::new(
        Arc::clone(&registry),
        Arc::clone(&docker),
        Some("dt-code-api".to_string()),
        Arc::clone(&alive),
    ));

    AppState {
        registry,
        docker,
        checker,
        updater,
        runner,
        version: "0.1.0-test".to_string(),
    }
}

fn router() -> Router {
    build_router(test_state())
}

async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().method(Method::GET).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

#[tokio::test]
async fn version_reports_configured_version() {
    let (status, json) = get(router(), "/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["version"], "0.1.0-test");
}

#[tokio::test]
async fn modules_info_is_empty_with_no_registered_modules() {
    let (status, json) = get(router(), "/modules/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"], serde_json::json!({}));
}

#[tokio::test]
async fn modules_status_is_empty_with_no_registered_modules() {
    let (status, json) = get(router(), "/modules/status").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn update_module_errors_for_unknown_module() {
    let (status, json) = get(router(), "/module/update/nope").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn run_container_errors_for_unknown_module_without_spawning_a_job() {
    let (status, json) = get(router(), "/container/run/nope").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn run_container_spawns_a_job_and_returns_immediately_for_a_known_module() {
    let state = test_state();
    let identity = ModuleIdentity {
        name: "dt-core".to_string(),
        repository: "duckietown/dt-core".to_string(),
        tag: "daffy-amd64".to_string(),
        image_id: "sha256:deadbeef".to_string(),
    };
    let module = Arc::new(Module::new(identity, Default::default()));
    state.registry.set("modules", "dt-core", module);

    let app = build_router(state);
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/container/run/dt-core")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // The handler returns the {job} envelope as soon as the worker is
    // spawned, not after the container reaches a terminal state -- this
    // request must resolve without ever touching a Docker daemon.
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["data"]["job"], "dt-core");
}
