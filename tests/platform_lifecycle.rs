//! Install, run, remove and uninstall against the in-memory engine.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use kess::engine::ContainerEngine;
use kess::labels::{APP_LABEL, LabelFilter, SIDECAR_LABEL};
use kess::runtime::{
    DashboardOptions, DockerRuntime, DockerRuntimeConfig, RemoveOptions, RunOptions, Runtime,
};
use kess::testing::FakeEngine;

fn docker(engine: &Arc<FakeEngine>, dir: &std::path::Path) -> DockerRuntime {
    DockerRuntime::with_engine(
        DockerRuntimeConfig {
            manifest_dir: dir.to_path_buf(),
            ..Default::default()
        },
        engine.clone(),
    )
}

fn orders() -> RunOptions {
    RunOptions {
        app_id: "orders".to_string(),
        image: Some("orders:dev".to_string()),
        command: vec!["./orders".to_string()],
        app_port: Some(3000),
        ..Default::default()
    }
}

async fn labeled_containers(engine: &FakeEngine) -> usize {
    engine
        .list_containers(&LabelFilter::group())
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn full_lifecycle_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new());
    let runtime = docker(&engine, dir.path());

    runtime.install().await.unwrap();

    let platform: Vec<String> = engine
        .ops_on("create_container")
        .into_iter()
        .filter(|name| !name.starts_with("kess-tools-"))
        .collect();
    assert_eq!(
        platform,
        vec![
            "kess-system-redis",
            "kess-system-zipkin",
            "kess-system-placement",
            "kess-system-ingress",
        ]
    );
    assert_eq!(engine.network_names(), vec!["kess"]);
    assert_eq!(engine.volume_names(), vec!["kess-configs"]);
    assert_eq!(labeled_containers(&engine).await, 4);
    assert!(dir.path().join("config.yaml").is_file());
    assert!(dir.path().join("components").join("statestore.yaml").is_file());
    assert!(dir.path().join("components").join("pubsub.yaml").is_file());

    runtime.run(orders()).await.unwrap();
    assert_eq!(labeled_containers(&engine).await, 6);
    let app = engine
        .list_containers(&LabelFilter::key_value(APP_LABEL, "orders"))
        .await
        .unwrap();
    assert_eq!(app.len(), 2);
    let sidecar = engine
        .list_containers(&LabelFilter::key(SIDECAR_LABEL))
        .await
        .unwrap();
    assert_eq!(sidecar.len(), 1);
    assert_eq!(sidecar[0].name, "kess-app-orders-sidecar");

    runtime
        .remove(RemoveOptions {
            app_id: "orders".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(labeled_containers(&engine).await, 4);

    runtime.uninstall().await.unwrap();

    let filter = LabelFilter::group();
    assert!(engine.list_containers(&filter).await.unwrap().is_empty());
    assert!(engine.list_volumes(&filter).await.unwrap().is_empty());
    assert!(engine.list_networks(&filter).await.unwrap().is_empty());
}

#[tokio::test]
async fn install_twice_reports_existing_container() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new());
    let runtime = docker(&engine, dir.path());

    runtime.install().await.unwrap();
    let err = runtime.install().await.unwrap_err();

    assert!(
        err.to_string().contains("kess-system-redis"),
        "unexpected error: {err}"
    );
    // Network and volume creation stayed idempotent.
    assert_eq!(engine.network_names(), vec!["kess"]);
    assert_eq!(engine.volume_names(), vec!["kess-configs"]);
}

#[tokio::test]
async fn sidecar_shares_the_app_network_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new());
    let runtime = docker(&engine, dir.path());
    runtime.install().await.unwrap();

    runtime.run(orders()).await.unwrap();

    let sidecar = engine.container("kess-app-orders-sidecar").unwrap();
    assert_eq!(
        sidecar.request.network_mode.as_deref(),
        Some("container:kess-app-orders")
    );
    let cmd = &sidecar.request.cmd;
    let tail = &cmd[cmd.len() - 4..];
    assert_eq!(tail, &["--app-id", "orders", "--app-port", "3000"]);
}

#[tokio::test]
async fn failed_sidecar_rolls_back_the_app() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new());
    let runtime = docker(&engine, dir.path());
    runtime.install().await.unwrap();
    engine.fail_on("create_container:kess-app-orders-sidecar");

    assert!(runtime.run(orders()).await.is_err());

    assert!(engine.container("kess-app-orders").is_none());
    assert_eq!(labeled_containers(&engine).await, 4);
}

#[tokio::test]
async fn dashboard_is_removed_by_uninstall() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new());
    let runtime = docker(&engine, dir.path());
    runtime.install().await.unwrap();

    runtime
        .dashboard(DashboardOptions { port: Some(9999) })
        .await
        .unwrap();
    assert!(engine.container("kess-system-dashboard").is_some());

    runtime.uninstall().await.unwrap();
    assert!(engine.container_names().is_empty());
}

#[tokio::test]
async fn remove_unknown_app_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new());
    let runtime = docker(&engine, dir.path());

    runtime
        .remove(RemoveOptions {
            app_id: "ghost".to_string(),
        })
        .await
        .unwrap();
}
