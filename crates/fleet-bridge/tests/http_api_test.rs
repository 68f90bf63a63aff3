use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fleet_bridge::control::{ControlError, FleetControl};
use fleet_bridge::event_bus::EventBus;
use fleet_bridge::http_api::{api_router, ApiState};
use fleet_core::config::{Config, ConfigError};
use fleet_core::config_store::{ConfigSnapshot, ConfigSource, ConfigStore};
use fleet_core::types::{WorkerState, WorkerStatus};
use serde_json::{json, Value};

struct RecordingControl {
    store: ConfigStore,
    restarted: Mutex<Vec<String>>,
}

#[async_trait]
impl FleetControl for RecordingControl {
    fn status(&self) -> Vec<WorkerStatus> {
        let mut runner = WorkerStatus::new("task_runner", 5_000);
        runner.state = WorkerState::Running;
        let mut refiner = WorkerStatus::new("refiner", 10_000);
        refiner.state = WorkerState::Crashed;
        refiner.last_error = Some("tick panicked".into());
        vec![runner, refiner]
    }

    fn trigger_reload(&self, source: &ConfigSource) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        self.store.reload(source)
    }

    async fn restart_worker(&self, name: &str) -> Result<(), ControlError> {
        if name == "task_runner" || name == "refiner" {
            self.restarted.lock().unwrap().push(name.to_string());
            Ok(())
        } else {
            Err(ControlError::UnknownWorker(name.to_string()))
        }
    }
}

struct TestServer {
    base: String,
    store: ConfigStore,
    control: Arc<RecordingControl>,
    bus: EventBus,
}

/// Spin up an API server on a random port.
async fn start_test_server(reload_source: Option<ConfigSource>) -> TestServer {
    let store = match &reload_source {
        Some(source) => ConfigStore::open(source).unwrap(),
        None => ConfigStore::new(Config::default()).unwrap(),
    };
    let control = Arc::new(RecordingControl {
        store: store.clone(),
        restarted: Mutex::new(Vec::new()),
    });
    let bus = EventBus::new();
    let mut state = ApiState::new(control.clone(), store.clone(), bus.clone());
    if let Some(source) = reload_source {
        state = state.with_reload_source(source);
    }
    let router = api_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to ephemeral port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        store,
        control,
        bus,
    }
}

#[tokio::test]
async fn test_get_status() {
    let server = start_test_server(None).await;
    let _sub = server.bus.subscribe("tasks");

    let resp = reqwest::get(format!("{}/api/status", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert!(body["version"].is_string());
    assert!(body["uptime_seconds"].is_number());
    assert_eq!(body["config_version"], 1);
    assert_eq!(body["workers"][0]["name"], "task_runner");
    assert_eq!(body["workers"][0]["state"], "running");
    assert_eq!(body["workers"][1]["state"], "crashed");
    assert_eq!(body["workers"][1]["last_error"], "tick panicked");
    assert_eq!(body["bus"]["topics"], 1);
    assert_eq!(body["bus"]["subscribers"], 1);
}

#[tokio::test]
async fn test_get_config_includes_unknown_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("system_parameters.json");
    std::fs::write(
        &path,
        r#"{"task_list": ["backup_database"], "recursive_refinement": true, "cpu_threshold": 80}"#,
    )
    .unwrap();
    let server = start_test_server(Some(ConfigSource::file(&path))).await;

    let body: Value = reqwest::get(format!("{}/api/config", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["version"], 1);
    assert_eq!(body["config"]["task_list"], json!(["backup_database"]));
    assert_eq!(body["config"]["recursive_refinement"], true);
    assert_eq!(body["config"]["cpu_threshold"], 80);
}

#[tokio::test]
async fn test_put_config_swaps_valid_document() {
    let server = start_test_server(None).await;
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{}/api/config", server.base))
        .json(&json!({"task_list": ["data_cleaning"], "recursive_refinement": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["version"], 2);

    let current = server.store.current();
    assert_eq!(current.version, 2);
    assert_eq!(current.config.task_list, vec!["data_cleaning".to_string()]);
    assert!(current.config.recursive_refinement);
}

#[tokio::test]
async fn test_put_invalid_config_leaves_running_config() {
    let server = start_test_server(None).await;
    let before = server.store.current();
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{}/api/config", server.base))
        .json(&json!({"task_list": ["a", "a"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("duplicate"));

    let after = server.store.current();
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn test_reload_reads_file_again() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("system_parameters.json");
    std::fs::write(&path, r#"{"task_list": ["a"]}"#).unwrap();
    let server = start_test_server(Some(ConfigSource::file(&path))).await;
    let client = reqwest::Client::new();

    std::fs::write(&path, r#"{"task_list": ["a", "b"]}"#).unwrap();
    let resp = client
        .post(format!("{}/api/reload", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["version"], 2);

    std::fs::write(&path, r#"{"task_list": "#).unwrap();
    let resp = client
        .post(format!("{}/api/reload", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(server.store.version(), 2);
    assert_eq!(
        server.store.current().config.task_list,
        vec!["a".to_string(), "b".to_string()]
    );
}

#[tokio::test]
async fn test_restart_worker() {
    let server = start_test_server(None).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/workers/refiner/restart", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["restarted"], "refiner");
    assert_eq!(*server.control.restarted.lock().unwrap(), vec!["refiner"]);

    let resp = client
        .post(format!("{}/api/workers/ghost/restart", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
