use std::{path::Path, time::Duration};

use axum_test::TestServer;
use serde_json::Value;
use tempfile::TempDir;

use telelocust_config::{
    Config, ConfigMetadata, CorsConfig, LimitsConfig, ServerConfig,
    StorageConfig, TemplateConfig, WorkerSettings,
};
use telelocust_core::testing::{OK_SCRIPT, fake_worker};
use telelocust_server::{
    AppState, create_app,
    infra::startup::{ProdStartupHooks, StartupHooks, build_state},
};

pub const TEST_BODY_LIMIT: usize = 64 * 1024;

// Code is used by test modules, but not in this scope
#[allow(unused)]
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub data: TempDir,
}

pub fn test_config(root: &Path, with_default_script: bool) -> Config {
    let payload_path = root.join("locustfile.py");
    if with_default_script {
        std::fs::write(&payload_path, OK_SCRIPT).unwrap();
    }

    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        storage: StorageConfig {
            data_root: root.join("data"),
        },
        worker: WorkerSettings {
            program: fake_worker().program().to_string_lossy().into_owned(),
            extra_args: Vec::new(),
        },
        template: TemplateConfig {
            host: "http://sut.local".into(),
            users: 5,
            spawn_rate: 1.0,
            run_time: "2s".into(),
            payload_path,
        },
        limits: LimitsConfig {
            max_body_bytes: TEST_BODY_LIMIT,
        },
        cors: CorsConfig::default(),
        metadata: ConfigMetadata::default(),
    }
}

pub async fn build_test_app_with(
    configure: impl FnOnce(&mut Config),
    with_default_script: bool,
) -> TestApp {
    let data = TempDir::new().unwrap();
    let mut config = test_config(data.path(), with_default_script);
    configure(&mut config);

    let state = build_state(config).unwrap();
    ProdStartupHooks.run(&state).await.unwrap();

    let server = TestServer::new(create_app(state.clone())).unwrap();
    TestApp {
        server,
        state,
        data,
    }
}

pub async fn build_test_app() -> TestApp {
    build_test_app_with(|_| {}, true).await
}

/// Polls the status route every 500ms until the run is terminal.
#[allow(unused)]
pub async fn wait_for_terminal(server: &TestServer, token: &str) -> Value {
    for _ in 0..20 {
        let body: Value = server.get(&format!("/runs/{token}")).await.json();
        if matches!(body["state"].as_str(), Some("finished" | "failed")) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("run {token} did not finish in time");
}
