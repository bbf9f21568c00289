#![cfg(unix)]

use std::{io::Cursor, path::Path, time::Duration};

use tempfile::TempDir;
use zip::ZipArchive;

use telelocust_config::{
    Config, ConfigMetadata, CorsConfig, LimitsConfig, ServerConfig,
    StorageConfig, TemplateConfig, WorkerSettings,
};
use telelocust_core::{
    RunState,
    testing::{INVALID_SCRIPT, OK_SCRIPT, SLOW_SCRIPT, fake_worker},
};
use telelocust_server::{
    create_app,
    infra::startup::{ProdStartupHooks, StartupHooks, build_state},
};
use telelocustctl::{ClientError, StartRequest, TelelocustClient};

const POLL: Duration = Duration::from_millis(200);

struct LiveServer {
    url: String,
    dir: TempDir,
}

fn config_for(root: &Path) -> Config {
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
            users: 4,
            spawn_rate: 1.0,
            run_time: "2s".into(),
            payload_path: root.join("missing.py"),
        },
        limits: LimitsConfig {
            max_body_bytes: 1024 * 1024,
        },
        cors: CorsConfig::default(),
        metadata: ConfigMetadata::default(),
    }
}

async fn spawn_server() -> LiveServer {
    let dir = TempDir::new().unwrap();
    let state = build_state(config_for(dir.path())).unwrap();
    ProdStartupHooks.run(&state).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_app(state)).await.unwrap();
    });

    LiveServer {
        url: format!("http://{addr}"),
        dir,
    }
}

fn script(dir: &Path, name: &str, body: &str) -> StartRequest {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    StartRequest::new(path)
}

#[tokio::test]
async fn start_wait_and_download() {
    let server = spawn_server().await;
    let client = TelelocustClient::new(&server.url).unwrap();

    let request = StartRequest {
        users: Some(7),
        ..script(server.dir.path(), "ok.py", OK_SCRIPT)
    };
    let token = client.start(&request).await.unwrap();

    let snapshot = client.wait(&token, POLL).await.unwrap();
    assert_eq!(snapshot.state, RunState::Finished);
    assert_eq!(snapshot.parameters.users, 7);
    assert!(client.is_finished(&token).await.unwrap());

    let target = server.dir.path().join("out").join("run.zip");
    let written = client.download(&token, &target, false).await.unwrap();
    let bytes = std::fs::read(&target).unwrap();
    assert_eq!(written, bytes.len() as u64);

    let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"locustfile.py"), "{names:?}");
    assert!(names.contains(&"result.json"), "{names:?}");
}

#[tokio::test]
async fn live_run_download_needs_partial() {
    let server = spawn_server().await;
    let client = TelelocustClient::new(&server.url).unwrap();

    let token = client
        .start(&script(server.dir.path(), "slow.py", SLOW_SCRIPT))
        .await
        .unwrap();
    let target = server.dir.path().join("partial.zip");

    let err = client.download(&token, &target, false).await.unwrap_err();
    assert!(matches!(err, ClientError::StillRunning { .. }), "{err}");
    assert!(!target.exists());

    client.download(&token, &target, true).await.unwrap();
    assert!(target.exists());
}

#[tokio::test]
async fn failed_run_is_terminal() {
    let server = spawn_server().await;
    let client = TelelocustClient::new(&server.url).unwrap();

    let token = client
        .start(&script(server.dir.path(), "bad.py", INVALID_SCRIPT))
        .await
        .unwrap();
    let snapshot = client.wait(&token, POLL).await.unwrap();
    assert_eq!(snapshot.state, RunState::Failed);
    assert_eq!(snapshot.exit_code, Some(1));
}

#[tokio::test]
async fn server_errors_carry_the_message() {
    let server = spawn_server().await;
    let client = TelelocustClient::new(&server.url).unwrap();

    let request = StartRequest {
        run_time: Some("whenever".into()),
        ..script(server.dir.path(), "ok.py", OK_SCRIPT)
    };
    match client.start(&request).await.unwrap_err() {
        ClientError::Api { status, message } => {
            assert_eq!(status.as_u16(), 400);
            assert!(message.contains("run_time"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let unknown = telelocustctl::parse_token("ffffffffffffffffffffffffffffffff").unwrap();
    match client.status(&unknown).await.unwrap_err() {
        ClientError::Api { status, .. } => assert_eq!(status.as_u16(), 404),
        other => panic!("unexpected error: {other}"),
    }
}
