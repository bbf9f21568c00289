//! # Telelocust Server
//!
//! Starts Locust load tests on request and keeps their artifacts on disk.
//!
//! Each `POST /runs/start` gets its own workspace under the data root and one
//! headless Locust process. Clients poll `GET /runs/{token}` until the run is
//! `finished` or `failed`, then fetch `GET /runs/{token}/download`.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telelocust_config::{
    ConfigLoad, ConfigLoader, ConfigLoaderOptions, ConfigOverrides,
};
use telelocust_server::{
    create_app,
    infra::startup::{ProdStartupHooks, StartupHooks, build_state},
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "telelocust-server")]
#[command(about = "Runs Locust load tests on demand over HTTP", version)]
struct ServeArgs {
    /// Path to a telelocust.toml configuration file
    #[arg(short, long, env = "TELELOCUST_CONFIG")]
    config: Option<PathBuf>,

    /// Dotenv file to load before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding one workspace per run (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Load generator executable (overrides config)
    #[arg(long)]
    worker: Option<String>,

    /// Default worker script used when a submission has none
    #[arg(long)]
    locustfile: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServeArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let ConfigLoad { config, warnings } =
        ConfigLoader::with_options(ConfigLoaderOptions {
            config_path: args.config,
            env_file: args.env_file,
            overrides: ConfigOverrides {
                host: args.host,
                port: args.port,
                data_root: args.data_dir,
                worker_program: args.worker,
                payload_path: args.locustfile,
            },
        })
        .load()
        .context("failed to load configuration")?;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "using configuration file");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    let addr = config.bind_address();
    let state = build_state(config)?;
    ProdStartupHooks.run(&state).await?;

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting Telelocust server (HTTP) on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
