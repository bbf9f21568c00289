use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use telelocust_config::Config;
use telelocust_core::{
    ArtifactStore, ProcessSupervisor, RunOrchestrator,
};

use crate::infra::app_state::AppState;

/// Turns a loaded configuration into the shared application state.
///
/// The default worker script is read once here; a missing file leaves the
/// template without a payload.
pub fn build_state(config: Config) -> Result<AppState> {
    let payload = config
        .template
        .read_payload()
        .with_context(|| {
            format!(
                "failed to read default worker script {}",
                config.template.payload_path.display()
            )
        })?
        .unwrap_or_default();

    let template = config
        .template
        .job_template(payload)
        .context("invalid run template")?;
    if !template.has_payload() {
        warn!("no default worker script loaded; every submission must carry one");
    }

    let orchestrator = RunOrchestrator::new(
        template,
        ArtifactStore::new(config.data_root()),
        ProcessSupervisor::new(config.worker_config()),
    );
    Ok(AppState::new(orchestrator, config))
}

#[async_trait]
pub trait StartupHooks: Send + Sync {
    async fn run(&self, state: &AppState) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct ProdStartupHooks;

#[async_trait]
impl StartupHooks for ProdStartupHooks {
    async fn run(&self, state: &AppState) -> Result<()> {
        let store = state.orchestrator().store();
        store
            .ensure_root()
            .await
            .context("failed to prepare data root")?;

        let template = state.orchestrator().template();
        info!(
            data_root = %store.root().display(),
            worker = %state.config().worker.program,
            target = %template.host(),
            "run orchestrator ready"
        );
        Ok(())
    }
}

