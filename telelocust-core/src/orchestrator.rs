//! Submission, polling, cancellation and packaging of runs.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    error::{OrchestratorError, Result},
    params::{JobTemplate, RunOverrides},
    registry::{RunEntry, RunRegistry},
    run::{Run, RunSnapshot, RunSummary},
    store::ArtifactStore,
    supervisor::{ProcessSupervisor, exit_code},
    token::RunToken,
};

/// Entry point for the transport layer: submit runs, observe them, cancel
/// them and package their workspaces.
#[derive(Debug)]
pub struct RunOrchestrator {
    template: JobTemplate,
    store: ArtifactStore,
    registry: RunRegistry,
    supervisor: ProcessSupervisor,
}

impl RunOrchestrator {
    /// Orchestrator with an empty registry.
    pub fn new(
        template: JobTemplate,
        store: ArtifactStore,
        supervisor: ProcessSupervisor,
    ) -> Self {
        Self {
            template,
            store,
            registry: RunRegistry::new(),
            supervisor,
        }
    }

    /// Defaults submissions start from.
    pub fn template(&self) -> &JobTemplate {
        &self.template
    }

    /// Workspace store.
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Registered runs.
    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Validates `overrides`, prepares a workspace and starts the worker.
    ///
    /// The run becomes visible to [`query`](Self::query) only once every
    /// step has succeeded; on error no token is handed out.
    pub async fn submit(&self, overrides: RunOverrides) -> Result<RunToken> {
        let params = Arc::new(self.template.resolve(overrides)?);
        let token = RunToken::generate();

        let layout = self.store.create_workspace(&token).await.map_err(|err| {
            error!(token = %token, error = %err, "failed to create workspace");
            err
        })?;

        self.store
            .write_payload(&layout, &params.payload)
            .await
            .map_err(|err| {
                error!(token = %token, error = %err, "failed to write worker payload");
                err
            })?;

        let worker = self.supervisor.spawn(&params, &layout).await.map_err(|err| {
            error!(token = %token, error = %err, "failed to start worker");
            err
        })?;

        let run = Run::new(token.clone(), params, layout.root().to_path_buf());
        // The handle is dropped (and the worker killed) if this fails.
        self.registry.insert(token.clone(), RunEntry::new(run, worker))?;

        info!(token = %token, "run submitted");
        Ok(token)
    }

    /// Current state of a run, advancing it if its worker has exited since
    /// the last call. Terminal snapshots never change.
    pub async fn query(&self, raw_token: &str) -> Result<RunSnapshot> {
        let token = lookup_token(raw_token)?;
        let shared = self.registry.get(&token)?;
        let mut entry = shared.lock().await;
        self.refresh(&mut entry).await;
        Ok(entry.run.snapshot())
    }

    /// Zip of everything currently in the run's workspace. Live runs are
    /// packaged as-is.
    pub async fn package(&self, raw_token: &str) -> Result<(RunToken, Vec<u8>)> {
        let token = lookup_token(raw_token)?;
        let workspace = {
            let shared = self.registry.get(&token)?;
            let entry = shared.lock().await;
            entry.run.workspace.clone()
        };

        let bytes = self.store.package(workspace).await?;
        info!(token = %token, bytes = bytes.len(), "workspace packaged");
        Ok((token, bytes))
    }

    /// Stops a live run's worker and records it as cancelled. Runs that
    /// already reached a terminal state are returned unchanged.
    pub async fn cancel(&self, raw_token: &str) -> Result<RunSnapshot> {
        let token = lookup_token(raw_token)?;
        let shared = self.registry.get(&token)?;
        let mut entry = shared.lock().await;
        self.refresh(&mut entry).await;

        let RunEntry { run, worker } = &mut *entry;
        if !run.state().is_terminal() {
            match worker.as_mut() {
                Some(worker) => {
                    self.supervisor.cancel(run, worker).await;
                }
                None => {
                    self.supervisor.abandon(run, "worker handle missing");
                }
            }
        }
        Ok(entry.run.snapshot())
    }

    /// Every submitted run, oldest first.
    pub async fn list(&self) -> Vec<RunSummary> {
        self.registry.summaries().await
    }

    /// Polls the worker once. Must be called with the entry locked, which
    /// makes finalization happen at most once per run.
    async fn refresh(&self, entry: &mut RunEntry) {
        let RunEntry { run, worker } = entry;
        if run.state().is_terminal() {
            return;
        }

        let Some(worker) = worker.as_ref() else {
            self.supervisor.abandon(run, "worker handle missing");
            return;
        };

        match worker.poll() {
            Ok(None) => run.mark_running(),
            Ok(Some(status)) => {
                run.mark_running();
                self.supervisor.finalize(run, exit_code(status)).await;
            }
            Err(err) => {
                warn!(token = %run.token, error = %err, "worker poll failed");
                self.supervisor
                    .abandon(run, format!("failed to poll worker: {err}"));
            }
        }
    }
}

/// Caller-supplied tokens that are not plain identifiers cannot name any
/// run, so they are reported the same way as unknown ones.
fn lookup_token(raw: &str) -> Result<RunToken> {
    RunToken::parse(raw)
        .map_err(|_| OrchestratorError::NotFound(format!("run {raw:?}")))
}
