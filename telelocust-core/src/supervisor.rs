//! Load-generator worker processes.

use std::{
    ffi::OsString,
    path::Path,
    process::{ExitStatus, Stdio},
};

use chrono::Utc;
use serde_json::Value;
use tokio::{
    process::{Child, Command},
    sync::{oneshot, watch},
};
use tracing::{debug, info, warn};

use crate::{
    error::{OrchestratorError, Result},
    params::RunParameters,
    run::{CANCELLED_DIAGNOSTIC, Run, RunOutcome, RunState},
    store::WorkspaceLayout,
};

/// Lines of worker stderr quoted in a failure diagnostic.
const STDERR_TAIL_LINES: usize = 10;

/// Exit code recorded when the OS reports no code (killed by a signal).
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// How worker processes are launched.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Load generator executable, looked up on `PATH` when not absolute.
    pub program: String,
    /// Appended after the generated arguments.
    pub extra_args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "locust".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Argument vector for one run. Pure function of its inputs.
pub fn worker_args(
    params: &RunParameters,
    layout: &WorkspaceLayout,
    extra_args: &[String],
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-f".into(),
        layout.payload().into(),
        "--headless".into(),
        "-u".into(),
        params.users.to_string().into(),
        "-r".into(),
        params.spawn_rate.to_string().into(),
        "--run-time".into(),
        params.run_time.clone().into(),
        "--host".into(),
        params.host.clone().into(),
        "--csv".into(),
        layout.csv_prefix().into(),
        "--csv-full-history".into(),
        "--logfile".into(),
        layout.log_file().into(),
        "--json-file".into(),
        layout.result_prefix().into(),
    ];
    args.extend(extra_args.iter().map(OsString::from));
    args
}

/// Exit of a worker as published by its reaper task.
type ReapedExit = Option<std::result::Result<ExitStatus, String>>;

/// Sole owner of a spawned worker process.
///
/// The child itself lives in a reaper task that waits on it as soon as it
/// is spawned, so an exited worker never lingers as a zombie even if no one
/// polls it. The handle only reads what the reaper published.
#[derive(Debug)]
pub struct WorkerHandle {
    pid: Option<u32>,
    exit: watch::Receiver<ReapedExit>,
    kill: Option<oneshot::Sender<()>>,
}

impl WorkerHandle {
    fn new(child: Child) -> Self {
        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(reap(child, pid, kill_rx, exit_tx));
        Self {
            pid,
            exit: exit_rx,
            kill: Some(kill_tx),
        }
    }

    /// OS process id, while the worker has one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check. `Ok(None)` while the worker runs.
    pub fn poll(&self) -> std::io::Result<Option<ExitStatus>> {
        match &*self.exit.borrow() {
            None => Ok(None),
            Some(Ok(status)) => Ok(Some(*status)),
            Some(Err(reason)) => Err(std::io::Error::other(reason.clone())),
        }
    }

    /// Kills the worker if it is still alive and waits until it is reaped.
    pub async fn kill(&mut self) -> std::io::Result<ExitStatus> {
        if let Some(status) = self.poll()? {
            return Ok(status);
        }
        if let Some(kill) = self.kill.take() {
            // The reaper may already be gone with the exit published.
            let _ = kill.send(());
        }

        let mut exit = self.exit.clone();
        let reaped = exit.wait_for(Option::is_some).await.map_err(|_| {
            std::io::Error::other("worker reaper stopped without an exit status")
        })?;
        match &*reaped {
            Some(Ok(status)) => Ok(*status),
            Some(Err(reason)) => Err(std::io::Error::other(reason.clone())),
            None => Err(std::io::Error::other("worker exit status missing")),
        }
    }
}

/// Waits on `child` until it exits, or kills it once `kill` fires or its
/// sender is dropped, then publishes the exit.
async fn reap(
    mut child: Child,
    pid: Option<u32>,
    mut kill: oneshot::Receiver<()>,
    exit: watch::Sender<ReapedExit>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill => {
            if let Err(err) = child.start_kill() {
                debug!(pid = ?pid, error = %err, "worker already gone");
            }
            child.wait().await
        }
    };
    debug!(pid = ?pid, status = ?status, "worker reaped");
    exit.send_replace(Some(status.map_err(|err| err.to_string())));
}

/// Exit code of `status`, or [`SIGNALLED_EXIT_CODE`].
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SIGNALLED_EXIT_CODE)
}

/// Starts worker processes and turns their exits into terminal run states.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    config: WorkerConfig,
}

impl ProcessSupervisor {
    /// Supervisor launching workers per `config`.
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Launch settings.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Worker command for one run, without output redirection.
    pub fn build_command(
        &self,
        params: &RunParameters,
        layout: &WorkspaceLayout,
    ) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(worker_args(params, layout, &self.config.extra_args))
            .current_dir(layout.root())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Spawns the worker without waiting for it. Stdout and stderr are
    /// captured into the workspace.
    pub async fn spawn(
        &self,
        params: &RunParameters,
        layout: &WorkspaceLayout,
    ) -> Result<WorkerHandle> {
        let stdout = create_capture(&layout.stdout_file()).await?;
        let stderr = create_capture(&layout.stderr_file()).await?;

        let mut cmd = self.build_command(params, layout);
        cmd.stdout(stdout).stderr(stderr);
        debug!(command = ?cmd, "starting worker");

        let child = cmd.spawn().map_err(|source| OrchestratorError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        let handle = WorkerHandle::new(child);
        info!(
            pid = ?handle.pid(),
            workspace = %layout.root().display(),
            "worker started"
        );
        Ok(handle)
    }

    /// Records the terminal state of a worker that exited with `exit_code`.
    ///
    /// Reads the structured result file; any problem with it, or a nonzero
    /// exit, marks the run `Failed` with a diagnostic instead of returning
    /// an error. Does nothing if the run is already terminal.
    pub async fn finalize(&self, run: &mut Run, exit_code: i32) -> RunState {
        if run.state().is_terminal() {
            return run.state();
        }

        let layout = WorkspaceLayout::new(&run.workspace);
        let result = read_result(&layout.result_file()).await;

        let (state, diagnostic) = match (&result, exit_code) {
            (Ok(_), 0) => (RunState::Finished, None),
            (Err(err), 0) => (RunState::Failed, Some(err.to_string())),
            (_, code) => {
                let mut message = format!("worker exited with status {code}");
                if let Some(tail) = stderr_tail(&layout.stderr_file()).await {
                    message.push_str(": ");
                    message.push_str(&tail);
                }
                (RunState::Failed, Some(message))
            }
        };

        let outcome = RunOutcome {
            exit_code,
            finished_at: Utc::now(),
            result: result.ok(),
            diagnostic,
        };

        if state == RunState::Failed {
            warn!(
                token = %run.token,
                exit_code,
                diagnostic = outcome.diagnostic.as_deref().unwrap_or_default(),
                "run failed"
            );
        } else {
            info!(token = %run.token, exit_code, "run finished");
        }

        run.complete(state, outcome);
        run.state()
    }

    /// Terminates a live worker and records the run as cancelled.
    pub async fn cancel(&self, run: &mut Run, worker: &mut WorkerHandle) -> RunState {
        if run.state().is_terminal() {
            return run.state();
        }

        let exit_code = match worker.kill().await {
            Ok(status) => exit_code(status),
            Err(err) => {
                warn!(token = %run.token, error = %err, "failed to kill worker");
                SIGNALLED_EXIT_CODE
            }
        };

        run.complete(
            RunState::Failed,
            RunOutcome {
                exit_code,
                finished_at: Utc::now(),
                result: None,
                diagnostic: Some(CANCELLED_DIAGNOSTIC.to_string()),
            },
        );
        info!(token = %run.token, "run cancelled");
        run.state()
    }

    /// Marks a run failed when its worker can no longer be observed.
    pub fn abandon(&self, run: &mut Run, reason: impl Into<String>) -> RunState {
        let reason = reason.into();
        warn!(token = %run.token, reason = %reason, "lost track of worker");
        run.complete(
            RunState::Failed,
            RunOutcome {
                exit_code: SIGNALLED_EXIT_CODE,
                finished_at: Utc::now(),
                result: None,
                diagnostic: Some(reason),
            },
        );
        run.state()
    }
}

async fn create_capture(path: &Path) -> Result<std::fs::File> {
    let file = tokio::fs::File::create(path)
        .await
        .map_err(|err| OrchestratorError::io(path, err))?;
    Ok(file.into_std().await)
}

async fn read_result(path: &Path) -> Result<Value> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        OrchestratorError::ResultParse(format!(
            "result file {}: {err}",
            path.display()
        ))
    })?;
    serde_json::from_slice(&bytes).map_err(|err| {
        OrchestratorError::ResultParse(format!(
            "result file {}: {err}",
            path.display()
        ))
    })
}

async fn stderr_tail(path: &Path) -> Option<String> {
    let content = tokio::fs::read(path).await.ok()?;
    let text = String::from_utf8_lossy(&content);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    Some(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        params::{JobTemplate, RunOverrides},
        testing,
        token::RunToken,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    fn params() -> RunParameters {
        JobTemplate::new("http://sut.local", 5, 1.0, "2s", b"x".to_vec())
            .unwrap()
            .resolve(RunOverrides::default())
            .unwrap()
    }

    fn run_in(workspace: &Path) -> Run {
        Run::new(
            RunToken::generate(),
            Arc::new(params()),
            workspace.to_path_buf(),
        )
    }

    #[test]
    fn worker_args_follow_fixed_contract() {
        let layout = WorkspaceLayout::new("/data/tok");
        let args = worker_args(&params(), &layout, &["--only-summary".to_string()]);
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "-f",
                "/data/tok/locustfile.py",
                "--headless",
                "-u",
                "5",
                "-r",
                "1",
                "--run-time",
                "2s",
                "--host",
                "http://sut.local",
                "--csv",
                "/data/tok/loadtest",
                "--csv-full-history",
                "--logfile",
                "/data/tok/locust.log",
                "--json-file",
                "/data/tok/result",
                "--only-summary",
            ]
        );
    }

    #[test]
    fn build_command_runs_inside_workspace() {
        let layout = WorkspaceLayout::new("/data/tok");
        let supervisor = ProcessSupervisor::new(WorkerConfig {
            program: "/opt/locust/bin/locust".into(),
            extra_args: Vec::new(),
        });
        let cmd = supervisor.build_command(&params(), &layout);
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "/opt/locust/bin/locust");
        assert_eq!(std_cmd.get_current_dir(), Some(Path::new("/data/tok")));
        assert_eq!(std_cmd.get_args().count(), 18);
    }

    #[tokio::test]
    async fn spawn_of_missing_binary_is_reported() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        let supervisor = ProcessSupervisor::new(WorkerConfig {
            program: tmp
                .path()
                .join("no-such-worker")
                .to_string_lossy()
                .into_owned(),
            extra_args: Vec::new(),
        });

        let err = supervisor.spawn(&params(), &layout).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Spawn { .. }), "{err}");
    }

    #[tokio::test]
    async fn finalize_with_result_and_zero_exit_finishes() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("result.json"), br#"[{"num_requests": 3}]"#)
            .unwrap();
        let mut run = run_in(tmp.path());
        run.mark_running();

        let state = ProcessSupervisor::default().finalize(&mut run, 0).await;
        assert_eq!(state, RunState::Finished);

        let outcome = run.outcome().unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.result.as_ref().unwrap()[0]["num_requests"], 3);
        assert!(outcome.diagnostic.is_none());
    }

    #[tokio::test]
    async fn finalize_without_result_fails_with_diagnostic() {
        let tmp = TempDir::new().unwrap();
        let mut run = run_in(tmp.path());

        let state = ProcessSupervisor::default().finalize(&mut run, 0).await;
        assert_eq!(state, RunState::Failed);
        let diagnostic = run.outcome().unwrap().diagnostic.clone().unwrap();
        assert!(diagnostic.contains("result.json"), "{diagnostic}");
    }

    #[tokio::test]
    async fn finalize_with_corrupt_result_fails() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("result.json"), b"{not json").unwrap();
        let mut run = run_in(tmp.path());

        let state = ProcessSupervisor::default().finalize(&mut run, 0).await;
        assert_eq!(state, RunState::Failed);
        assert!(run.outcome().unwrap().result.is_none());
    }

    #[tokio::test]
    async fn finalize_nonzero_exit_quotes_stderr_and_keeps_result() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("result.json"), b"[]").unwrap();
        let stderr: String = (1..=15).map(|i| format!("line {i}\n")).collect();
        std::fs::write(tmp.path().join(crate::store::STDERR_FILE), stderr).unwrap();
        let mut run = run_in(tmp.path());

        let state = ProcessSupervisor::default().finalize(&mut run, 1).await;
        assert_eq!(state, RunState::Failed);

        let outcome = run.outcome().unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.result, Some(serde_json::json!([])));
        let diagnostic = outcome.diagnostic.as_deref().unwrap();
        assert!(diagnostic.starts_with("worker exited with status 1"));
        assert!(diagnostic.contains("line 15"));
        assert!(!diagnostic.contains("line 5\n"));
    }

    #[tokio::test]
    async fn finalize_is_a_no_op_once_terminal() {
        let tmp = TempDir::new().unwrap();
        let mut run = run_in(tmp.path());
        let supervisor = ProcessSupervisor::default();

        supervisor.finalize(&mut run, 0).await;
        let first = run.snapshot();

        std::fs::write(tmp.path().join("result.json"), b"{}").unwrap();
        supervisor.finalize(&mut run, 0).await;
        assert_eq!(run.snapshot(), first);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn poll_is_idempotent_after_exit() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        std::fs::write(layout.payload(), testing::INVALID_SCRIPT).unwrap();

        let supervisor = ProcessSupervisor::new(testing::fake_worker().config());
        let mut handle = supervisor.spawn(&params(), &layout).await.unwrap();

        let status = wait_for_exit(&handle).await;
        assert_eq!(exit_code(status), 1);
        for _ in 0..5 {
            assert_eq!(handle.poll().unwrap(), Some(status));
        }
        assert_eq!(handle.kill().await.unwrap(), status);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_live_worker() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        std::fs::write(layout.payload(), testing::SLOW_SCRIPT).unwrap();

        let supervisor = ProcessSupervisor::new(testing::fake_worker().config());
        let mut handle = supervisor.spawn(&params(), &layout).await.unwrap();
        assert!(handle.poll().unwrap().is_none());
        let pid = handle.pid().expect("live worker has a pid");

        let mut run = run_in(tmp.path());
        run.mark_running();
        let state = supervisor.cancel(&mut run, &mut handle).await;

        assert_eq!(state, RunState::Failed);
        assert_eq!(
            run.outcome().unwrap().diagnostic.as_deref(),
            Some(CANCELLED_DIAGNOSTIC)
        );
        assert!(handle.poll().unwrap().is_some());
        assert!(!tmp.path().join("result.json").exists());
        if cfg!(target_os = "linux") {
            assert!(!Path::new(&format!("/proc/{pid}")).exists());
        }
    }

    async fn wait_for_exit(handle: &WorkerHandle) -> ExitStatus {
        for _ in 0..200 {
            if let Some(status) = handle.poll().unwrap() {
                return status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("worker did not exit in time");
    }
}
