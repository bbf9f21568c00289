//! Run lifecycle and the snapshots handed to callers.

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};
use serde_json::Value;

use crate::{
    params::{ParametersView, RunParameters},
    token::RunToken,
};

/// Lifecycle position of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Registered, worker spawned, not yet observed by a poll.
    Started,
    /// Worker observed alive at least once.
    Running,
    /// Worker exited with status 0.
    Finished,
    /// Worker exited non-zero, was killed, or was cancelled.
    Failed,
}

impl RunState {
    /// `Finished` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Finished | RunState::Failed)
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Started => "started",
            RunState::Running => "running",
            RunState::Finished => "finished",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic recorded when a run is cancelled.
pub const CANCELLED_DIAGNOSTIC: &str = "Cancelled";

/// Outcome fields written exactly once, on the transition into a terminal
/// state.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Worker exit code, `-1` when it was killed by a signal.
    pub exit_code: i32,
    /// When the terminal state was recorded.
    pub finished_at: DateTime<Utc>,
    /// Parsed `result.json`, if the worker wrote one.
    pub result: Option<Value>,
    /// Why the run failed, or why its result is missing.
    pub diagnostic: Option<String>,
}

/// A registered run and its lifecycle.
#[derive(Debug, Clone)]
pub struct Run {
    /// Identity and workspace directory name.
    pub token: RunToken,
    /// Parameters the worker was started with.
    pub parameters: Arc<RunParameters>,
    /// Workspace directory.
    pub workspace: PathBuf,
    /// Registration time.
    pub submitted_at: DateTime<Utc>,
    state: RunState,
    outcome: Option<RunOutcome>,
}

impl Run {
    /// A run in `Started` state with no outcome.
    pub fn new(
        token: RunToken,
        parameters: Arc<RunParameters>,
        workspace: PathBuf,
    ) -> Self {
        Self {
            token,
            parameters,
            workspace,
            submitted_at: Utc::now(),
            state: RunState::Started,
            outcome: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Outcome, once terminal.
    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    /// `Started -> Running`. Any other source state is left untouched.
    pub fn mark_running(&mut self) {
        if self.state == RunState::Started {
            self.state = RunState::Running;
        }
    }

    /// Moves the run into `state` and records its outcome.
    ///
    /// Returns `false` without modifying anything if the run is already
    /// terminal or `state` is not terminal.
    pub fn complete(&mut self, state: RunState, outcome: RunOutcome) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        self.outcome = Some(outcome);
        true
    }

    /// Detached copy for callers.
    pub fn snapshot(&self) -> RunSnapshot {
        let outcome = self.outcome.as_ref();
        RunSnapshot {
            token: self.token.clone(),
            state: self.state,
            status: self.state,
            submitted_at: self.submitted_at,
            parameters: ParametersView::from(self.parameters.as_ref()),
            exit_code: outcome.map(|o| o.exit_code),
            finished_at: outcome.map(|o| o.finished_at),
            result: outcome.and_then(|o| o.result.clone()),
            diagnostic: outcome.and_then(|o| o.diagnostic.clone()),
        }
    }

    /// Listing entry.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            token: self.token.clone(),
            state: self.state,
            submitted_at: self.submitted_at,
        }
    }
}

/// Detached copy of a run's state, safe to hand to callers.
///
/// Live snapshots carry no outcome keys. Terminal snapshots always carry
/// `exit_code` and `finished_at`, with `result` and `diagnostic` as `null`
/// when absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunSnapshot {
    /// Run identity.
    pub token: RunToken,
    /// Lifecycle state.
    pub state: RunState,
    /// Same value as `state`; older clients read this field.
    pub status: RunState,
    /// Registration time.
    pub submitted_at: DateTime<Utc>,
    /// Effective parameters.
    pub parameters: ParametersView,
    /// Worker exit code, once terminal.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Time the terminal state was recorded.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Parsed `result.json`, if any.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure or missing-result reason, if any.
    #[serde(default)]
    pub diagnostic: Option<String>,
}

impl Serialize for RunSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let terminal = self.state.is_terminal();
        let mut map = serializer.serialize_map(Some(if terminal { 9 } else { 5 }))?;
        map.serialize_entry("token", &self.token)?;
        map.serialize_entry("state", &self.state)?;
        map.serialize_entry("status", &self.status)?;
        map.serialize_entry("submitted_at", &self.submitted_at)?;
        map.serialize_entry("parameters", &self.parameters)?;
        if terminal {
            map.serialize_entry("exit_code", &self.exit_code)?;
            map.serialize_entry("finished_at", &self.finished_at)?;
            map.serialize_entry("result", &self.result)?;
            map.serialize_entry("diagnostic", &self.diagnostic)?;
        }
        map.end()
    }
}

/// One row of the run listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identity.
    pub token: RunToken,
    /// Lifecycle state.
    pub state: RunState,
    /// Registration time.
    pub submitted_at: DateTime<Utc>,
}
