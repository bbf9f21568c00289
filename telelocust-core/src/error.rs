//! Error type shared by every orchestrator operation.

use std::path::PathBuf;

use thiserror::Error;

use crate::params::ValidationError;

/// Failure of an orchestrator operation.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Parameters failed validation.
    #[error("invalid run parameters: {0}")]
    Validation(#[from] ValidationError),

    /// Workspace directory was already present.
    #[error("workspace already exists: {}", .0.display())]
    WorkspaceConflict(PathBuf),

    /// Token collided with a registered run.
    #[error("run token already registered: {0}")]
    DuplicateToken(String),

    /// Token is not a plain identifier.
    #[error("invalid run token")]
    InvalidToken,

    /// Worker process could not be started.
    #[error("failed to start worker '{program}': {source}")]
    Spawn {
        /// Program that was executed.
        program: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// `result.json` could not be read or parsed.
    #[error("unusable worker result: {0}")]
    ResultParse(String),

    /// No such run or workspace.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem failure.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Zip packaging failed.
    #[error("failed to build archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Unexpected internal fault.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures the caller caused (bad input or unknown run) as
    /// opposed to faults inside the orchestrator or its host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidToken | Self::NotFound(_)
        )
    }
}

/// Result alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
