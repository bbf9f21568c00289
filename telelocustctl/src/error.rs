use std::path::PathBuf;

use reqwest::StatusCode;
use telelocust_core::{RunState, RunToken};
use thiserror::Error;

/// Failures surfaced by [`TelelocustClient`](crate::TelelocustClient).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server URL '{url}'")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid run token '{0}'")]
    InvalidToken(String),

    #[error("failed to read {}", path.display())]
    ReadScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}", path.display())]
    WriteArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server answered {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("run {token} is still {state}; pass --partial to download anyway")]
    StillRunning { token: RunToken, state: RunState },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
