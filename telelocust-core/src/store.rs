//! Filesystem layout of run workspaces and artifact packaging.

use std::{
    fs::File,
    io::{self, Cursor},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{
    error::{OrchestratorError, Result},
    token::RunToken,
};

/// Worker script written before the worker starts.
pub const PAYLOAD_FILE: &str = "locustfile.py";
/// Prefix handed to the worker's CSV writer (`loadtest_stats.csv`, ...).
pub const CSV_PREFIX: &str = "loadtest";
/// Worker log file.
pub const LOG_FILE: &str = "locust.log";
/// Prefix handed to the worker's JSON writer; it appends `.json`.
pub const RESULT_PREFIX: &str = "result";
/// Structured result the worker writes on exit.
pub const RESULT_FILE: &str = "result.json";
/// Captured worker stdout.
pub const STDOUT_FILE: &str = "worker.stdout.log";
/// Captured worker stderr.
pub const STDERR_FILE: &str = "worker.stderr.log";

/// Absolute paths of every file a run reads or writes inside its workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    /// Layout rooted at an existing workspace directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Workspace directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of [`PAYLOAD_FILE`].
    pub fn payload(&self) -> PathBuf {
        self.root.join(PAYLOAD_FILE)
    }

    /// Path prefix for CSV statistics.
    pub fn csv_prefix(&self) -> PathBuf {
        self.root.join(CSV_PREFIX)
    }

    /// Path of [`LOG_FILE`].
    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Path prefix for the JSON result.
    pub fn result_prefix(&self) -> PathBuf {
        self.root.join(RESULT_PREFIX)
    }

    /// Path of [`RESULT_FILE`].
    pub fn result_file(&self) -> PathBuf {
        self.root.join(RESULT_FILE)
    }

    /// Path of [`STDOUT_FILE`].
    pub fn stdout_file(&self) -> PathBuf {
        self.root.join(STDOUT_FILE)
    }

    /// Path of [`STDERR_FILE`].
    pub fn stderr_file(&self) -> PathBuf {
        self.root.join(STDERR_FILE)
    }
}

/// Owns the data root under which every run gets one directory named after
/// its token.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Store over `root`; nothing is created until [`Self::ensure_root`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Data root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the data root if missing.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| OrchestratorError::io(&self.root, err))
    }

    /// Directory a run with `token` uses.
    pub fn workspace_path(&self, token: &RunToken) -> PathBuf {
        self.root.join(token.as_str())
    }

    /// Creates the workspace for `token`. The directory must not exist yet.
    pub async fn create_workspace(
        &self,
        token: &RunToken,
    ) -> Result<WorkspaceLayout> {
        // The worker runs inside the workspace, so its paths must not be
        // relative to our own working directory.
        let path = std::path::absolute(self.workspace_path(token))
            .map_err(|err| OrchestratorError::io(self.workspace_path(token), err))?;
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {
                debug!(token = %token, path = %path.display(), "workspace created");
                Ok(WorkspaceLayout::new(path))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(OrchestratorError::WorkspaceConflict(path))
            }
            Err(err) => Err(OrchestratorError::io(path, err)),
        }
    }

    /// Writes the worker script into the workspace.
    pub async fn write_payload(
        &self,
        layout: &WorkspaceLayout,
        payload: &[u8],
    ) -> Result<()> {
        let path = layout.payload();
        tokio::fs::write(&path, payload)
            .await
            .map_err(|err| OrchestratorError::io(path, err))
    }

    /// Zips the workspace on the blocking pool.
    pub async fn package(&self, workspace: PathBuf) -> Result<Vec<u8>> {
        tokio::task::spawn_blocking(move || package_dir(&workspace))
            .await
            .map_err(|err| {
                OrchestratorError::Internal(format!("packaging task failed: {err}"))
            })?
    }
}

/// Builds a deflate-compressed zip of every regular file under `workspace`.
///
/// Symlinks are neither followed nor archived, so nothing outside
/// `workspace` can end up in the archive. Files that vanish while the walk
/// is in progress are skipped.
pub fn package_dir(workspace: &Path) -> Result<Vec<u8>> {
    if !workspace.is_dir() {
        return Err(OrchestratorError::NotFound(format!(
            "workspace {}",
            workspace.display()
        )));
    }

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    let walker = WalkDir::new(workspace)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if is_vanished(&err) => continue,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| workspace.to_path_buf());
                return Err(OrchestratorError::io(path, io::Error::other(err)));
            }
        };

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            warn!(path = %entry.path().display(), "skipping symlink in workspace");
            continue;
        }

        let Some(name) = archive_name(workspace, entry.path()) else {
            warn!(path = %entry.path().display(), "skipping entry outside workspace");
            continue;
        };

        if file_type.is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let mut file = match File::open(entry.path()) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(OrchestratorError::io(entry.path(), err)),
        };
        zip.start_file(name, options)?;
        io::copy(&mut file, &mut zip)
            .map_err(|err| OrchestratorError::io(entry.path(), err))?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

/// Relative, `/`-separated entry name, or `None` when `path` does not live
/// under `workspace` or contains anything but normal components.
fn archive_name(workspace: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(workspace).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            std::path::Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn is_vanished(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|io| io.kind() == io::ErrorKind::NotFound)
        .unwrap_or(false)
}
