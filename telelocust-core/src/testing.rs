//! Test doubles for the load generator.
//!
//! [`fake_worker`] installs a small shell script that honours the same
//! argument contract as the real worker and picks its behaviour from marker
//! words found in the submitted script:
//!
//! | marker      | behaviour                                        |
//! |-------------|--------------------------------------------------|
//! | `INVALID`   | prints a syntax error to stderr, exits 1         |
//! | `SLOW`      | sleeps two seconds before writing its outputs    |
//! | `NO_RESULT` | exits 0 without writing `result.json`            |
//! | (none)      | writes CSV, log and `result.json`, exits 0       |

use std::{
    io,
    path::{Path, PathBuf},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use once_cell::sync::Lazy;
use tempfile::TempDir;

use crate::{params::RunOverrides, supervisor::WorkerConfig};

const FAKE_WORKER_SCRIPT: &str = r#"#!/bin/sh
script=""; csv=""; log=""; json=""; users="0"
while [ $# -gt 0 ]; do
  case "$1" in
    -f) script="$2"; shift 2 ;;
    -u) users="$2"; shift 2 ;;
    --csv) csv="$2"; shift 2 ;;
    --logfile) log="$2"; shift 2 ;;
    --json-file) json="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "fake worker starting with $users users" > "$log"
if grep -q INVALID "$script"; then
  echo "SyntaxError: invalid syntax in $script" >&2
  exit 1
fi
if grep -q SLOW "$script"; then
  sleep 2
fi
echo "Type,Name,Request Count" > "${csv}_stats.csv"
if grep -q NO_RESULT "$script"; then
  exit 0
fi
printf '[{"name": "/", "num_requests": %s}]\n' "$users" > "${json}.json"
exit 0
"#;

/// Exits 0 and writes a result.
pub const OK_SCRIPT: &str = "from locust import HttpUser, task\n";
/// Like [`OK_SCRIPT`] after a two second delay.
pub const SLOW_SCRIPT: &str = "# SLOW\nfrom locust import HttpUser, task\n";
/// Exits 1 with a syntax error on stderr.
pub const INVALID_SCRIPT: &str = "INVALID python ((\n";
/// Exits 0 without writing a result.
pub const NO_RESULT_SCRIPT: &str = "# NO_RESULT\n";

/// Installed once per test binary; a freshly written executable can fail to
/// exec with `ETXTBSY` while other threads fork.
static FAKE_WORKER: Lazy<FakeWorker> =
    Lazy::new(|| FakeWorker::install().expect("install fake worker"));

/// Shell script standing in for the load generator.
#[derive(Debug)]
pub struct FakeWorker {
    _dir: TempDir,
    program: PathBuf,
}

impl FakeWorker {
    fn install() -> io::Result<Self> {
        let dir = TempDir::new()?;
        let program = dir.path().join("fake-locust");
        std::fs::write(&program, FAKE_WORKER_SCRIPT)?;
        make_executable(&program)?;
        Ok(Self { _dir: dir, program })
    }

    /// Executable path.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Worker settings pointing at this script.
    pub fn config(&self) -> WorkerConfig {
        WorkerConfig {
            program: self.program.to_string_lossy().into_owned(),
            extra_args: Vec::new(),
        }
    }
}

/// Shared fake worker for this test binary.
pub fn fake_worker() -> &'static FakeWorker {
    &FAKE_WORKER
}

/// Overrides carrying `script` as the payload.
pub fn overrides_with_script(script: &str) -> RunOverrides {
    RunOverrides {
        payload: Some(STANDARD.encode(script)),
        ..Default::default()
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
