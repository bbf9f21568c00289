pub mod sources;

use std::{
    io,
    path::{Path, PathBuf},
};

use telelocust_core::{JobTemplate, ValidationError, WorkerConfig};

pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 5123;
pub const DEFAULT_DATA_ROOT: &str = "./data";
pub const DEFAULT_WORKER_PROGRAM: &str = "locust";
pub const DEFAULT_TARGET_HOST: &str = "http://localhost:5123";
pub const DEFAULT_USERS: u32 = 10;
pub const DEFAULT_SPAWN_RATE: f64 = 2.0;
pub const DEFAULT_RUN_TIME: &str = "5s";
pub const DEFAULT_PAYLOAD_PATH: &str = "locustfile.py";
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub worker: WorkerSettings,
    pub template: TemplateConfig,
    pub limits: LimitsConfig,
    pub cors: CorsConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn ensure_directories(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.storage.data_root)
    }

    /// Makes the data root absolute; workers run with their workspace as the
    /// current directory.
    pub fn normalize_paths(&mut self) -> io::Result<()> {
        self.storage.data_root = std::fs::canonicalize(&self.storage.data_root)?;
        Ok(())
    }

    pub fn data_root(&self) -> &Path {
        &self.storage.data_root
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            program: self.worker.program.clone(),
            extra_args: self.worker.extra_args.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub program: String,
    pub extra_args: Vec<String>,
}

/// Defaults for fields a submission leaves out.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub host: String,
    pub users: u32,
    pub spawn_rate: f64,
    pub run_time: String,
    pub payload_path: PathBuf,
}

impl TemplateConfig {
    /// Contents of the default worker script, `None` when the file does not
    /// exist.
    pub fn read_payload(&self) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.payload_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn job_template(
        &self,
        payload: Vec<u8>,
    ) -> Result<JobTemplate, ValidationError> {
        JobTemplate::new(
            self.host.clone(),
            self.users,
            self.spawn_rate,
            self.run_time.clone(),
            payload,
        )
    }
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins
            .iter()
            .any(|origin| origin.trim() == "*")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
