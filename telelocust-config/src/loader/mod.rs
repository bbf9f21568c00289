pub mod error;

use once_cell::sync::Lazy;
use std::{fs, path::PathBuf};
use tracing::debug;

use self::error::ConfigLoadError;
use crate::{
    models::{
        Config, ConfigMetadata, CorsConfig, DEFAULT_DATA_ROOT,
        DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT, DEFAULT_MAX_BODY_BYTES,
        DEFAULT_PAYLOAD_PATH, DEFAULT_RUN_TIME, DEFAULT_SPAWN_RATE,
        DEFAULT_TARGET_HOST, DEFAULT_USERS, DEFAULT_WORKER_PROGRAM,
        LimitsConfig, ServerConfig, StorageConfig, TemplateConfig,
        WorkerSettings,
        sources::{EnvConfig, FileConfig},
    },
    validation::{self, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("telelocust.toml"),
        PathBuf::from("config/telelocust.toml"),
    ]
});

/// Values from the command line; they win over the environment and the
/// config file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_root: Option<PathBuf>,
    pub worker_program: Option<String>,
    pub payload_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.options.overrides = overrides;
        self
    }

    /// Loads `.env`, then the process environment, then the config file.
    ///
    /// A missing `.env` in the working directory is fine; an env file named
    /// in the options must exist.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => match dotenvy::from_path(path) {
                Ok(_) => true,
                Err(dotenvy::Error::Io(err))
                    if err.kind() == std::io::ErrorKind::NotFound =>
                {
                    return Err(ConfigLoadError::MissingEnvFile {
                        path: path.clone(),
                    });
                }
                Err(err) => return Err(err.into()),
            },
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Same as [`load`](Self::load) with an explicit environment; the process
    /// environment and `.env` are not consulted.
    pub fn load_with_env(
        &self,
        env_config: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env_config)?;

        let (config, warnings) = self.compose_config(
            file_config,
            env_config,
            config_path,
            env_file_loaded,
        )?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env_config.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(found) => found.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        debug!(path = %path.display(), "configuration file loaded");
        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
        env_file_loaded: bool,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No telelocust.toml detected; using environment variables and defaults",
                "Create telelocust.toml or pass --config to pin the server settings",
            );
        }

        let FileConfig {
            server: file_server,
            storage: file_storage,
            worker: file_worker,
            template: file_template,
            limits: file_limits,
            cors: file_cors,
        } = file_config.unwrap_or_default();
        let overrides = self.options.overrides.clone();

        let server = ServerConfig {
            host: overrides
                .host
                .or(env.server_host)
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HTTP_HOST.to_string()),
            port: overrides
                .port
                .or(env.server_port)
                .or(file_server.port)
                .unwrap_or(DEFAULT_HTTP_PORT),
        };

        let storage = StorageConfig {
            data_root: overrides
                .data_root
                .or(env.data_root)
                .or(file_storage.data_root)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT)),
        };

        let worker = WorkerSettings {
            program: overrides
                .worker_program
                .or(env.worker_program)
                .or(file_worker.program)
                .unwrap_or_else(|| DEFAULT_WORKER_PROGRAM.to_string()),
            extra_args: env
                .worker_extra_args
                .or(file_worker.extra_args)
                .unwrap_or_default(),
        };

        let template = TemplateConfig {
            host: env
                .target_host
                .or(file_template.host)
                .unwrap_or_else(|| DEFAULT_TARGET_HOST.to_string()),
            users: env.users.or(file_template.users).unwrap_or(DEFAULT_USERS),
            spawn_rate: env
                .spawn_rate
                .or(file_template.spawn_rate)
                .unwrap_or(DEFAULT_SPAWN_RATE),
            run_time: env
                .run_time
                .or(file_template.run_time)
                .unwrap_or_else(|| DEFAULT_RUN_TIME.to_string()),
            payload_path: overrides
                .payload_path
                .or(env.payload_path)
                .or(file_template.payload_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PAYLOAD_PATH)),
        };

        let limits = LimitsConfig {
            max_body_bytes: env
                .max_body_bytes
                .or(file_limits.max_body_bytes)
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
        };

        let cors = CorsConfig {
            allowed_origins: env
                .cors_allowed_origins
                .or(file_cors.allowed_origins)
                .unwrap_or_default(),
        };

        let metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };

        let mut config = Config {
            server,
            storage,
            worker,
            template,
            limits,
            cors,
            metadata,
        };

        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        let data_root = config.storage.data_root.clone();
        let filesystem_error = |source| ConfigLoadError::Filesystem {
            path: data_root.clone(),
            source,
        };
        config.ensure_directories().map_err(filesystem_error)?;
        config.normalize_paths().map_err(filesystem_error)?;

        Ok((config, warnings))
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
