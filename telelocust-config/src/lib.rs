//! Configuration library for Telelocust.
//!
//! Settings come from, in increasing priority: built-in defaults, an
//! optional `telelocust.toml`, the environment (after `.env` is loaded) and
//! command-line overrides. Guard rails reject values the server could not
//! run with; softer problems are reported as [`ConfigWarnings`].

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoader, ConfigLoaderOptions, ConfigOverrides,
    error::ConfigLoadError,
};
pub use models::{
    Config, ConfigMetadata, CorsConfig, LimitsConfig, ServerConfig,
    StorageConfig, TemplateConfig, WorkerSettings,
    sources::{EnvConfig, FileConfig},
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
