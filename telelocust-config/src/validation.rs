use axum::http::HeaderValue;
use telelocust_core::ValidationError;
use thiserror::Error;

use super::models::{Config, CorsConfig};

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("invalid run template defaults: {0}")]
    InvalidTemplate(#[source] ValidationError),
    #[error("worker program must not be empty")]
    EmptyWorkerProgram,
    #[error("request body limit must be greater than zero")]
    InvalidBodyLimit,
    #[error("invalid CORS configuration: {reason}")]
    InvalidCorsConfig { reason: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    // Payload checks are left to startup, which reads the file.
    config
        .template
        .job_template(Vec::new())
        .map_err(ConfigGuardRailError::InvalidTemplate)?;

    if config.worker.program.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyWorkerProgram);
    }

    if config.limits.max_body_bytes == 0 {
        return Err(ConfigGuardRailError::InvalidBodyLimit);
    }

    validate_cors(&config.cors)?;

    if !config.template.payload_path.is_file() {
        warnings.push_with_hint(
            format!(
                "Default worker script {} not found; submissions must include a payload",
                config.template.payload_path.display()
            ),
            "Set TELELOCUST_LOCUSTFILE or [template] payload_path to a locustfile",
        );
    }

    if config.cors.is_wildcard_included() {
        warnings.push(
            "CORS allows any origin; every website can start runs on this host",
        );
    }

    Ok(warnings)
}

fn validate_cors(cors: &CorsConfig) -> Result<(), ConfigGuardRailError> {
    for origin in &cors.allowed_origins {
        let trimmed = origin.trim();
        if trimmed == "*" {
            continue;
        }
        if HeaderValue::from_str(trimmed).is_err() {
            return Err(ConfigGuardRailError::InvalidCorsConfig {
                reason: format!("origin '{origin}' is not a valid header value"),
            });
        }
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://"))
        {
            return Err(ConfigGuardRailError::InvalidCorsConfig {
                reason: format!("origin '{origin}' must start with http:// or https://"),
            });
        }
    }
    Ok(())
}
