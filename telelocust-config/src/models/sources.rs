use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub storage: FileStorageConfig,
    #[serde(default)]
    pub worker: FileWorkerConfig,
    #[serde(default)]
    pub template: FileTemplateConfig,
    #[serde(default)]
    pub limits: FileLimitsConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_root: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWorkerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_args: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileTemplateConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLimitsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_body_bytes: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub data_root: Option<PathBuf>,
    pub worker_program: Option<String>,
    pub worker_extra_args: Option<Vec<String>>,
    pub target_host: Option<String>,
    pub users: Option<u32>,
    pub spawn_rate: Option<f64>,
    pub run_time: Option<String>,
    pub payload_path: Option<PathBuf>,
    pub max_body_bytes: Option<usize>,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Values that fail
    /// to parse are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| read_var(&lookup, name);

        Self {
            config_path: var("TELELOCUST_CONFIG").map(PathBuf::from),
            server_host: var("TELELOCUST_HTTP_HOST"),
            server_port: parse_var(&lookup, "TELELOCUST_HTTP_PORT"),
            data_root: var("TELELOCUST_DATA_PATH").map(PathBuf::from),
            worker_program: var("TELELOCUST_WORKER"),
            worker_extra_args: var("TELELOCUST_WORKER_ARGS").map(|raw| {
                raw.split_whitespace().map(str::to_string).collect()
            }),
            target_host: var("TELELOCUST_SUT"),
            users: parse_var(&lookup, "TELELOCUST_USERS"),
            spawn_rate: parse_var(&lookup, "TELELOCUST_SPAWN_RATE"),
            run_time: var("TELELOCUST_RUN_TIME"),
            payload_path: var("TELELOCUST_LOCUSTFILE").map(PathBuf::from),
            max_body_bytes: parse_var(&lookup, "TELELOCUST_MAX_BODY_BYTES"),
            cors_allowed_origins: var("TELELOCUST_CORS_ALLOWED_ORIGINS")
                .map(|raw| parse_csv(&raw)),
        }
    }
}

fn read_var<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    read_var(lookup, name).and_then(|raw| raw.trim().parse().ok())
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> EnvConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn reads_known_variables() {
        let env = env_from(&[
            ("TELELOCUST_HTTP_PORT", "8089"),
            ("TELELOCUST_SUT", "https://sut.example"),
            ("TELELOCUST_WORKER_ARGS", "--loglevel  DEBUG"),
            ("TELELOCUST_CORS_ALLOWED_ORIGINS", "http://a.test, ,http://b.test"),
            ("TELELOCUST_SPAWN_RATE", "0.5"),
        ]);

        assert_eq!(env.server_port, Some(8089));
        assert_eq!(env.target_host.as_deref(), Some("https://sut.example"));
        assert_eq!(
            env.worker_extra_args,
            Some(vec!["--loglevel".to_string(), "DEBUG".to_string()])
        );
        assert_eq!(
            env.cors_allowed_origins,
            Some(vec!["http://a.test".to_string(), "http://b.test".to_string()])
        );
        assert_eq!(env.spawn_rate, Some(0.5));
        assert!(env.data_root.is_none());
    }

    #[test]
    fn unparsable_and_blank_values_are_ignored() {
        let env = env_from(&[
            ("TELELOCUST_HTTP_PORT", "not-a-port"),
            ("TELELOCUST_USERS", "-4"),
            ("TELELOCUST_DATA_PATH", "   "),
        ]);

        assert!(env.server_port.is_none());
        assert!(env.users.is_none());
        assert!(env.data_root.is_none());
    }

    #[test]
    fn file_sections_are_optional() {
        let parsed: FileConfig = toml::from_str(
            r#"
            [template]
            users = 3
            run_time = "1m"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.template.users, Some(3));
        assert_eq!(parsed.template.run_time.as_deref(), Some("1m"));
        assert!(parsed.server.port.is_none());
        assert!(parsed.cors.allowed_origins.is_none());
    }
}
