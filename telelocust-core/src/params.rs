//! Run parameters: configured defaults, caller overrides, validation.

use std::{fmt, sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// One or more rejected submission fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", .problems.join("; "))]
pub struct ValidationError {
    /// One message per rejected field.
    pub problems: Vec<String>,
}

/// Server-side defaults every submission starts from.
///
/// Built once at startup; submissions never write back into it.
#[derive(Clone)]
pub struct JobTemplate {
    host: String,
    users: u32,
    spawn_rate: f64,
    run_time: String,
    payload: Arc<[u8]>,
}

impl fmt::Debug for JobTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTemplate")
            .field("host", &self.host)
            .field("users", &self.users)
            .field("spawn_rate", &self.spawn_rate)
            .field("run_time", &self.run_time)
            .field("payload_bytes", &self.payload.len())
            .finish()
    }
}

impl JobTemplate {
    /// Validates the defaults. An empty `payload` is allowed; submissions
    /// must then bring their own script.
    pub fn new(
        host: impl Into<String>,
        users: u32,
        spawn_rate: f64,
        run_time: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<Self, ValidationError> {
        let host = host.into();
        let run_time = run_time.into();
        let mut problems = Vec::new();

        if let Err(problem) = check_host(&host) {
            problems.push(problem);
        }
        if let Err(problem) = check_spawn_rate(spawn_rate) {
            problems.push(problem);
        }
        let run_time = match parse_run_time(&run_time) {
            Ok(duration) => worker_run_time(duration),
            Err(problem) => {
                problems.push(problem);
                run_time
            }
        };

        if !problems.is_empty() {
            return Err(ValidationError { problems });
        }

        Ok(Self {
            host,
            users,
            spawn_rate,
            run_time,
            payload: payload.into(),
        })
    }

    /// Default target host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether a default script is configured.
    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Merge caller overrides over the defaults into a validated, immutable
    /// snapshot for a single run.
    pub fn resolve(
        &self,
        overrides: RunOverrides,
    ) -> Result<RunParameters, ValidationError> {
        let mut problems = Vec::new();

        let host = overrides.host.unwrap_or_else(|| self.host.clone());
        if let Err(problem) = check_host(&host) {
            problems.push(problem);
        }

        let users = match overrides.users {
            None => Some(self.users),
            Some(users) if users < 0 => {
                problems.push(format!("users must be non-negative, got {users}"));
                None
            }
            Some(users) => match u32::try_from(users) {
                Ok(users) => Some(users),
                Err(_) => {
                    problems.push(format!("users is too large: {users}"));
                    None
                }
            },
        };

        let spawn_rate = overrides.spawn_rate.unwrap_or(self.spawn_rate);
        if let Err(problem) = check_spawn_rate(spawn_rate) {
            problems.push(problem);
        }

        let requested = overrides
            .run_time
            .unwrap_or_else(|| self.run_time.clone());
        let run_duration = match parse_run_time(&requested) {
            Ok(duration) => Some(duration),
            Err(problem) => {
                problems.push(problem);
                None
            }
        };

        let payload = match overrides.payload {
            Some(encoded) => match decode_payload(&encoded) {
                Ok(bytes) => Some(bytes),
                Err(problem) => {
                    problems.push(problem);
                    None
                }
            },
            None if self.payload.is_empty() => {
                problems.push(
                    "payload is required: no default worker script is configured"
                        .to_string(),
                );
                None
            }
            None => Some(self.payload.to_vec()),
        };

        match (users, run_duration, payload) {
            (Some(users), Some(run_duration), Some(payload))
                if problems.is_empty() =>
            {
                Ok(RunParameters {
                    host,
                    users,
                    spawn_rate,
                    run_time: worker_run_time(run_duration),
                    run_duration,
                    payload: payload.into(),
                })
            }
            _ => Err(ValidationError { problems }),
        }
    }
}

/// Caller-supplied fields of a submission; anything left out falls back to
/// the [`JobTemplate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOverrides {
    /// Target host URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Simulated user count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<i64>,
    /// Users started per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_rate: Option<f64>,
    /// Test duration, humantime syntax.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_time: Option<String>,
    /// Worker script, standard base64.
    #[serde(
        default,
        alias = "locustfile_base64",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<String>,
}

/// Immutable configuration of one run.
#[derive(Clone, PartialEq)]
pub struct RunParameters {
    /// Target host URL.
    pub host: String,
    /// Simulated user count.
    pub users: u32,
    /// Users started per second.
    pub spawn_rate: f64,
    /// Duration as handed to the worker: whole seconds, e.g. `90s`.
    pub run_time: String,
    /// Parsed `run_time`.
    pub run_duration: Duration,
    /// Worker script bytes.
    pub payload: Arc<[u8]>,
}

impl fmt::Debug for RunParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunParameters")
            .field("host", &self.host)
            .field("users", &self.users)
            .field("spawn_rate", &self.spawn_rate)
            .field("run_time", &self.run_time)
            .field("payload_bytes", &self.payload.len())
            .finish()
    }
}

/// Public view of [`RunParameters`]; the script itself is not echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametersView {
    /// Target host URL.
    pub host: String,
    /// Simulated user count.
    pub users: u32,
    /// Users started per second.
    pub spawn_rate: f64,
    /// Duration in whole seconds.
    pub run_time: String,
    /// Script size.
    pub payload_bytes: usize,
}

impl From<&RunParameters> for ParametersView {
    fn from(params: &RunParameters) -> Self {
        Self {
            host: params.host.clone(),
            users: params.users,
            spawn_rate: params.spawn_rate,
            run_time: params.run_time.clone(),
            payload_bytes: params.payload.len(),
        }
    }
}

fn check_host(host: &str) -> Result<(), String> {
    if host.trim().is_empty() {
        return Err("host must not be empty".to_string());
    }
    match Url::parse(host) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(format!(
            "host must use http or https, got scheme '{}'",
            url.scheme()
        )),
        Err(err) => Err(format!("host '{host}' is not a valid URL: {err}")),
    }
}

fn check_spawn_rate(spawn_rate: f64) -> Result<(), String> {
    if !spawn_rate.is_finite() || spawn_rate < 0.0 {
        Err(format!(
            "spawn_rate must be a non-negative number, got {spawn_rate}"
        ))
    } else {
        Ok(())
    }
}

/// Accepts any humantime spelling, but only whole, non-zero seconds: the
/// worker's timespan syntax has no sub-second unit.
fn parse_run_time(run_time: &str) -> Result<Duration, String> {
    let trimmed = run_time.trim();
    match humantime::parse_duration(trimmed) {
        Ok(duration) if duration.as_secs() == 0 => Err(format!(
            "run_time must be at least one second, got '{trimmed}'"
        )),
        Ok(duration) if duration.subsec_nanos() != 0 => Err(format!(
            "run_time must be a whole number of seconds, got '{trimmed}'"
        )),
        Ok(duration) => Ok(duration),
        Err(err) => Err(format!("run_time '{trimmed}' is malformed: {err}")),
    }
}

fn worker_run_time(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

fn decode_payload(encoded: &str) -> Result<Vec<u8>, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| format!("payload is not valid base64: {err}"))?;
    if bytes.is_empty() {
        return Err("payload decodes to an empty script".to_string());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> JobTemplate {
        JobTemplate::new(
            "http://localhost:5123",
            10,
            2.0,
            "5s",
            b"from locust import HttpUser\n".to_vec(),
        )
        .expect("valid template")
    }

    #[test]
    fn empty_overrides_take_template_defaults() {
        let params = template().resolve(RunOverrides::default()).unwrap();
        assert_eq!(params.host, "http://localhost:5123");
        assert_eq!(params.users, 10);
        assert_eq!(params.spawn_rate, 2.0);
        assert_eq!(params.run_time, "5s");
        assert_eq!(params.run_duration, Duration::from_secs(5));
        assert_eq!(&*params.payload, b"from locust import HttpUser\n");
    }

    #[test]
    fn overrides_replace_defaults_without_touching_template() {
        let template = template();
        let overrides: RunOverrides = serde_json::from_value(serde_json::json!({
            "host": "http://sut.local",
            "users": 5,
            "spawn_rate": 1,
            "run_time": "1m30s",
            "locustfile_base64": STANDARD.encode("print('hi')"),
        }))
        .unwrap();

        let params = template.resolve(overrides).unwrap();
        assert_eq!(params.host, "http://sut.local");
        assert_eq!(params.users, 5);
        assert_eq!(params.spawn_rate, 1.0);
        assert_eq!(params.run_duration, Duration::from_secs(90));
        assert_eq!(params.run_time, "90s");
        assert_eq!(&*params.payload, b"print('hi')");

        let again = template.resolve(RunOverrides::default()).unwrap();
        assert_eq!(again.host, "http://localhost:5123");
        assert_eq!(again.users, 10);
    }

    #[test]
    fn every_bad_field_is_reported() {
        let err = template()
            .resolve(RunOverrides {
                host: Some(String::new()),
                users: Some(-1),
                spawn_rate: Some(-0.5),
                run_time: Some("soon".into()),
                payload: Some("***".into()),
            })
            .unwrap_err();

        assert_eq!(err.problems.len(), 5, "{err}");
        assert!(err.to_string().contains("users must be non-negative"));
    }

    #[test]
    fn spawn_rate_rejects_non_finite_values() {
        let err = template()
            .resolve(RunOverrides {
                spawn_rate: Some(f64::NAN),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("spawn_rate"));
    }

    #[test]
    fn host_must_be_http_url() {
        let err = template()
            .resolve(RunOverrides {
                host: Some("ftp://files.local".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn zero_users_and_zero_rate_are_allowed() {
        let params = template()
            .resolve(RunOverrides {
                users: Some(0),
                spawn_rate: Some(0.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(params.users, 0);
        assert_eq!(params.spawn_rate, 0.0);
    }

    #[test]
    fn run_time_reaches_the_worker_in_whole_seconds() {
        for (requested, expected) in [
            ("1d", "86400s"),
            ("2 minutes", "120s"),
            ("3sec", "3s"),
            ("1h 30m", "5400s"),
        ] {
            let params = template()
                .resolve(RunOverrides {
                    run_time: Some(requested.into()),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(params.run_time, expected, "{requested}");
        }
    }

    #[test]
    fn sub_second_run_times_are_rejected() {
        for requested in ["500ms", "1500ms", "0s"] {
            let err = template()
                .resolve(RunOverrides {
                    run_time: Some(requested.into()),
                    ..Default::default()
                })
                .unwrap_err();
            assert!(err.to_string().contains("run_time"), "{requested}: {err}");
        }
    }

    #[test]
    fn missing_payload_without_default_is_rejected() {
        let template =
            JobTemplate::new("http://localhost", 1, 1.0, "1s", Vec::new())
                .unwrap();
        assert!(!template.has_payload());

        let err = template.resolve(RunOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("payload is required"));
    }

    #[test]
    fn template_defaults_are_validated() {
        let err = JobTemplate::new("", 1, -1.0, "0s", Vec::new()).unwrap_err();
        assert_eq!(err.problems.len(), 3);
    }

    #[test]
    fn parameters_view_hides_the_script() {
        let params = template().resolve(RunOverrides::default()).unwrap();
        let view = ParametersView::from(&params);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["payload_bytes"], 28);
        assert!(json.get("payload").is_none());
    }
}
