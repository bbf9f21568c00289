use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Response;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use telelocust_core::{RunOverrides, RunSnapshot, RunState, RunToken};

use crate::error::ClientError;

/// Where the server listens when nothing else is configured.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5123";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters of a new run. Unset fields take the server's defaults.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub locustfile: PathBuf,
    pub host: Option<String>,
    pub users: Option<u32>,
    pub spawn_rate: Option<f64>,
    pub run_time: Option<String>,
}

impl StartRequest {
    pub fn new(locustfile: impl Into<PathBuf>) -> Self {
        Self {
            locustfile: locustfile.into(),
            host: None,
            users: None,
            spawn_rate: None,
            run_time: None,
        }
    }

    /// Reads the local script and builds the request body.
    pub async fn to_overrides(&self) -> Result<RunOverrides, ClientError> {
        let script = tokio::fs::read(&self.locustfile).await.map_err(|source| {
            ClientError::ReadScript {
                path: self.locustfile.clone(),
                source,
            }
        })?;

        Ok(RunOverrides {
            host: self.host.clone(),
            users: self.users.map(i64::from),
            spawn_rate: self.spawn_rate,
            run_time: self.run_time.clone(),
            payload: Some(STANDARD.encode(script)),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    token: RunToken,
}

/// Validates a token typed by a user before it is put into a URL.
pub fn parse_token(raw: &str) -> Result<RunToken, ClientError> {
    RunToken::parse(raw.trim())
        .map_err(|_| ClientError::InvalidToken(raw.to_string()))
}

#[derive(Debug, Clone)]
pub struct TelelocustClient {
    http: reqwest::Client,
    base: Url,
}

impl TelelocustClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base =
            Url::parse(base_url).map_err(|source| ClientError::InvalidUrl {
                url: base_url.to_string(),
                source,
            })?;
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base.as_str().trim_end_matches('/'), path)
    }

    /// Submits a run and returns its token.
    pub async fn start(
        &self,
        request: &StartRequest,
    ) -> Result<RunToken, ClientError> {
        let overrides = request.to_overrides().await?;
        let response = self
            .http
            .post(self.endpoint("/runs/start"))
            .json(&overrides)
            .send()
            .await?;
        let body: StartResponse = check(response).await?.json().await?;
        info!(token = %body.token, "run started");
        Ok(body.token)
    }

    pub async fn status(
        &self,
        token: &RunToken,
    ) -> Result<RunSnapshot, ClientError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/runs/{token}")))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn is_finished(&self, token: &RunToken) -> Result<bool, ClientError> {
        Ok(self.status(token).await?.state.is_terminal())
    }

    /// Polls every `interval` until the run is `finished` or `failed`.
    pub async fn wait(
        &self,
        token: &RunToken,
        interval: Duration,
    ) -> Result<RunSnapshot, ClientError> {
        let mut last: Option<RunState> = None;
        loop {
            let snapshot = self.status(token).await?;
            if last != Some(snapshot.state) {
                info!(token = %token, state = %snapshot.state, "run status");
                last = Some(snapshot.state);
            }
            if snapshot.state.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Writes the run's archive to `path` and returns its size in bytes.
    ///
    /// Live runs are refused unless `partial` is set.
    pub async fn download(
        &self,
        token: &RunToken,
        path: impl AsRef<Path>,
        partial: bool,
    ) -> Result<u64, ClientError> {
        let path = path.as_ref();
        if !partial {
            let state = self.status(token).await?.state;
            if !state.is_terminal() {
                return Err(ClientError::StillRunning {
                    token: token.clone(),
                    state,
                });
            }
        }

        let response = self
            .http
            .get(self.endpoint(&format!("/runs/{token}/download")))
            .send()
            .await?;
        let bytes = check(response).await?.bytes().await?;

        let write_error = |source| ClientError::WriteArchive {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        tokio::fs::write(path, &bytes).await.map_err(write_error)?;

        debug!(token = %token, path = %path.display(), bytes = bytes.len(), "archive written");
        Ok(bytes.len() as u64)
    }
}

/// Turns non-2xx answers into [`ClientError::Api`], preferring the server's
/// `{"error": {"message": ..}}` body over the raw text.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| body["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text);
    Err(ClientError::Api { status, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_without_double_slashes() {
        let client = TelelocustClient::new("http://localhost:5123/").unwrap();
        assert_eq!(
            client.endpoint("/runs/start"),
            "http://localhost:5123/runs/start"
        );

        let prefixed = TelelocustClient::new("http://proxy.local/locust").unwrap();
        assert_eq!(
            prefixed.endpoint("/runs/abc"),
            "http://proxy.local/locust/runs/abc"
        );
    }

    #[test]
    fn bad_server_url_is_rejected() {
        let err = TelelocustClient::new("not a url").unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }

    #[test]
    fn tokens_are_checked_before_use() {
        assert!(parse_token("0123abcd").is_ok());
        assert!(matches!(
            parse_token("../etc/passwd"),
            Err(ClientError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn start_request_encodes_the_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locustfile.py");
        std::fs::write(&path, "print('hi')").unwrap();

        let request = StartRequest {
            users: Some(3),
            run_time: Some("10s".into()),
            ..StartRequest::new(&path)
        };
        let overrides = request.to_overrides().await.unwrap();
        assert_eq!(overrides.users, Some(3));
        assert_eq!(overrides.run_time.as_deref(), Some("10s"));
        assert!(overrides.host.is_none());
        assert_eq!(
            STANDARD.decode(overrides.payload.unwrap()).unwrap(),
            b"print('hi')"
        );
    }

    #[tokio::test]
    async fn missing_script_is_reported_with_its_path() {
        let err = StartRequest::new("/nonexistent/locustfile.py")
            .to_overrides()
            .await
            .unwrap_err();
        match err {
            ClientError::ReadScript { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/locustfile.py"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
