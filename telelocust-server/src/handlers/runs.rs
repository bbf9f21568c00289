use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::BytesRejection},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Serialize;
use tracing::info;

use telelocust_core::{RunOverrides, RunSnapshot, RunSummary, RunToken};

use crate::{
    infra::{
        app_state::AppState,
        errors::AppResult,
    },
    routes::paths,
};

#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub token: RunToken,
}

#[derive(Debug, Serialize)]
pub struct RunListResponse {
    pub runs: Vec<RunSummary>,
    pub count: usize,
}

/// `POST /runs/start`. A missing or empty body runs the template as-is.
pub async fn start_run_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<impl IntoResponse> {
    let body = body?;
    let overrides: RunOverrides = if body.iter().all(u8::is_ascii_whitespace)
    {
        RunOverrides::default()
    } else {
        serde_json::from_slice(&body)?
    };

    let token = state.orchestrator().submit(overrides).await?;
    let location = paths::run_status(token.as_str());
    info!(token = %token, "run accepted");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(StartRunResponse { token }),
    ))
}

pub async fn list_runs_handler(
    State(state): State<AppState>,
) -> Json<RunListResponse> {
    let runs = state.orchestrator().list().await;
    let count = runs.len();
    Json(RunListResponse { runs, count })
}

pub async fn run_status_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<RunSnapshot>> {
    let snapshot = state.orchestrator().query(&token).await?;
    Ok(Json(snapshot))
}

pub async fn cancel_run_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<RunSnapshot>> {
    let snapshot = state.orchestrator().cancel(&token).await?;
    Ok(Json(snapshot))
}

/// Zip of the run's workspace; live runs are packaged with whatever the
/// worker has written so far.
pub async fn download_run_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<impl IntoResponse> {
    let (token, archive) = state.orchestrator().package(&token).await?;
    let disposition = format!("attachment; filename=\"run_{token}.zip\"");

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        archive,
    ))
}
