use axum::{
    Router,
    routing::{get, post},
};

use crate::{handlers::runs, infra::app_state::AppState};

pub mod paths {
    pub const RUNS: &str = "/runs";
    pub const START: &str = "/runs/start";
    pub const STATUS: &str = "/runs/{token}";
    pub const CANCEL: &str = "/runs/{token}/cancel";
    pub const DOWNLOAD: &str = "/runs/{token}/download";

    pub fn run_status(token: &str) -> String {
        STATUS.replace("{token}", token)
    }
}

/// Routes of the run API.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route(paths::RUNS, get(runs::list_runs_handler))
        .route(paths::START, post(runs::start_run_handler))
        .route(paths::STATUS, get(runs::run_status_handler))
        .route(paths::CANCEL, post(runs::cancel_run_handler))
        .route(paths::DOWNLOAD, get(runs::download_run_handler))
}
