use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::infra::app_state::AppState;

pub const LIVENESS_TEXT: &str = "Hello, World!";

/// `GET /`
pub async fn index_handler() -> &'static str {
    LIVENESS_TEXT
}

/// `GET /up`: counts its own hits.
pub async fn up_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "counter": state.bump_up_counter() }))
}
