//! Health and build identification endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::AppState;

/// GET /
///
/// Liveness probe with a fixed body.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "message": "OK",
        "status-code": 200,
        "data": {}
    }))
}

/// Build identification and runtime diagnostics
#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub name: String,
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub build_profile: String,
    /// Loaded entity model
    pub model: String,
    pub uptime_seconds: u64,
    /// An analysis currently holds the pipeline
    pub busy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /build-info
pub async fn build_info(State(state): State<AppState>) -> Json<BuildInfo> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let last_error = state.last_error.read().await.clone();

    Json(BuildInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
        model: state.pipeline.tagger().model_name().to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        busy: state.gate.is_busy(),
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/build-info", get(build_info))
}
