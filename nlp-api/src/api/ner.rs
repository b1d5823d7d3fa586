//! Annotation endpoint
//!
//! POST /ner: validates the decision, takes the single analysis slot and
//! runs the pipeline on a blocking worker. The slot travels with the worker
//! so it stays held until the run truly ends, even if the client goes away.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use tracing::{error, info};

use crate::error::{ApiError, ApiResult};
use crate::models::{Decision, NerResponse};
use crate::AppState;

/// POST /ner
pub async fn annotate(
    State(state): State<AppState>,
    payload: Result<Json<Decision>, JsonRejection>,
) -> ApiResult<Json<NerResponse>> {
    let Json(decision) = payload?;
    decision.validate()?;

    let permit = state.gate.try_acquire().map_err(|busy| {
        info!(
            id_document = decision.id_document,
            "Rejecting decision: analysis already in progress"
        );
        ApiError::from(busy)
    })?;

    let document_id = decision.id_document;
    let source = decision.source();
    let pipeline = state.pipeline.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        pipeline.run(&decision)
    })
    .await;

    let err = match outcome {
        Ok(Ok(response)) => return Ok(Json(response)),
        Ok(Err(err)) => ApiError::from_pipeline(document_id, &source, err),
        Err(join_error) => {
            error!(id_document = document_id, "Analysis worker failed: {}", join_error);
            ApiError::Analysis {
                document_id,
                source_name: source.to_string(),
                cause: format!("analysis worker failed: {}", join_error),
            }
        }
    };

    *state.last_error.write().await = Some(err.to_string());
    Err(err)
}

pub fn ner_routes() -> Router<AppState> {
    Router::new().route("/ner", post(annotate))
}
