//! Error types for nlp-api
//!
//! Every error response carries a `detail` field. Failures tied to a
//! decision name its document id and source.

use crate::api::request_log::HandlerFailure;
use crate::gate::Busy;
use crate::models::ValidationIssue;
use crate::pipeline::PipelineError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body rejected (422)
    #[error("Invalid request: {}", summarize(.0))]
    Validation(Vec<ValidationIssue>),

    /// Another analysis holds the pipeline (429)
    #[error(transparent)]
    Busy(#[from] Busy),

    /// Metadata rows do not match their source's shape (400)
    #[error("Failure of document id {document_id} from {source_name}: Metadata are not in the good format.")]
    MetadataFormat {
        document_id: i64,
        source_name: String,
    },

    /// Analysis aborted (400)
    #[error("Failure of document id {document_id} from {source_name} with following trace: {cause}")]
    Analysis {
        document_id: i64,
        /// Not named `source`: thiserror reserves that field for the cause chain
        source_name: String,
        cause: String,
    },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.loc.join("."), issue.msg))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ApiError {
    /// Map a pipeline failure for the given decision
    pub fn from_pipeline(document_id: i64, source: impl ToString, err: PipelineError) -> Self {
        match err {
            PipelineError::MetadataFormat(_) => ApiError::MetadataFormat {
                document_id,
                source_name: source.to_string(),
            },
            other => ApiError::Analysis {
                document_id,
                source_name: source.to_string(),
                cause: other.to_string(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Busy(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::MetadataFormat { .. } | ApiError::Analysis { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationIssue> for ApiError {
    fn from(issue: ValidationIssue) -> Self {
        ApiError::Validation(vec![issue])
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let kind = match &rejection {
            JsonRejection::JsonDataError(_) => "value_error",
            JsonRejection::JsonSyntaxError(_) => "json_invalid",
            JsonRejection::MissingJsonContentType(_) => "content_type",
            _ => "body_error",
        };
        ApiError::Validation(vec![ValidationIssue::new(
            &["body"],
            rejection.body_text(),
            kind,
        )])
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        let body = match self {
            ApiError::Validation(issues) => Json(json!({ "detail": issues })),
            _ => Json(json!({ "detail": message })),
        };

        let mut response = (status, body).into_response();
        response.extensions_mut().insert(HandlerFailure { message });
        response
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
