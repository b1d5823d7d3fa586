//! HTTP API
//!
//! - `POST /ner`: annotate a decision
//! - `GET /`: liveness
//! - `GET /build-info`: build identification and diagnostics

pub mod health;
pub mod ner;
pub mod request_log;

pub use health::health_routes;
pub use ner::ner_routes;
pub use request_log::{ExchangeLogger, RequestLogLayer, TracingExchangeLogger};

use axum::response::{IntoResponse, Response};
use std::any::Any;
use tracing::error;

use crate::error::ApiError;

/// Converts a handler panic into a 500 that the exchange log records
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    error!("Handler panicked: {}", detail);
    ApiError::Internal(format!("handler panicked: {}", detail)).into_response()
}
