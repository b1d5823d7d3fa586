//! nlp-api library interface
//!
//! Named-entity annotation service for court decisions. Exposes the router
//! and its state so integration tests can drive the service in-process.

pub mod api;
pub mod error;
pub mod gate;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod tagger;

pub use crate::error::{ApiError, ApiResult};

use axum::{extract::DefaultBodyLimit, Router};
use chrono::{DateTime, Utc};
use nlp_common::config::DEFAULT_MAX_BODY_BYTES;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::catch_panic::CatchPanicLayer;

use crate::api::{ExchangeLogger, RequestLogLayer, TracingExchangeLogger};
use crate::gate::AdmissionGate;
use crate::pipeline::Pipeline;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Single analysis slot
    pub gate: AdmissionGate,
    pub pipeline: Arc<Pipeline>,
    pub exchange_logger: Arc<dyn ExchangeLogger>,
    /// Largest request body accepted, in bytes
    pub max_body_bytes: usize,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last failed analysis, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            gate: AdmissionGate::new(),
            pipeline: Arc::new(pipeline),
            exchange_logger: Arc::new(TracingExchangeLogger),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_exchange_logger(mut self, logger: Arc<dyn ExchangeLogger>) -> Self {
        self.exchange_logger = logger;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let layered_for = state.clone();
    let routes = Router::new()
        .merge(api::ner_routes())
        .merge(api::health_routes())
        .with_state(state);

    with_service_layers(routes, &layered_for)
}

/// Wrap routes in the service layers
///
/// Layer order, outermost first: exchange logging, panic recovery, body
/// limit. Panics therefore reach the exchange log as 500 responses.
pub fn with_service_layers(routes: Router, state: &AppState) -> Router {
    routes
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(CatchPanicLayer::custom(api::handle_panic))
        .layer(RequestLogLayer::new(
            state.exchange_logger.clone(),
            state.max_body_bytes,
        ))
}
