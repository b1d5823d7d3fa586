//! Request/response exchange logging
//!
//! Tower layer wrapped around the whole router. For every exchange it
//! captures the request (method, handler path, headers, query parameters,
//! body) and the correlation fields found in the JSON body.
//!
//! - Handler failure: an error record is emitted before the response is
//!   returned. A failure is an inner service error or a response carrying a
//!   [`HandlerFailure`] extension (set by `ApiError` and the panic handler).
//! - Success: the response body is teed. Frames go to the client unchanged
//!   while a copy accumulates; once the body ends (or the transport drops
//!   it) a background task emits the trace record.
//!
//! Logging never changes status, headers or body.

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::BytesMut;
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::LengthLimitError;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;
use tower::{Layer, Service};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Operation name carried by every exchange record
pub const OPERATION_NAME: &str = "NLP-API";

/// Response extension marking a failed handler
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub message: String,
}

/// Caller-supplied identifiers lifted from the request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlation {
    pub id_label: Option<String>,
    pub id_decision: Option<String>,
    pub source_id: Option<String>,
    pub source_name: Option<String>,
    pub id_document: Option<String>,
    pub source: Option<String>,
}

impl Correlation {
    /// Best effort: a body that is not a JSON object yields no fields
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        let field = |name: &str| match fields.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        Self {
            id_label: field("idLabel"),
            id_decision: field("idDecision"),
            source_id: field("sourceId"),
            source_name: field("sourceName"),
            id_document: field("idDocument").or_else(|| field("documentId")),
            source: field("source"),
        }
    }
}

/// Request side of an exchange
#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    /// Route path, without query string
    pub handler: String,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub body: String,
}

impl RequestSnapshot {
    fn capture(parts: &axum::http::request::Parts, body: &[u8]) -> Self {
        let query_params = parts
            .uri
            .query()
            .map(|query| {
                query
                    .split('&')
                    .filter(|pair| !pair.is_empty())
                    .map(|pair| match pair.split_once('=') {
                        Some((key, value)) => (key.to_string(), value.to_string()),
                        None => (pair.to_string(), String::new()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            method: parts.method.to_string(),
            url: parts.uri.to_string(),
            handler: parts.uri.path().to_string(),
            headers: header_map(&parts.headers),
            query_params,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Successful exchange
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub exchange_id: Uuid,
    pub request: RequestSnapshot,
    pub correlation: Correlation,
    pub status: u16,
    pub response_headers: BTreeMap<String, String>,
    pub media_type: Option<String>,
    pub response_body: String,
    /// False if the transport dropped the body before its end
    pub body_complete: bool,
    pub elapsed_ms: u64,
}

/// Failed exchange
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub exchange_id: Uuid,
    pub request: RequestSnapshot,
    pub correlation: Correlation,
    pub status: Option<u16>,
    pub error_message: String,
}

/// Destination of exchange records
pub trait ExchangeLogger: Send + Sync + 'static {
    fn log_trace(&self, record: &TraceRecord);

    fn log_error(&self, record: &ErrorRecord);
}

/// Emits exchange records as `tracing` events on `nlp_api::exchange`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExchangeLogger;

impl ExchangeLogger for TracingExchangeLogger {
    fn log_trace(&self, record: &TraceRecord) {
        let query_params = serde_json::to_string(&record.request.query_params).unwrap_or_default();
        let c = &record.correlation;
        info!(
            target: "nlp_api::exchange",
            operation_name = OPERATION_NAME,
            exchange_id = %record.exchange_id,
            version = env!("CARGO_PKG_VERSION"),
            git_hash = env!("GIT_HASH"),
            request_method = %record.request.method,
            request_handler = %record.request.handler,
            request_query_params = %query_params,
            response_status_code = record.status,
            response_media_type = record.media_type.as_deref(),
            response_bytes = record.response_body.len(),
            body_complete = record.body_complete,
            elapsed_ms = record.elapsed_ms,
            id_label = c.id_label.as_deref(),
            id_decision = c.id_decision.as_deref(),
            source_id = c.source_id.as_deref(),
            source_name = c.source_name.as_deref(),
            id_document = c.id_document.as_deref(),
            source = c.source.as_deref(),
            "trace"
        );
    }

    fn log_error(&self, record: &ErrorRecord) {
        let query_params = serde_json::to_string(&record.request.query_params).unwrap_or_default();
        let headers = serde_json::to_string(&record.request.headers).unwrap_or_default();
        let c = &record.correlation;
        error!(
            target: "nlp_api::exchange",
            operation_name = OPERATION_NAME,
            exchange_id = %record.exchange_id,
            version = env!("CARGO_PKG_VERSION"),
            git_hash = env!("GIT_HASH"),
            error_message = %record.error_message,
            request_method = %record.request.method,
            request_url = %record.request.url,
            request_handler = %record.request.handler,
            request_headers = %headers,
            request_query_params = %query_params,
            request_body = %record.request.body,
            response_status_code = record.status,
            id_label = c.id_label.as_deref(),
            id_decision = c.id_decision.as_deref(),
            source_id = c.source_id.as_deref(),
            source_name = c.source_name.as_deref(),
            id_document = c.id_document.as_deref(),
            source = c.source.as_deref(),
            "error"
        );
    }
}

/// Tower layer for exchange logging
#[derive(Clone)]
pub struct RequestLogLayer {
    logger: Arc<dyn ExchangeLogger>,
    max_body_bytes: usize,
}

impl RequestLogLayer {
    pub fn new(logger: Arc<dyn ExchangeLogger>, max_body_bytes: usize) -> Self {
        Self {
            logger,
            max_body_bytes,
        }
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLog {
            inner,
            logger: self.logger.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// Tower service that records every exchange
#[derive(Clone)]
pub struct RequestLog<S> {
    inner: S,
    logger: Arc<dyn ExchangeLogger>,
    max_body_bytes: usize,
}

impl<S> Service<Request> for RequestLog<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // The clone may not be ready; keep the instance poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let logger = self.logger.clone();
        let max_body_bytes = self.max_body_bytes;

        Box::pin(async move {
            let started = Instant::now();
            let exchange_id = Uuid::new_v4();
            let (parts, body) = request.into_parts();

            let bytes = match to_bytes(body, max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let (status, message) = if exceeds_limit(&e) {
                        (
                            StatusCode::PAYLOAD_TOO_LARGE,
                            format!("Request body rejected: {}", e),
                        )
                    } else {
                        (
                            StatusCode::BAD_REQUEST,
                            format!("Request body could not be read: {}", e),
                        )
                    };
                    emit_error(
                        &logger,
                        ErrorRecord {
                            exchange_id,
                            request: RequestSnapshot::capture(&parts, &[]),
                            correlation: Correlation::default(),
                            status: Some(status.as_u16()),
                            error_message: message.clone(),
                        },
                    );
                    return Ok((status, Json(json!({ "detail": message }))).into_response());
                }
            };

            let snapshot = RequestSnapshot::capture(&parts, &bytes);
            let correlation = Correlation::from_body(&bytes);
            let request = Request::from_parts(parts, Body::from(bytes));

            let response = match inner.call(request).await {
                Ok(response) => response,
                Err(err) => {
                    emit_error(
                        &logger,
                        ErrorRecord {
                            exchange_id,
                            request: snapshot,
                            correlation,
                            status: None,
                            error_message: err.to_string(),
                        },
                    );
                    return Err(err);
                }
            };

            if let Some(failure) = response.extensions().get::<HandlerFailure>() {
                emit_error(
                    &logger,
                    ErrorRecord {
                        exchange_id,
                        request: snapshot,
                        correlation,
                        status: Some(response.status().as_u16()),
                        error_message: failure.message.clone(),
                    },
                );
                return Ok(response);
            }

            let (parts, body) = response.into_parts();
            let status = parts.status.as_u16();
            let response_headers = header_map(&parts.headers);
            let media_type = parts
                .headers
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let (sink, captured) = oneshot::channel::<CapturedBody>();
            tokio::spawn(async move {
                let Ok(captured) = captured.await else {
                    warn!(%exchange_id, "Response body capture lost; trace record skipped");
                    return;
                };
                let record = TraceRecord {
                    exchange_id,
                    request: snapshot,
                    correlation,
                    status,
                    response_headers,
                    media_type,
                    response_body: String::from_utf8_lossy(&captured.bytes).into_owned(),
                    body_complete: captured.complete,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                let outcome =
                    std::panic::catch_unwind(AssertUnwindSafe(|| logger.log_trace(&record)));
                if outcome.is_err() {
                    warn!(%exchange_id, "Exchange logger panicked while logging a trace");
                }
            });

            Ok(Response::from_parts(parts, Body::new(TeeBody::new(body, sink))))
        })
    }
}

/// True if the body was refused for exceeding the size limit
fn exceeds_limit(err: &axum::Error) -> bool {
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = cause {
        if e.is::<LengthLimitError>() {
            return true;
        }
        cause = e.source();
    }
    false
}

/// Synchronous error logging that survives a panicking logger
fn emit_error(logger: &Arc<dyn ExchangeLogger>, record: ErrorRecord) {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| logger.log_error(&record)));
    if outcome.is_err() {
        warn!(exchange_id = %record.exchange_id, "Exchange logger panicked while logging an error");
    }
}

/// Bytes seen by a [`TeeBody`]
#[derive(Debug)]
struct CapturedBody {
    bytes: Bytes,
    complete: bool,
}

/// Response body that forwards frames and keeps a copy of the data
struct TeeBody {
    inner: Body,
    captured: BytesMut,
    sink: Option<oneshot::Sender<CapturedBody>>,
}

impl TeeBody {
    fn new(inner: Body, sink: oneshot::Sender<CapturedBody>) -> Self {
        Self {
            inner,
            captured: BytesMut::new(),
            sink: Some(sink),
        }
    }

    fn finish(&mut self, complete: bool) {
        if let Some(sink) = self.sink.take() {
            let captured = CapturedBody {
                bytes: std::mem::take(&mut self.captured).freeze(),
                complete,
            };
            // The receiving task is gone only if the runtime is shutting down
            let _ = sink.send(captured);
        }
    }
}

impl HttpBody for TeeBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.captured.extend_from_slice(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(false);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(true);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TeeBody {
    fn drop(&mut self) {
        // Transports may stop polling once is_end_stream() reports true
        let complete = self.inner.is_end_stream();
        self.finish(complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::convert::Infallible;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct CollectingLogger {
        errors: Mutex<Vec<ErrorRecord>>,
    }

    impl ExchangeLogger for CollectingLogger {
        fn log_trace(&self, _record: &TraceRecord) {}

        fn log_error(&self, record: &ErrorRecord) {
            self.errors.lock().unwrap().push(record.clone());
        }
    }

    /// Request body that fails after its first frame
    struct BrokenBody {
        sent: bool,
    }

    impl HttpBody for BrokenBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            if self.sent {
                return Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "client went away",
                ))));
            }
            self.sent = true;
            Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"{\"idDocument\"")))))
        }
    }

    type OkHandler = fn(Request) -> std::future::Ready<Result<Response, Infallible>>;

    fn ok(_request: Request) -> std::future::Ready<Result<Response, Infallible>> {
        std::future::ready(Ok(StatusCode::OK.into_response()))
    }

    fn logged_ok_service(
        logger: Arc<CollectingLogger>,
        max_body_bytes: usize,
    ) -> RequestLog<tower::util::ServiceFn<OkHandler>> {
        let inner = tower::service_fn(ok as OkHandler);
        RequestLogLayer::new(logger, max_body_bytes).layer(inner)
    }

    #[tokio::test]
    async fn test_oversized_body_is_payload_too_large() {
        let logger = Arc::new(CollectingLogger::default());
        let service = logged_ok_service(logger.clone(), 8);

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/ner")
            .body(Body::from("{\"text\": \"far too long\"}"))
            .unwrap();
        let response = service.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(logger.errors.lock().unwrap()[0].status, Some(413));
    }

    #[tokio::test]
    async fn test_interrupted_body_is_bad_request() {
        let logger = Arc::new(CollectingLogger::default());
        let service = logged_ok_service(logger.clone(), 1024);

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/ner")
            .body(Body::new(BrokenBody { sent: false }))
            .unwrap();
        let response = service.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let errors = logger.errors.lock().unwrap();
        assert_eq!(errors[0].status, Some(400));
        assert!(errors[0].error_message.contains("could not be read"));
    }

    #[test]
    fn test_correlation_from_body() {
        let body = br#"{"idDocument": 12, "source": "jurica", "idLabel": "L1", "sourceName": null, "text": "..."}"#;
        let correlation = Correlation::from_body(body);

        assert_eq!(correlation.id_document.as_deref(), Some("12"));
        assert_eq!(correlation.source.as_deref(), Some("jurica"));
        assert_eq!(correlation.id_label.as_deref(), Some("L1"));
        assert_eq!(correlation.source_name, None);
        assert_eq!(correlation.id_decision, None);
    }

    #[test]
    fn test_correlation_tolerates_non_json() {
        assert_eq!(Correlation::from_body(b"\xff\xfe"), Correlation::default());
        assert_eq!(Correlation::from_body(b"[1, 2]"), Correlation::default());
    }

    #[test]
    fn test_snapshot_splits_query_string() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/ner?debug=1&flag")
            .header("x-request-id", "abc")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();

        let snapshot = RequestSnapshot::capture(&parts, b"{}");

        assert_eq!(snapshot.handler, "/ner");
        assert_eq!(snapshot.query_params.get("debug").map(String::as_str), Some("1"));
        assert_eq!(snapshot.query_params.get("flag").map(String::as_str), Some(""));
        assert_eq!(snapshot.headers.get("x-request-id").map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn test_tee_body_forwards_and_captures() {
        let (sink, captured) = oneshot::channel();
        let tee = TeeBody::new(Body::from("{\"ok\":true}"), sink);

        let forwarded = tee.collect().await.unwrap().to_bytes();
        let captured = captured.await.unwrap();

        assert_eq!(&forwarded[..], b"{\"ok\":true}");
        assert_eq!(captured.bytes, forwarded);
        assert!(captured.complete);
    }

    #[tokio::test]
    async fn test_tee_body_dropped_early_reports_incomplete() {
        let (sink, captured) = oneshot::channel();
        let tee = TeeBody::new(Body::from("partial"), sink);
        drop(tee);

        let captured = captured.await.unwrap();
        assert!(captured.bytes.is_empty());
        assert!(!captured.complete);
    }
}
