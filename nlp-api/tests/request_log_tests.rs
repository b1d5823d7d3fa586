//! Exchange logging through the full router

mod helpers;

use axum::http::StatusCode;
use axum::{routing::get as get_route, Router};
use helpers::*;
use http_body_util::BodyExt;
use nlp_api::{build_router, with_service_layers};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;

async fn next_record(records: &mut UnboundedReceiver<Recorded>) -> Recorded {
    tokio::time::timeout(Duration::from_secs(5), records.recv())
        .await
        .expect("exchange record within timeout")
        .expect("logger still alive")
}

fn lexicon_state() -> nlp_api::AppState {
    state_with_model(Arc::new(CountingModel::new(&[("Dupont", "personnePhysique")])))
}

#[tokio::test]
async fn test_success_emits_trace_with_forwarded_body() {
    let (logger, mut records) = RecordingLogger::new();
    let app = build_router(lexicon_state().with_exchange_logger(logger));

    let response = app
        .oneshot(post_json(
            "/ner?verbose=1",
            &json!({"idDocument": 12, "source": "jurica", "idLabel": "L-1", "text": "M. Dupont."}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let forwarded = response.into_body().collect().await.unwrap().to_bytes();

    let Recorded::Trace(trace) = next_record(&mut records).await else {
        panic!("expected a trace record");
    };
    assert_eq!(trace.status, 200);
    assert_eq!(trace.response_body.as_bytes(), &forwarded[..]);
    assert!(trace.body_complete);
    assert_eq!(trace.request.method, "POST");
    assert_eq!(trace.request.handler, "/ner");
    assert_eq!(
        trace.request.query_params.get("verbose").map(String::as_str),
        Some("1")
    );
    assert_eq!(trace.correlation.id_document.as_deref(), Some("12"));
    assert_eq!(trace.correlation.source.as_deref(), Some("jurica"));
    assert_eq!(trace.correlation.id_label.as_deref(), Some("L-1"));
    assert_eq!(trace.media_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn test_validation_failure_emits_error_record() {
    let (logger, mut records) = RecordingLogger::new();
    let app = build_router(lexicon_state().with_exchange_logger(logger));

    let response = app
        .oneshot(post_json(
            "/ner",
            &json!({"idDocument": 13, "source": "jurinet", "text": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let Recorded::Error(error) = next_record(&mut records).await else {
        panic!("expected an error record");
    };
    assert_eq!(error.status, Some(422));
    assert!(error.error_message.contains("text field is empty"));
    assert_eq!(error.correlation.id_document.as_deref(), Some("13"));
    assert_eq!(error.correlation.source.as_deref(), Some("jurinet"));
    assert!(error.request.body.contains("\"idDocument\":13"));
}

#[tokio::test]
async fn test_busy_rejection_emits_error_record() {
    let (logger, mut records) = RecordingLogger::new();
    let state = lexicon_state().with_exchange_logger(logger);
    let _held = state.gate.try_acquire().unwrap();
    let app = build_router(state);

    let response = app
        .oneshot(post_json("/ner", &json!({"idDocument": 14, "text": "M. Dupont."})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let Recorded::Error(error) = next_record(&mut records).await else {
        panic!("expected an error record");
    };
    assert_eq!(error.status, Some(429));
    assert_eq!(error.error_message, "Pseudonymisation in progress, endpoint is busy");
    assert_eq!(error.correlation.id_document.as_deref(), Some("14"));
}

#[tokio::test]
async fn test_oversized_body_rejected_and_logged() {
    let (logger, mut records) = RecordingLogger::new();
    let app = build_router(
        lexicon_state()
            .with_exchange_logger(logger)
            .with_max_body_bytes(64),
    );

    let text = "Dupont ".repeat(50);
    let response = app
        .oneshot(post_json("/ner", &json!({"idDocument": 15, "text": text})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let Recorded::Error(error) = next_record(&mut records).await else {
        panic!("expected an error record");
    };
    assert_eq!(error.status, Some(413));
}

#[tokio::test]
async fn test_health_check_is_traced() {
    let (logger, mut records) = RecordingLogger::new();
    let app = build_router(lexicon_state().with_exchange_logger(logger));

    let response = app.oneshot(get("/")).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(!body.is_empty());

    let Recorded::Trace(trace) = next_record(&mut records).await else {
        panic!("expected a trace record");
    };
    assert_eq!(trace.request.method, "GET");
    assert_eq!(trace.request.handler, "/");
    assert_eq!(trace.correlation, Default::default());
}

#[tokio::test]
async fn test_panicking_logger_does_not_block_responses() {
    let app = build_router(lexicon_state().with_exchange_logger(Arc::new(PanickingLogger)));

    let ok = app
        .clone()
        .oneshot(post_json("/ner", &json!({"idDocument": 16, "text": "M. Dupont."})))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let body = body_json(ok).await;
    assert_eq!(body["tagger"][0]["text"], "Dupont");

    let rejected = app
        .oneshot(post_json("/ner", &json!({"idDocument": 17, "text": ""})))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(rejected).await;
    assert_eq!(body["detail"][0]["msg"], "text field is empty");
}

async fn explode() -> &'static str {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_handler_panic_becomes_logged_500() {
    let (logger, mut records) = RecordingLogger::new();
    let state = lexicon_state().with_exchange_logger(logger);
    let app = with_service_layers(Router::new().route("/explode", get_route(explode)), &state);

    let response = app.oneshot(get("/explode")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("handler exploded"));

    let Recorded::Error(error) = next_record(&mut records).await else {
        panic!("expected an error record");
    };
    assert_eq!(error.status, Some(500));
    assert_eq!(error.request.handler, "/explode");
}

#[tokio::test]
async fn test_model_panic_releases_gate_and_is_logged() {
    let (logger, mut records) = RecordingLogger::new();
    let state = state_with_model(Arc::new(PanickingModel)).with_exchange_logger(logger);
    let gate = state.gate.clone();
    let app = build_router(state);

    let response = app
        .clone()
        .oneshot(post_json(
            "/ner",
            &json!({"idDocument": 18, "source": "jurica", "text": "M. Dupont."}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Failure of document id 18 from jurica with following trace:"));
    assert!(!gate.is_busy());

    let Recorded::Error(error) = next_record(&mut records).await else {
        panic!("expected an error record");
    };
    assert_eq!(error.status, Some(400));
    assert_eq!(error.correlation.id_document.as_deref(), Some("18"));

    // The slot is free for the next decision
    let health = app.oneshot(get("/build-info")).await.unwrap();
    let body = body_json(health).await;
    assert_eq!(body["busy"], false);
}
