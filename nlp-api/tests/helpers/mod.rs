//! Shared test doubles for the HTTP integration tests

#![allow(dead_code)]

use axum::{body::Body, http::Request, response::Response, Router};
use http_body_util::BodyExt;
use nlp_api::api::request_log::{ErrorRecord, ExchangeLogger, TraceRecord};
use nlp_api::pipeline::{stages::PostProcessors, Pipeline};
use nlp_api::tagger::lexicon::LexiconEntry;
use nlp_api::tagger::{
    EntityModel, LexiconModel, ModelError, RuleTokenizer, Sentence, TaggedSentence, Tagger,
};
use nlp_api::{build_router, AppState};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use tokio::sync::mpsc as tokio_mpsc;

/// Lexicon model that counts its calls
pub struct CountingModel {
    inner: LexiconModel,
    pub calls: Arc<AtomicUsize>,
}

impl CountingModel {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            inner: lexicon(entries),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl EntityModel for CountingModel {
    fn name(&self) -> &str {
        "counting"
    }

    fn predict(&self, sentences: Vec<Sentence>) -> Result<Vec<TaggedSentence>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.predict(sentences)
    }
}

/// Model that blocks inside `predict` until the test releases it
pub struct GatedModel {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

/// Test side of a [`GatedModel`]
pub struct GateControl {
    pub entered: mpsc::Receiver<()>,
    pub release: mpsc::Sender<()>,
}

impl GatedModel {
    pub fn new() -> (Self, GateControl) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        (
            Self {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            },
            GateControl {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl EntityModel for GatedModel {
    fn name(&self) -> &str {
        "gated"
    }

    fn predict(&self, sentences: Vec<Sentence>) -> Result<Vec<TaggedSentence>, ModelError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        Ok(sentences
            .into_iter()
            .map(|sentence| TaggedSentence {
                sentence,
                spans: Vec::new(),
            })
            .collect())
    }
}

/// Model that panics on every call
pub struct PanickingModel;

impl EntityModel for PanickingModel {
    fn name(&self) -> &str {
        "panicking"
    }

    fn predict(&self, _sentences: Vec<Sentence>) -> Result<Vec<TaggedSentence>, ModelError> {
        panic!("model weights corrupted")
    }
}

/// Logger that panics on every record
pub struct PanickingLogger;

impl ExchangeLogger for PanickingLogger {
    fn log_trace(&self, _record: &TraceRecord) {
        panic!("trace sink unavailable");
    }

    fn log_error(&self, _record: &ErrorRecord) {
        panic!("error sink unavailable");
    }
}

/// Exchange record captured by [`RecordingLogger`]
#[derive(Debug, Clone)]
pub enum Recorded {
    Trace(TraceRecord),
    Error(ErrorRecord),
}

pub struct RecordingLogger {
    sink: tokio_mpsc::UnboundedSender<Recorded>,
}

impl RecordingLogger {
    pub fn new() -> (Arc<Self>, tokio_mpsc::UnboundedReceiver<Recorded>) {
        let (sink, records) = tokio_mpsc::unbounded_channel();
        (Arc::new(Self { sink }), records)
    }
}

impl ExchangeLogger for RecordingLogger {
    fn log_trace(&self, record: &TraceRecord) {
        let _ = self.sink.send(Recorded::Trace(record.clone()));
    }

    fn log_error(&self, record: &ErrorRecord) {
        let _ = self.sink.send(Recorded::Error(record.clone()));
    }
}

pub fn lexicon(entries: &[(&str, &str)]) -> LexiconModel {
    let entries = entries
        .iter()
        .map(|(text, label)| LexiconEntry {
            text: text.to_string(),
            label: label.to_string(),
            score: 0.9,
        })
        .collect();
    LexiconModel::from_entries("test-lexicon", entries)
}

pub fn state_with_model(model: Arc<dyn EntityModel>) -> AppState {
    let tagger = Tagger::new(Arc::new(RuleTokenizer::new()), model);
    AppState::new(Pipeline::new(tagger, PostProcessors::standard()))
}

pub fn build_app(model: Arc<dyn EntityModel>) -> Router {
    build_router(state_with_model(model))
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    post_raw(uri, body.to_string())
}

pub fn post_raw(uri: &str, body: impl Into<String>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
