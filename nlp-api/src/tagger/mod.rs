//! Tagging contracts and backends
//!
//! The tagging model and the tokenizer are external collaborators: the
//! pipeline only sees them through [`EntityModel`] and [`Tokenizer`].
//! [`Tagger`] pairs the two and exposes document-level tagging.
//!
//! # Backends
//! - [`LexiconModel`]: gazetteer lookup from a JSON file
//! - `OnnxEntityModel` (feature `onnx`): token classification with ONNX Runtime

pub mod lexicon;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod tokenizer;

use nlp_common::Entity;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub use lexicon::LexiconModel;
#[cfg(feature = "onnx")]
pub use onnx::OnnxEntityModel;
pub use tokenizer::RuleTokenizer;

/// Model errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// Weights or auxiliary files could not be loaded
    #[error("Model load failed: {0}")]
    Load(String),

    /// Inference call failed
    #[error("Model inference failed: {0}")]
    Inference(String),

    /// The model returned a different number of sentences than it was given
    #[error("Model returned {returned} sentences for {expected} inputs")]
    SentenceCount { expected: usize, returned: usize },
}

/// Token of a sentence; offsets are chars relative to the sentence start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Sentence produced by the tokenizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    /// Char offset of the sentence start in the document
    pub offset: usize,
    pub tokens: Vec<Token>,
}

/// Labeled span; offsets are chars relative to the sentence start
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub score: f32,
}

/// Sentence annotated by the model
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedSentence {
    pub sentence: Sentence,
    pub spans: Vec<Span>,
}

impl TaggedSentence {
    /// Spans as document-level entities
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        let offset = self.sentence.offset;
        self.spans.iter().map(move |span| {
            Entity::from_model(
                span.text.clone(),
                offset + span.start,
                offset + span.end,
                span.label.clone(),
                span.score,
            )
        })
    }

    /// Document char range covered by the sentence
    pub fn char_range(&self) -> (usize, usize) {
        let start = self.sentence.offset;
        (start, start + self.sentence.text.chars().count())
    }
}

/// Sentence segmentation and tokenization
pub trait Tokenizer: Send + Sync {
    /// Split a document into sentences
    fn segment(&self, text: &str) -> Vec<Sentence>;

    /// Tokenize a single sentence (no segmentation)
    fn tokenize(&self, text: &str) -> Vec<Token>;
}

/// Named entity model
///
/// Deterministic given the same weights: the same sentences always yield
/// the same spans.
pub trait EntityModel: Send + Sync {
    /// Model identifier for logs
    fn name(&self) -> &str;

    /// Annotate sentences; output order matches input order
    fn predict(&self, sentences: Vec<Sentence>) -> Result<Vec<TaggedSentence>, ModelError>;
}

/// Result of tagging one document
#[derive(Debug, Clone)]
pub struct Tagging {
    pub sentences: Vec<TaggedSentence>,
    /// Entities in detection order
    pub entities: Vec<Entity>,
}

/// Tokenizer + model pair shared by every pipeline stage
#[derive(Clone)]
pub struct Tagger {
    tokenizer: Arc<dyn Tokenizer>,
    model: Arc<dyn EntityModel>,
}

impl Tagger {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, model: Arc<dyn EntityModel>) -> Self {
        Self { tokenizer, model }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Segment and tag a whole document
    pub fn tag_text(&self, text: &str) -> Result<Tagging, ModelError> {
        let sentences = self.tokenizer.segment(text);
        let sentences = self.predict(sentences)?;
        let entities = sentences.iter().flat_map(TaggedSentence::entities).collect();
        Ok(Tagging { sentences, entities })
    }

    /// Tag each string as one independent sentence
    pub fn tag_sentences(&self, texts: &[&str]) -> Result<Vec<TaggedSentence>, ModelError> {
        let sentences = texts
            .iter()
            .map(|text| Sentence {
                text: (*text).to_string(),
                offset: 0,
                tokens: self.tokenizer.tokenize(text),
            })
            .collect();
        self.predict(sentences)
    }

    fn predict(&self, sentences: Vec<Sentence>) -> Result<Vec<TaggedSentence>, ModelError> {
        let expected = sentences.len();
        if expected == 0 {
            return Ok(Vec::new());
        }
        let tagged = self.model.predict(sentences)?;
        if tagged.len() != expected {
            return Err(ModelError::SentenceCount {
                expected,
                returned: tagged.len(),
            });
        }
        Ok(tagged)
    }
}

/// Load the entity model selected by the configured model location
///
/// - `*.json` file → [`LexiconModel`]
/// - directory → `OnnxEntityModel` (requires the `onnx` feature)
pub fn load_entity_model(path: &Path) -> Result<Arc<dyn EntityModel>, ModelError> {
    if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
        let model = LexiconModel::load(path)?;
        info!(model = %path.display(), entries = model.len(), "Loaded lexicon entity model");
        return Ok(Arc::new(model));
    }

    if path.is_dir() {
        return load_onnx_model(path);
    }

    Err(ModelError::Load(format!(
        "Model location {} is neither a lexicon JSON file nor a model directory",
        path.display()
    )))
}

#[cfg(feature = "onnx")]
fn load_onnx_model(path: &Path) -> Result<Arc<dyn EntityModel>, ModelError> {
    let model = OnnxEntityModel::load(path)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx_model(path: &Path) -> Result<Arc<dyn EntityModel>, ModelError> {
    Err(ModelError::Load(format!(
        "{} is a model directory but nlp-api was built without the `onnx` feature",
        path.display()
    )))
}
