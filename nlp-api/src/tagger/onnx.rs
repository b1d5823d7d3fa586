//! ONNX Runtime token-classification model
//!
//! The model directory must contain:
//! - `model.onnx`: token classifier with `input_ids`/`attention_mask`
//!   inputs (and optionally `token_type_ids`) and `[1, seq, labels]` logits
//! - `tokenizer.json`: Hugging Face tokenizer
//! - `labels.json`: BIO tag list, index-aligned with the logits
//!   (`["O", "B-personnePhysique", "I-personnePhysique", ...]`)

use super::{EntityModel, ModelError, Sentence, Span, TaggedSentence};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Encoding;
use tracing::{info, warn};

/// Input sequences longer than this are truncated
const MAX_SEQUENCE_LENGTH: usize = 512;

pub struct OnnxEntityModel {
    name: String,
    /// `Session::run` needs exclusive access
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
    labels: Vec<String>,
    uses_token_type_ids: bool,
}

impl OnnxEntityModel {
    pub fn load(model_dir: &Path) -> Result<Self, ModelError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let labels_path = model_dir.join("labels.json");

        for required in [&model_path, &tokenizer_path, &labels_path] {
            if !required.exists() {
                return Err(ModelError::Load(format!("{} not found", required.display())));
            }
        }

        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(&model_path))
            .map_err(|e| ModelError::Load(format!("{}: {}", model_path.display(), e)))?;
        let uses_token_type_ids = session
            .inputs()
            .iter()
            .any(|input| input.name() == "token_type_ids");

        let mut tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| ModelError::Load(format!("{}: {}", tokenizer_path.display(), e)))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| ModelError::Load(format!("set truncation: {}", e)))?;

        let labels: Vec<String> = std::fs::read_to_string(&labels_path)
            .map_err(|e| ModelError::Load(format!("{}: {}", labels_path.display(), e)))
            .and_then(|content| {
                serde_json::from_str(&content)
                    .map_err(|e| ModelError::Load(format!("{}: {}", labels_path.display(), e)))
            })?;
        if labels.is_empty() {
            return Err(ModelError::Load(format!("{} is empty", labels_path.display())));
        }

        let name = model_dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        info!(
            model = %model_path.display(),
            labels = labels.len(),
            uses_token_type_ids,
            "Loaded ONNX entity model"
        );

        Ok(Self {
            name,
            session: Mutex::new(session),
            tokenizer,
            labels,
            uses_token_type_ids,
        })
    }

    fn tag(&self, sentence: &Sentence) -> Result<Vec<Span>, ModelError> {
        let encoding = self
            .tokenizer
            .encode_char_offsets(sentence.text.as_str(), true)
            .map_err(|e| ModelError::Inference(format!("tokenize: {}", e)))?;

        if let Some(kept) = truncated_at(&encoding) {
            warn!(
                offset = sentence.offset,
                kept_chars = kept,
                total_chars = sentence.text.chars().count(),
                "Sentence exceeds {} tokens; the tail is left untagged",
                MAX_SEQUENCE_LENGTH
            );
        }

        let seq_len = encoding.get_ids().len();
        if seq_len == 0 {
            return Ok(Vec::new());
        }

        let shape = [1_i64, seq_len as i64];
        let to_i64 = |values: &[u32]| values.iter().map(|&v| v as i64).collect::<Vec<_>>();
        let ids = Tensor::from_array((shape, to_i64(encoding.get_ids()).into_boxed_slice()))
            .map_err(inference_error)?;
        let mask = Tensor::from_array((
            shape,
            to_i64(encoding.get_attention_mask()).into_boxed_slice(),
        ))
        .map_err(inference_error)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Inference("session lock poisoned".to_string()))?;

        let outputs = if self.uses_token_type_ids {
            let type_ids =
                Tensor::from_array((shape, to_i64(encoding.get_type_ids()).into_boxed_slice()))
                    .map_err(inference_error)?;
            session.run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask,
                "token_type_ids" => type_ids,
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask,
            ])
        }
        .map_err(inference_error)?;

        let (dims, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;
        let num_labels = self.labels.len();
        if dims.len() != 3 || dims[1] as usize != seq_len || dims[2] as usize != num_labels {
            return Err(ModelError::Inference(format!(
                "unexpected logits shape {:?}, expected [1, {}, {}]",
                dims, seq_len, num_labels
            )));
        }

        let predictions: Vec<TokenPrediction> = encoding
            .get_offsets()
            .iter()
            .zip(encoding.get_special_tokens_mask())
            .enumerate()
            .filter(|(_, (offsets, special))| **special == 0 && offsets.0 < offsets.1)
            .map(|(i, (&(start, end), _))| {
                let (label, score) = argmax_softmax(&logits[i * num_labels..(i + 1) * num_labels]);
                TokenPrediction {
                    start,
                    end,
                    tag: self.labels[label].as_str(),
                    score,
                }
            })
            .collect();

        Ok(aggregate_bio(&sentence.text, &predictions))
    }
}

/// Chars covered before truncation, if the tokenizer dropped tokens
fn truncated_at(encoding: &Encoding) -> Option<usize> {
    if encoding.get_overflowing().is_empty() {
        return None;
    }
    Some(encoding.get_offsets().iter().map(|&(_, end)| end).max().unwrap_or(0))
}

fn inference_error(e: ort::Error) -> ModelError {
    ModelError::Inference(e.to_string())
}

impl EntityModel for OnnxEntityModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, sentences: Vec<Sentence>) -> Result<Vec<TaggedSentence>, ModelError> {
        sentences
            .into_iter()
            .map(|sentence| {
                let spans = self.tag(&sentence)?;
                Ok(TaggedSentence { sentence, spans })
            })
            .collect()
    }
}

/// Tag predicted for one sub-word token; offsets are chars
#[derive(Debug, Clone, Copy)]
struct TokenPrediction<'a> {
    start: usize,
    end: usize,
    tag: &'a str,
    score: f32,
}

fn argmax_softmax(logits: &[f32]) -> (usize, f32) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exp.iter().sum();

    let mut best = 0;
    for (i, &e) in exp.iter().enumerate() {
        if e > exp[best] {
            best = i;
        }
    }
    let score = if sum > 0.0 { exp[best] / sum } else { 0.0 };
    (best, score)
}

/// Merge BIO-tagged tokens into labeled spans with the mean token score
fn aggregate_bio(text: &str, predictions: &[TokenPrediction<'_>]) -> Vec<Span> {
    struct Open {
        label: String,
        start: usize,
        end: usize,
        scores: Vec<f32>,
    }

    let close = |open: Open, spans: &mut Vec<Span>| {
        let score = open.scores.iter().sum::<f32>() / open.scores.len() as f32;
        spans.push(Span {
            text: text.chars().skip(open.start).take(open.end - open.start).collect(),
            start: open.start,
            end: open.end,
            label: open.label,
            score,
        });
    };

    let mut spans = Vec::new();
    let mut current: Option<Open> = None;

    for prediction in predictions {
        let (prefix, label) = match prediction.tag.split_once('-') {
            Some((prefix, label)) if prefix == "B" || prefix == "I" => (prefix, label),
            _ => {
                if let Some(open) = current.take() {
                    close(open, &mut spans);
                }
                continue;
            }
        };

        match current.as_mut() {
            Some(open) if prefix == "I" && open.label == label => {
                open.end = prediction.end;
                open.scores.push(prediction.score);
            }
            _ => {
                if let Some(open) = current.take() {
                    close(open, &mut spans);
                }
                current = Some(Open {
                    label: label.to_string(),
                    start: prediction.start,
                    end: prediction.end,
                    scores: vec![prediction.score],
                });
            }
        }
    }

    if let Some(open) = current {
        close(open, &mut spans);
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(start: usize, end: usize, tag: &str, score: f32) -> TokenPrediction<'_> {
        TokenPrediction { start, end, tag, score }
    }

    #[test]
    fn test_bio_aggregation() {
        let text = "Pierre Dupont habite Paris";
        let predictions = vec![
            prediction(0, 6, "B-personnePhysique", 0.9),
            prediction(7, 13, "I-personnePhysique", 0.7),
            prediction(14, 20, "O", 0.99),
            prediction(21, 26, "B-localite", 0.8),
        ];

        let spans = aggregate_bio(text, &predictions);

        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "Pierre Dupont");
        assert!((spans[0].score - 0.8).abs() < 1e-6);
        assert_eq!(spans[1].label, "localite");
        assert_eq!((spans[1].start, spans[1].end), (21, 26));
    }

    #[test]
    fn test_inside_tag_with_new_label_opens_span() {
        let predictions = vec![
            prediction(0, 3, "B-adresse", 0.9),
            prediction(4, 8, "I-localite", 0.9),
        ];
        let spans = aggregate_bio("rue Lyon", &predictions);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].text, "Lyon");
    }

    #[test]
    fn test_truncation_detected_from_overflow() {
        let mut encoding = Encoding::default();
        assert_eq!(truncated_at(&encoding), None);

        encoding.set_overflowing(vec![Encoding::default()]);
        assert_eq!(truncated_at(&encoding), Some(0));
    }

    #[test]
    fn test_argmax_softmax() {
        let (index, score) = argmax_softmax(&[0.0, 2.0, 0.0]);
        assert_eq!(index, 1);
        assert!(score > 0.7 && score < 0.8);
    }
}
