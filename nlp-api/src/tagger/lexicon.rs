//! Gazetteer entity model
//!
//! Loads a JSON lexicon and tags every occurrence of its entries, matched
//! token by token against the sentence. At each position the longest entry
//! wins; matches never overlap.
//!
//! ```json
//! {"entries": [{"text": "Pierre", "label": "personnePhysique", "score": 0.99}]}
//! ```

use super::{EntityModel, ModelError, RuleTokenizer, Sentence, Span, TaggedSentence, Tokenizer};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn default_score() -> f32 {
    1.0
}

/// One lexicon entry as stored on disk
#[derive(Debug, Clone, Deserialize)]
pub struct LexiconEntry {
    pub text: String,
    pub label: String,
    #[serde(default = "default_score")]
    pub score: f32,
}

#[derive(Debug, Deserialize)]
struct LexiconFile {
    entries: Vec<LexiconEntry>,
}

#[derive(Debug, Clone)]
struct CompiledEntry {
    tokens: Vec<String>,
    label: String,
    score: f32,
}

/// Lexicon-backed [`EntityModel`]
#[derive(Debug, Clone)]
pub struct LexiconModel {
    name: String,
    /// Entries keyed by first token, longest first
    by_first_token: HashMap<String, Vec<CompiledEntry>>,
    len: usize,
}

impl LexiconModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ModelError::Load(format!("{}: {}", path.display(), e)))?;
        let file: LexiconFile = serde_json::from_str(&content)
            .map_err(|e| ModelError::Load(format!("{}: {}", path.display(), e)))?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lexicon".to_string());
        Ok(Self::from_entries(name, file.entries))
    }

    pub fn from_entries(name: impl Into<String>, entries: Vec<LexiconEntry>) -> Self {
        let tokenizer = RuleTokenizer::new();
        let mut by_first_token: HashMap<String, Vec<CompiledEntry>> = HashMap::new();
        let mut len = 0;

        for entry in entries {
            let tokens: Vec<String> = tokenizer
                .tokenize(&entry.text)
                .into_iter()
                .map(|t| t.text)
                .collect();
            let Some(first) = tokens.first().cloned() else {
                continue;
            };
            by_first_token.entry(first).or_default().push(CompiledEntry {
                tokens,
                label: entry.label,
                score: entry.score,
            });
            len += 1;
        }

        for candidates in by_first_token.values_mut() {
            // Stable: equal lengths keep file order
            candidates.sort_by(|a, b| b.tokens.len().cmp(&a.tokens.len()));
        }

        Self {
            name: name.into(),
            by_first_token,
            len,
        }
    }

    /// Number of usable entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn tag(&self, sentence: &Sentence) -> Vec<Span> {
        let tokens = &sentence.tokens;
        let mut spans = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            let matched = self.by_first_token.get(&tokens[i].text).and_then(|candidates| {
                candidates.iter().find(|entry| {
                    let n = entry.tokens.len();
                    i + n <= tokens.len()
                        && entry
                            .tokens
                            .iter()
                            .zip(&tokens[i..i + n])
                            .all(|(expected, token)| *expected == token.text)
                })
            });

            let Some(entry) = matched else {
                i += 1;
                continue;
            };

            let last = i + entry.tokens.len() - 1;
            let (start, end) = (tokens[i].start, tokens[last].end);
            let text: String = sentence.text.chars().skip(start).take(end - start).collect();
            spans.push(Span {
                text,
                start,
                end,
                label: entry.label.clone(),
                score: entry.score,
            });
            i = last + 1;
        }

        spans
    }
}

impl EntityModel for LexiconModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, sentences: Vec<Sentence>) -> Result<Vec<TaggedSentence>, ModelError> {
        Ok(sentences
            .into_iter()
            .map(|sentence| {
                let spans = self.tag(&sentence);
                TaggedSentence { sentence, spans }
            })
            .collect())
    }
}
