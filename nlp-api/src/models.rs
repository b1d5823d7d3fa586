//! Request and response bodies of the annotation endpoint

use nlp_common::{Checklist, Entity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A court decision submitted for annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "idDocument", alias = "documentId")]
    pub id_document: i64,

    pub text: String,

    /// Originating system ("jurinet", "jurica", "juritj", ...)
    #[serde(default)]
    pub source: Option<String>,

    /// Source-specific party rows
    #[serde(default, alias = "rawMetadata")]
    pub meta: Option<Vec<Value>>,

    /// External category names the caller wants in `output`
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl Decision {
    /// Field-level checks serde cannot express
    pub fn validate(&self) -> Result<(), ValidationIssue> {
        if self.text.is_empty() {
            return Err(ValidationIssue::value_error(&["body", "text"], "text field is empty"));
        }
        Ok(())
    }

    pub fn source(&self) -> Source {
        Source::from_field(self.source.as_deref())
    }

    /// True when the caller restricted categories and left moral persons out
    pub fn hides_moral_persons(&self) -> bool {
        match &self.categories {
            Some(categories) if !categories.is_empty() => {
                !categories.iter().any(|c| c == "personneMorale")
            }
            _ => false,
        }
    }
}

/// Originating system of a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Jurinet,
    Jurica,
    Juritj,
    Absent,
    Other(String),
}

impl Source {
    pub fn from_field(value: Option<&str>) -> Self {
        match value {
            None => Source::Absent,
            Some("jurinet") => Source::Jurinet,
            Some("jurica") => Source::Jurica,
            Some("juritj") => Source::Juritj,
            Some(other) => Source::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Jurinet => f.write_str("jurinet"),
            Source::Jurica => f.write_str("jurica"),
            Source::Juritj => f.write_str("juritj"),
            Source::Absent => f.write_str("None"),
            Source::Other(name) => f.write_str(name),
        }
    }
}

/// One entry of a 422 `detail` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ValidationIssue {
    pub fn new(loc: &[&str], msg: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            loc: loc.iter().map(|s| s.to_string()).collect(),
            msg: msg.into(),
            kind: kind.into(),
        }
    }

    pub fn value_error(loc: &[&str], msg: impl Into<String>) -> Self {
        Self::new(loc, msg, "value_error")
    }
}

/// Annotation result
///
/// - `tagger`: raw model entities
/// - `post_process`: entities after every rule stage, ordered
/// - `output`: `post_process` projected on the requested categories
/// - `checklist`: review flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NerResponse {
    pub tagger: Vec<Entity>,
    pub post_process: Vec<Entity>,
    pub output: Vec<Entity>,
    pub checklist: Checklist,
}
