//! Postprocessing stage contracts
//!
//! Every rule works on a shared [`StageState`]: the entity list and the
//! review checklist. What else a rule may look at depends on its stage:
//!
//! | Stage    | Trait               | Extra input                       |
//! |----------|---------------------|-----------------------------------|
//! | text     | [`TextRule`]        | decision text                     |
//! | entity   | [`EntityRule`]      | nothing but entities              |
//! | sentence | [`SentenceRule`]    | tagged sentences                  |
//! | text     | [`MetadataMatcher`] | decision text + normalized metadata |
//!
//! Metadata is threaded through every stage.

use crate::metadata::NormalizedMetadata;
use crate::tagger::TaggedSentence;
use nlp_common::{CharIndex, Checklist, Entity};
use thiserror::Error;

/// Mutable state handed from stage to stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageState {
    pub entities: Vec<Entity>,
    pub checklist: Checklist,
}

impl StageState {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            checklist: Checklist::new(),
        }
    }

    /// True if any entity shares a char with `[start, end)`
    pub fn is_covered(&self, start: usize, end: usize) -> bool {
        self.entities.iter().any(|e| e.overlaps(start, end))
    }

    /// Push a flag unless it is already present
    pub fn flag_once(&mut self, flag: &str) {
        if !self.checklist.contains(flag) {
            self.checklist.push(flag);
        }
    }
}

/// Request-level switches that gate optional rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleOptions {
    /// Categories were requested and `personneMorale` is not among them
    pub moral_persons_hidden: bool,
}

/// When a rule runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleGate {
    Always,
    /// Only when [`RuleOptions::moral_persons_hidden`] is set
    MoralPersonsHidden,
}

impl RuleGate {
    pub fn is_open(self, options: &RuleOptions) -> bool {
        match self {
            RuleGate::Always => true,
            RuleGate::MoralPersonsHidden => options.moral_persons_hidden,
        }
    }
}

pub struct TextInput<'a> {
    pub text: &'a CharIndex<'a>,
    pub metadata: Option<&'a NormalizedMetadata>,
    pub options: RuleOptions,
}

pub struct EntityInput<'a> {
    pub metadata: Option<&'a NormalizedMetadata>,
    pub options: RuleOptions,
}

pub struct SentenceInput<'a> {
    pub sentences: &'a [TaggedSentence],
    pub metadata: Option<&'a NormalizedMetadata>,
    pub options: RuleOptions,
}

/// Non-recoverable rule failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("rule {rule} failed: {reason}")]
    Rule { rule: &'static str, reason: String },

    #[error("{stage} produced invalid span [{start}, {end}) for text of {len} chars")]
    InvalidSpan {
        stage: &'static str,
        start: usize,
        end: usize,
        len: usize,
    },
}

impl StageError {
    pub fn rule(rule: &'static str, reason: impl Into<String>) -> Self {
        StageError::Rule {
            rule,
            reason: reason.into(),
        }
    }
}

/// Outcome of a failed metadata matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchFailure {
    /// Logged; the pipeline continues without this matcher's changes
    Recoverable(String),
    /// Aborts the analysis
    Fatal(StageError),
}

pub trait TextRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn gate(&self) -> RuleGate {
        RuleGate::Always
    }

    fn apply(&self, input: &TextInput<'_>, state: &mut StageState) -> Result<(), StageError>;
}

pub trait EntityRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn gate(&self) -> RuleGate {
        RuleGate::Always
    }

    fn apply(&self, input: &EntityInput<'_>, state: &mut StageState) -> Result<(), StageError>;
}

pub trait SentenceRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn gate(&self) -> RuleGate {
        RuleGate::Always
    }

    fn apply(&self, input: &SentenceInput<'_>, state: &mut StageState)
        -> Result<(), StageError>;
}

/// Source-specific matching of metadata names against the text
pub trait MetadataMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this matcher understands the given metadata
    fn handles(&self, metadata: &NormalizedMetadata) -> bool;

    fn apply(
        &self,
        input: &TextInput<'_>,
        metadata: &NormalizedMetadata,
        state: &mut StageState,
    ) -> Result<(), MatchFailure>;
}

/// Rules of every stage, in execution order
#[derive(Default)]
pub struct PostProcessors {
    /// Text rules run before the entity stage
    pub text_leading: Vec<Box<dyn TextRule>>,
    pub entity: Vec<Box<dyn EntityRule>>,
    /// Text rules run on the entity stage's output
    pub text_trailing: Vec<Box<dyn TextRule>>,
    /// Run after `text_trailing`; failures are recoverable
    pub metadata_matchers: Vec<Box<dyn MetadataMatcher>>,
    pub sentence: Vec<Box<dyn SentenceRule>>,
}

impl PostProcessors {
    /// No rules: the pipeline only tags, orders and filters
    pub fn empty() -> Self {
        Self::default()
    }
}
