//! Annotation pipeline
//!
//! One run turns a [`Decision`] into a [`NerResponse`]:
//! 1. Tag the normalized text (sentences + model entities)
//! 2. Normalize source metadata
//! 3. Leading text rules
//! 4. Entity rules, written back into the text stage state
//! 5. Trailing text rules, then metadata matchers (recoverable)
//! 6. Sentence rules, then final ordering with entity ids
//! 7. Category projection when the caller asked for categories
//!
//! Runs are synchronous and CPU bound; callers execute them off the async
//! runtime.

pub mod category;
pub mod rules;
pub mod stages;

use crate::metadata::{self, MetadataError, MetadataFormatError, NormalizedMetadata};
use crate::models::{Decision, NerResponse};
use crate::tagger::{ModelError, Tagger};
use nlp_common::text::normalize_control_characters;
use nlp_common::{CharIndex, Entity};
use stages::{
    EntityInput, MatchFailure, PostProcessors, RuleOptions, SentenceInput, StageError,
    StageState, TextInput, TextRule,
};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    MetadataFormat(#[from] MetadataFormatError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Stage(#[from] StageError),
}

impl From<MetadataError> for PipelineError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::Format(e) => PipelineError::MetadataFormat(e),
            MetadataError::Model(e) => PipelineError::Model(e),
        }
    }
}

pub struct Pipeline {
    tagger: Tagger,
    postprocessors: PostProcessors,
}

impl Pipeline {
    pub fn new(tagger: Tagger, postprocessors: PostProcessors) -> Self {
        Self {
            tagger,
            postprocessors,
        }
    }

    pub fn tagger(&self) -> &Tagger {
        &self.tagger
    }

    pub fn run(&self, decision: &Decision) -> Result<NerResponse, PipelineError> {
        let started = Instant::now();
        let source = decision.source();

        let text = normalize_control_characters(&decision.text);
        let index = CharIndex::new(&text);

        let tagging = self.tagger.tag_text(&text)?;
        let mut tagger_entities = tagging.entities;
        sync_spans(&mut tagger_entities, &index, "tagger")?;

        let metadata = metadata::normalize(decision.meta.as_deref(), &source, &self.tagger)?;
        let options = RuleOptions {
            moral_persons_hidden: decision.hides_moral_persons(),
        };

        let text_input = TextInput {
            text: &index,
            metadata: metadata.as_ref(),
            options,
        };
        let mut state = StageState::new(tagger_entities.clone());
        self.run_text_rules(&self.postprocessors.text_leading, &text_input, &mut state)?;
        sync_spans(&mut state.entities, &index, "text stage")?;

        // The entity stage works on its own container and hands it back
        let mut entity_state = StageState::new(std::mem::take(&mut state.entities));
        let entity_input = EntityInput {
            metadata: metadata.as_ref(),
            options,
        };
        for rule in &self.postprocessors.entity {
            if rule.gate().is_open(&options) {
                debug!(rule = rule.name(), "Applying entity rule");
                rule.apply(&entity_input, &mut entity_state)?;
            }
        }
        sync_spans(&mut entity_state.entities, &index, "entity stage")?;
        state.entities = entity_state.entities;
        for flag in entity_state.checklist.into_vec() {
            state.checklist.push(flag);
        }

        self.run_text_rules(&self.postprocessors.text_trailing, &text_input, &mut state)?;
        if let Some(metadata) = metadata.as_ref() {
            self.run_metadata_matchers(&text_input, metadata, &mut state)?;
        }
        sync_spans(&mut state.entities, &index, "text stage")?;

        let sentence_input = SentenceInput {
            sentences: &tagging.sentences,
            metadata: metadata.as_ref(),
            options,
        };
        for rule in &self.postprocessors.sentence {
            if rule.gate().is_open(&options) {
                debug!(rule = rule.name(), "Applying sentence rule");
                rule.apply(&sentence_input, &mut state)?;
            }
        }
        sync_spans(&mut state.entities, &index, "sentence stage")?;

        let post_process = order_entities(state.entities);
        let output = match &decision.categories {
            Some(categories) => category::filter(&post_process, categories),
            None => post_process.clone(),
        };

        info!(
            id_document = decision.id_document,
            source = %source,
            tagged = tagger_entities.len(),
            entities = post_process.len(),
            output = output.len(),
            checklist = state.checklist.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Decision annotated"
        );

        Ok(NerResponse {
            tagger: tagger_entities,
            post_process,
            output,
            checklist: state.checklist,
        })
    }

    fn run_text_rules(
        &self,
        rules: &[Box<dyn TextRule>],
        input: &TextInput<'_>,
        state: &mut StageState,
    ) -> Result<(), StageError> {
        for rule in rules {
            if rule.gate().is_open(&input.options) {
                debug!(rule = rule.name(), "Applying text rule");
                rule.apply(input, state)?;
            }
        }
        Ok(())
    }

    /// Each matcher works on a copy; a recoverable failure discards the copy
    fn run_metadata_matchers(
        &self,
        input: &TextInput<'_>,
        metadata: &NormalizedMetadata,
        state: &mut StageState,
    ) -> Result<(), StageError> {
        for matcher in &self.postprocessors.metadata_matchers {
            if !matcher.handles(metadata) {
                continue;
            }
            let mut candidate = state.clone();
            match matcher.apply(input, metadata, &mut candidate) {
                Ok(()) => *state = candidate,
                Err(MatchFailure::Recoverable(reason)) => {
                    warn!(matcher = matcher.name(), %reason, "Metadata matching skipped");
                }
                Err(MatchFailure::Fatal(err)) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Check span bounds and refresh each entity's text from the document
fn sync_spans(
    entities: &mut [Entity],
    index: &CharIndex<'_>,
    stage: &'static str,
) -> Result<(), StageError> {
    let len = index.char_len();
    for entity in entities.iter_mut() {
        let slice = (entity.start < entity.end)
            .then(|| index.slice(entity.start, entity.end))
            .flatten();
        let Some(slice) = slice else {
            return Err(StageError::InvalidSpan {
                stage,
                start: entity.start,
                end: entity.end,
                len,
            });
        };
        if entity.text != slice {
            entity.text = slice.to_string();
        }
    }
    Ok(())
}

/// Stable sort by start, entity ids filled, exact duplicates removed
fn order_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut entities: Vec<Entity> = entities.into_iter().map(Entity::with_entity_id).collect();
    entities.sort_by_key(|e| e.start);

    let mut ordered: Vec<Entity> = Vec::with_capacity(entities.len());
    for entity in entities {
        let duplicate = ordered.iter().any(|kept| {
            kept.start == entity.start
                && kept.end == entity.end
                && kept.entity_id == entity.entity_id
        });
        if !duplicate {
            ordered.push(entity);
        }
    }
    ordered
}
