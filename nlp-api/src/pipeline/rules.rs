//! Default postprocessing rules
//!
//! Assembled in execution order by [`PostProcessors::standard`].

use super::stages::{
    EntityInput, EntityRule, MatchFailure, MetadataMatcher, PostProcessors, RuleGate,
    SentenceInput, SentenceRule, StageError, StageState, TextInput, TextRule,
};
use crate::metadata::NormalizedMetadata;
use nlp_common::{Category, CharIndex, Entity, EntitySource};
use regex::Regex;
use std::sync::LazyLock;

/// Checklist flag for account numbers no entity covers
pub const BANK_ACCOUNT_FLAG: &str =
    "Il semblerait qu'un ou plusieurs numéros de comptes bancaires n'aient pas été repérées";

/// Checklist flag for suspiciously long person names
pub const LONG_NAME_FLAG: &str =
    "Une ou plusieurs entités personnePhysique semblent anormalement longues";

/// IBANs and long digit runs
static BANK_ACCOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[A-Z]{2}\d{2}(?:\s?[A-Z0-9]{4}){3,7}(?:\s?[A-Z0-9]{1,3})?|\d{8,})\b")
        .expect("bank account pattern is valid")
});

/// "section AB n° 123", "parcelle C 45"
static CADASTRE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?i:section|parcelle)s?\s+[A-Z]{1,2}\s*(?:n°\s*)?\d+\b")
        .expect("cadastre pattern is valid")
});

/// Facilities whose name reveals that a minor is involved
static JUVENILE_FACILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i:centre éducatif (?:fermé|renforcé)|centre de placement immédiat",
        r"|foyer (?:de l['’]enfance|éducatif)|maison d['’]enfants à caractère social",
        r"|établissement pénitentiaire pour mineurs)",
        r"(?:\s+(?:de|du|des|d['’])\s*(?:la\s+|l['’])?\p{Lu}[\p{L}-]*)?",
    ))
    .expect("juvenile facility pattern is valid")
});

/// Web addresses, without trailing punctuation
static WEBSITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:https?://|www\.)[^\s<>]*[^\s<>.,;:!?)»]")
        .expect("website pattern is valid")
});

const QUOTES: &[char] = &['"', '«', '»', '“', '”', '\'', '‘', '’'];

/// Lowercase articles the model sometimes glues to a name
const ARTICLES: &[&str] = &["les ", "le ", "la ", "l'", "l’"];

/// Name particles never matched on their own
const NAME_PARTICLES: &[&str] = &[
    "de", "du", "des", "la", "le", "les", "et", "van", "von", "der", "den", "di", "da", "y",
];

/// Elided particles glued to the next name part
const ELISIONS: &[&str] = &["d'", "l'", "d’", "l’"];

/// Words of a person name above which the span is flagged
const MAX_NAME_WORDS: usize = 6;

impl PostProcessors {
    pub fn standard() -> Self {
        Self {
            text_leading: vec![Box::new(QuoteBoundaries), Box::new(LeadingArticle)],
            entity: vec![
                Box::new(EntitySanity),
                Box::new(AddressInMoral),
                Box::new(NaturalPersonsInMoral),
                Box::new(ProfessionalToPerson),
                Box::new(YearInDate),
                Box::new(LocalityInAddress),
            ],
            text_trailing: vec![
                Box::new(PropagateTaggedNames::default()),
                Box::new(BankAccountCheck),
                Box::new(JuvenileFacilities),
                Box::new(NamesInWebsites),
                Box::new(CadastreReferences),
            ],
            metadata_matchers: vec![Box::new(JurinetPartyMatcher), Box::new(JuricaNameMatcher)],
            sentence: vec![Box::new(CitiesInMoral)],
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whole-word occurrences of `needle` as char ranges
fn word_occurrences(
    index: &CharIndex<'_>,
    needle: &str,
    case_insensitive: bool,
) -> Result<Vec<(usize, usize)>, regex::Error> {
    let flags = if case_insensitive { "(?i)" } else { "" };
    let pattern = Regex::new(&format!("{}{}", flags, regex::escape(needle)))?;
    let text = index.text();

    Ok(pattern
        .find_iter(text)
        .filter(|m| {
            let before = text[..m.start()].chars().next_back();
            let after = text[m.end()..].chars().next();
            !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
        })
        .filter_map(|m| index.char_range(m.start(), m.end()))
        .collect())
}

/// Tag every uncovered occurrence of `needle`; returns how many were added
fn tag_occurrences(
    index: &CharIndex<'_>,
    state: &mut StageState,
    needle: &str,
    label: &str,
    case_insensitive: bool,
) -> Result<usize, regex::Error> {
    let mut added = 0;
    for (start, end) in word_occurrences(index, needle, case_insensitive)? {
        if state.is_covered(start, end) {
            continue;
        }
        let Some(text) = index.slice(start, end) else {
            continue;
        };
        state.entities.push(Entity::from_rule(text, start, end, label));
        added += 1;
    }
    Ok(added)
}

/// Drop entities of `inner` category lying inside an entity of `outer`
fn drop_contained(state: &mut StageState, inner: Category, outer: Category) {
    let containers: Vec<Entity> = state
        .entities
        .iter()
        .filter(|e| e.is(outer))
        .cloned()
        .collect();

    state
        .entities
        .retain(|e| !(e.is(inner) && containers.iter().any(|c| c.contains(e))));
}

/// Strips quotes and whitespace from both ends of every span
pub struct QuoteBoundaries;

impl TextRule for QuoteBoundaries {
    fn name(&self) -> &'static str {
        "quote_boundaries"
    }

    fn apply(&self, _input: &TextInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        let trimmable = |c: &char| QUOTES.contains(c) || c.is_whitespace();

        for entity in &mut state.entities {
            let chars: Vec<char> = entity.text.chars().collect();
            let lead = chars.iter().take_while(|c| trimmable(*c)).count();
            let trail = chars[lead..].iter().rev().take_while(|c| trimmable(*c)).count();
            if lead == 0 && trail == 0 {
                continue;
            }
            entity.start += lead;
            entity.end = entity.end.saturating_sub(trail).max(entity.start);
            entity.text = chars[lead..chars.len() - trail].iter().collect();
        }

        state.entities.retain(|e| e.start < e.end);
        Ok(())
    }
}

/// Removes a lowercase article glued to the front of a name
pub struct LeadingArticle;

impl TextRule for LeadingArticle {
    fn name(&self) -> &'static str {
        "leading_article"
    }

    fn apply(&self, _input: &TextInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        for entity in &mut state.entities {
            if !(entity.is(Category::PersonnePhysique) || entity.is(Category::PersonneMorale)) {
                continue;
            }
            let Some(article) = ARTICLES.iter().find(|a| entity.text.starts_with(*a)) else {
                continue;
            };
            let rest = entity.text[article.len()..].trim_start();
            if rest.is_empty() {
                continue;
            }
            let skipped = entity.text.chars().count() - rest.chars().count();
            entity.text = rest.to_string();
            entity.start += skipped;
            entity.source = EntitySource::PostProcess;
        }
        Ok(())
    }
}

/// Drops spans without any alphanumeric char and flags overlong names
pub struct EntitySanity;

impl EntityRule for EntitySanity {
    fn name(&self) -> &'static str {
        "entity_sanity"
    }

    fn apply(&self, _input: &EntityInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        state
            .entities
            .retain(|e| e.text.chars().any(char::is_alphanumeric));

        let overlong = state.entities.iter().any(|e| {
            e.is(Category::PersonnePhysique) && e.text.split_whitespace().count() > MAX_NAME_WORDS
        });
        if overlong {
            state.flag_once(LONG_NAME_FLAG);
        }
        Ok(())
    }
}

/// Extends a date missing its year over an adjacent year-only span
///
/// "12 mars" + "1980" separated by at most one char become "12 mars 1980";
/// the year span is removed. Entity text is refreshed from the document
/// after the stage.
pub struct YearInDate;

impl YearInDate {
    fn is_date(entity: &Entity) -> bool {
        [Category::DateNaissance, Category::DateDeces, Category::DateMariage]
            .into_iter()
            .any(|c| entity.is(c))
    }

    fn is_year(text: &str) -> bool {
        text.len() == 4 && text.chars().all(|c| c.is_ascii_digit())
    }

    fn has_year(text: &str) -> bool {
        text.split(|c: char| !c.is_ascii_digit()).any(Self::is_year)
    }
}

impl EntityRule for YearInDate {
    fn name(&self) -> &'static str {
        "year_in_date"
    }

    fn apply(&self, _input: &EntityInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        let entities = std::mem::take(&mut state.entities);
        let mut absorbed = vec![false; entities.len()];
        let mut merged = Vec::with_capacity(entities.len());

        for (i, entity) in entities.iter().enumerate() {
            if absorbed[i] {
                continue;
            }
            let mut entity = entity.clone();
            if Self::is_date(&entity) && !Self::has_year(&entity.text) {
                let year = entities.iter().enumerate().skip(i + 1).find(|(j, other)| {
                    !absorbed[*j]
                        && Self::is_year(&other.text)
                        && other.start >= entity.end
                        && other.start - entity.end <= 1
                });
                if let Some((j, year)) = year {
                    absorbed[j] = true;
                    entity.end = year.end;
                    entity.source = EntitySource::PostProcess;
                }
            }
            merged.push(entity);
        }

        state.entities = merged;
        Ok(())
    }
}

/// Drops person names inside a moral person span
pub struct NaturalPersonsInMoral;

impl EntityRule for NaturalPersonsInMoral {
    fn name(&self) -> &'static str {
        "natural_persons_in_moral"
    }

    fn gate(&self) -> RuleGate {
        RuleGate::MoralPersonsHidden
    }

    fn apply(&self, _input: &EntityInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        drop_contained(state, Category::PersonnePhysique, Category::PersonneMorale);
        Ok(())
    }
}

/// Drops localities already part of an address
pub struct LocalityInAddress;

impl EntityRule for LocalityInAddress {
    fn name(&self) -> &'static str {
        "locality_in_address"
    }

    fn apply(&self, _input: &EntityInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        drop_contained(state, Category::Localite, Category::Adresse);
        Ok(())
    }
}

/// Drops addresses that are part of a moral person name
pub struct AddressInMoral;

impl EntityRule for AddressInMoral {
    fn name(&self) -> &'static str {
        "address_in_moral"
    }

    fn apply(&self, _input: &EntityInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        drop_contained(state, Category::Adresse, Category::PersonneMorale);
        Ok(())
    }
}

/// Relabels professionals also tagged as a natural person
///
/// The model sometimes labels one occurrence of a party name as a lawyer or
/// magistrate. When the same text carries `personnePhysique` elsewhere, the
/// natural person label wins.
pub struct ProfessionalToPerson;

impl ProfessionalToPerson {
    fn is_professional(entity: &Entity) -> bool {
        entity.is(Category::ProfessionnelAvocat)
            || entity.is(Category::ProfessionnelMagistratGreffier)
    }
}

impl EntityRule for ProfessionalToPerson {
    fn name(&self) -> &'static str {
        "professional_to_person"
    }

    fn apply(&self, _input: &EntityInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        let persons: Vec<String> = state
            .entities
            .iter()
            .filter(|e| e.is(Category::PersonnePhysique))
            .map(|e| e.text.to_lowercase())
            .collect();

        for entity in &mut state.entities {
            if Self::is_professional(entity) && persons.contains(&entity.text.to_lowercase()) {
                entity.label = Category::PersonnePhysique.external_name().to_string();
                entity.source = EntitySource::PostProcess;
            }
        }
        Ok(())
    }
}

/// Tags facility names that reveal a minor
///
/// Spans the model found inside the facility name are replaced by the
/// facility span.
pub struct JuvenileFacilities;

impl TextRule for JuvenileFacilities {
    fn name(&self) -> &'static str {
        "juvenile_facilities"
    }

    fn apply(&self, input: &TextInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        let index = input.text;
        let found: Vec<(usize, usize)> = JUVENILE_FACILITY_RE
            .find_iter(index.text())
            .filter_map(|m| index.char_range(m.start(), m.end()))
            .collect();

        for (start, end) in found {
            let Some(text) = index.slice(start, end) else {
                continue;
            };
            let label = Category::Etablissement.external_name();
            let facility = Entity::from_rule(text, start, end, label);
            let straddles = state
                .entities
                .iter()
                .any(|e| e.overlaps(start, end) && !facility.contains(e));
            if straddles {
                continue;
            }
            state.entities.retain(|e| !facility.contains(e));
            state.entities.push(facility);
        }
        Ok(())
    }
}

/// Tags web addresses containing a tagged name
pub struct NamesInWebsites;

impl TextRule for NamesInWebsites {
    fn name(&self) -> &'static str {
        "names_in_websites"
    }

    fn apply(&self, input: &TextInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        let names: Vec<String> = state
            .entities
            .iter()
            .filter(|e| e.is(Category::PersonnePhysique) || e.is(Category::PersonneMorale))
            .flat_map(|e| e.text.split_whitespace())
            .filter(|word| word.chars().count() >= 3)
            .map(str::to_lowercase)
            .collect();
        if names.is_empty() {
            return Ok(());
        }

        let index = input.text;
        let found: Vec<(usize, usize)> = WEBSITE_RE
            .find_iter(index.text())
            .filter(|m| {
                let site = m.as_str().to_lowercase();
                names.iter().any(|name| site.contains(name.as_str()))
            })
            .filter_map(|m| index.char_range(m.start(), m.end()))
            .collect();

        for (start, end) in found {
            if state.is_covered(start, end) {
                continue;
            }
            if let Some(text) = index.slice(start, end) {
                state.entities.push(Entity::from_rule(
                    text,
                    start,
                    end,
                    Category::SiteWebSensible.external_name(),
                ));
            }
        }
        Ok(())
    }
}

/// Tags further occurrences of names the model found once
pub struct PropagateTaggedNames {
    categories: Vec<Category>,
}

impl Default for PropagateTaggedNames {
    fn default() -> Self {
        Self {
            categories: vec![
                Category::PersonnePhysique,
                Category::ProfessionnelAvocat,
                Category::ProfessionnelMagistratGreffier,
                Category::DateDeces,
            ],
        }
    }
}

impl TextRule for PropagateTaggedNames {
    fn name(&self) -> &'static str {
        "propagate_tagged_names"
    }

    fn apply(&self, input: &TextInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        let mut seeds: Vec<(String, String)> = Vec::new();
        for entity in &state.entities {
            if entity.char_len() < 2 || !self.categories.iter().any(|c| entity.is(*c)) {
                continue;
            }
            let seed = (entity.text.clone(), entity.label.clone());
            if !seeds.contains(&seed) {
                seeds.push(seed);
            }
        }

        for (text, label) in seeds {
            tag_occurrences(input.text, state, &text, &label, false)
                .map_err(|e| StageError::rule(self.name(), e.to_string()))?;
        }
        Ok(())
    }
}

/// Flags account numbers left untagged
pub struct BankAccountCheck;

impl TextRule for BankAccountCheck {
    fn name(&self) -> &'static str {
        "bank_account_check"
    }

    fn apply(&self, input: &TextInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        let index = input.text;
        let uncovered = BANK_ACCOUNT_RE
            .find_iter(index.text())
            .filter_map(|m| index.char_range(m.start(), m.end()))
            .any(|(start, end)| !state.is_covered(start, end));

        if uncovered {
            state.flag_once(BANK_ACCOUNT_FLAG);
        }
        Ok(())
    }
}

/// Tags land registry references
pub struct CadastreReferences;

impl TextRule for CadastreReferences {
    fn name(&self) -> &'static str {
        "cadastre_references"
    }

    fn apply(&self, input: &TextInput<'_>, state: &mut StageState) -> Result<(), StageError> {
        let index = input.text;
        let found: Vec<(usize, usize)> = CADASTRE_RE
            .find_iter(index.text())
            .filter_map(|m| index.char_range(m.start(), m.end()))
            .collect();

        for (start, end) in found {
            if state.is_covered(start, end) {
                continue;
            }
            if let Some(text) = index.slice(start, end) {
                state.entities.push(Entity::from_rule(
                    text,
                    start,
                    end,
                    Category::Cadastre.external_name(),
                ));
            }
        }
        Ok(())
    }
}

/// Tags party names listed in jurinet metadata
pub struct JurinetPartyMatcher;

impl MetadataMatcher for JurinetPartyMatcher {
    fn name(&self) -> &'static str {
        "jurinet_parties"
    }

    fn handles(&self, metadata: &NormalizedMetadata) -> bool {
        matches!(metadata, NormalizedMetadata::Jurinet(_))
    }

    fn apply(
        &self,
        input: &TextInput<'_>,
        metadata: &NormalizedMetadata,
        state: &mut StageState,
    ) -> Result<(), MatchFailure> {
        let NormalizedMetadata::Jurinet(parties) = metadata else {
            return Ok(());
        };

        let label = Category::PersonnePhysique.external_name();
        for party in parties {
            let is_lawyer = party
                .type_personne
                .as_ref()
                .and_then(|c| c.as_text())
                .is_some_and(|t| t.eq_ignore_ascii_case("AVOCAT"));
            if is_lawyer {
                continue;
            }
            for name in party.names() {
                let name = name.trim();
                if name.split_whitespace().nth(1).is_some() {
                    tag_occurrences(input.text, state, name, label, true)
                        .map_err(|e| MatchFailure::Recoverable(format!("{}: {}", name, e)))?;
                }
                for word in name.split_whitespace().filter_map(name_word) {
                    tag_capitalized(input.text, state, word, label)
                        .map_err(|e| MatchFailure::Recoverable(format!("{}: {}", word, e)))?;
                }
            }
        }
        Ok(())
    }
}

/// Significant part of a name token, without particle or elision
fn name_word(token: &str) -> Option<&str> {
    let lower = token.to_lowercase();
    if NAME_PARTICLES.contains(&lower.as_str()) {
        return None;
    }
    let word = ELISIONS
        .iter()
        .find(|e| lower.starts_with(*e))
        .map_or(token, |e| &token[e.len()..]);
    (word.chars().count() >= 2).then_some(word)
}

/// Like [`tag_occurrences`], keeping only occurrences written with a capital
fn tag_capitalized(
    index: &CharIndex<'_>,
    state: &mut StageState,
    word: &str,
    label: &str,
) -> Result<usize, regex::Error> {
    let mut added = 0;
    for (start, end) in word_occurrences(index, word, true)? {
        let Some(text) = index.slice(start, end) else {
            continue;
        };
        if !text.chars().next().is_some_and(char::is_uppercase) || state.is_covered(start, end) {
            continue;
        }
        state.entities.push(Entity::from_rule(text, start, end, label));
        added += 1;
    }
    Ok(added)
}

/// Tags names extracted from jurica parties
pub struct JuricaNameMatcher;

impl MetadataMatcher for JuricaNameMatcher {
    fn name(&self) -> &'static str {
        "jurica_names"
    }

    fn handles(&self, metadata: &NormalizedMetadata) -> bool {
        matches!(metadata, NormalizedMetadata::Jurica(_))
    }

    fn apply(
        &self,
        input: &TextInput<'_>,
        metadata: &NormalizedMetadata,
        state: &mut StageState,
    ) -> Result<(), MatchFailure> {
        let NormalizedMetadata::Jurica(names) = metadata else {
            return Ok(());
        };

        for name in names {
            tag_occurrences(input.text, state, &name.text, &name.entity, true)
                .map_err(|e| MatchFailure::Recoverable(format!("{}: {}", name.text, e)))?;
        }
        Ok(())
    }
}

/// Drops localities inside a moral person span of the same sentence
pub struct CitiesInMoral;

impl SentenceRule for CitiesInMoral {
    fn name(&self) -> &'static str {
        "cities_in_moral"
    }

    fn gate(&self) -> RuleGate {
        RuleGate::MoralPersonsHidden
    }

    fn apply(
        &self,
        input: &SentenceInput<'_>,
        state: &mut StageState,
    ) -> Result<(), StageError> {
        let sentence_of = |entity: &Entity| {
            input.sentences.iter().position(|s| {
                let (start, end) = s.char_range();
                start <= entity.start && entity.end <= end
            })
        };

        let containers: Vec<(usize, usize, Option<usize>)> = state
            .entities
            .iter()
            .filter(|e| e.is(Category::PersonneMorale))
            .map(|e| (e.start, e.end, sentence_of(e)))
            .collect();

        state.entities.retain(|e| {
            if !e.is(Category::Localite) {
                return true;
            }
            let sentence = sentence_of(e);
            !containers.iter().any(|&(start, end, container_sentence)| {
                start <= e.start && e.end <= end && container_sentence == sentence
            })
        });
        Ok(())
    }
}
