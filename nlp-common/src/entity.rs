//! Entity, category and checklist types
//!
//! These are the wire types of the annotation API: field names follow the
//! camelCase JSON contract callers already depend on.

use serde::{Deserialize, Serialize};

/// Provenance of an entity span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntitySource {
    /// Detected by the tagging model
    #[serde(rename = "NER model")]
    Model,
    /// Added or rewritten by a postprocessing rule
    #[serde(rename = "postprocess")]
    PostProcess,
}

/// A labeled span of the decision text
///
/// `start`/`end` are char offsets into the normalized decision text, with
/// `0 <= start < end <= char_len(text)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub source: EntitySource,
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl Entity {
    /// Entity detected by the model
    pub fn from_model(
        text: impl Into<String>,
        start: usize,
        end: usize,
        label: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            label: label.into(),
            source: EntitySource::Model,
            score: Some(score),
            entity_id: None,
        }
    }

    /// Entity produced by a postprocessing rule
    pub fn from_rule(
        text: impl Into<String>,
        start: usize,
        end: usize,
        label: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            label: label.into(),
            source: EntitySource::PostProcess,
            score: None,
            entity_id: None,
        }
    }

    /// Join key: `lower(label) + "_" + lower(text)`
    pub fn derive_entity_id(&self) -> String {
        format!("{}_{}", self.label.to_lowercase(), self.text.to_lowercase())
    }

    /// Fill `entity_id` from label and text
    pub fn with_entity_id(mut self) -> Self {
        self.entity_id = Some(self.derive_entity_id());
        self
    }

    /// Span length in chars
    pub fn char_len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// True if `other` lies entirely within this span
    pub fn contains(&self, other: &Entity) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True if the two spans share at least one char
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }

    /// Case-insensitive label comparison against a category
    pub fn is(&self, category: Category) -> bool {
        Category::from_label(&self.label) == Some(category)
    }
}

/// Known annotation categories
///
/// The tagging model may emit labels in lowercase ("personnephysique");
/// callers filter on the camelCase form ("personnePhysique").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    PersonnePhysique,
    PersonneMorale,
    PersonnePhysicoMorale,
    Adresse,
    Localite,
    Etablissement,
    DateNaissance,
    DateDeces,
    DateMariage,
    Insee,
    ProfessionnelMagistratGreffier,
    ProfessionnelAvocat,
    NumeroIdentifiant,
    NumeroSiretSiren,
    CompteBancaire,
    PlaqueImmatriculation,
    Cadastre,
    SiteWebSensible,
    AnnotationSupplementaire,
}

impl Category {
    pub const ALL: [Category; 19] = [
        Category::PersonnePhysique,
        Category::PersonneMorale,
        Category::PersonnePhysicoMorale,
        Category::Adresse,
        Category::Localite,
        Category::Etablissement,
        Category::DateNaissance,
        Category::DateDeces,
        Category::DateMariage,
        Category::Insee,
        Category::ProfessionnelMagistratGreffier,
        Category::ProfessionnelAvocat,
        Category::NumeroIdentifiant,
        Category::NumeroSiretSiren,
        Category::CompteBancaire,
        Category::PlaqueImmatriculation,
        Category::Cadastre,
        Category::SiteWebSensible,
        Category::AnnotationSupplementaire,
    ];

    /// External (camelCase) label
    pub fn external_name(self) -> &'static str {
        match self {
            Category::PersonnePhysique => "personnePhysique",
            Category::PersonneMorale => "personneMorale",
            Category::PersonnePhysicoMorale => "personnePhysicoMorale",
            Category::Adresse => "adresse",
            Category::Localite => "localite",
            Category::Etablissement => "etablissement",
            Category::DateNaissance => "dateNaissance",
            Category::DateDeces => "dateDeces",
            Category::DateMariage => "dateMariage",
            Category::Insee => "insee",
            Category::ProfessionnelMagistratGreffier => "professionnelMagistratGreffier",
            Category::ProfessionnelAvocat => "professionnelAvocat",
            Category::NumeroIdentifiant => "numeroIdentifiant",
            Category::NumeroSiretSiren => "numeroSiretSiren",
            Category::CompteBancaire => "compteBancaire",
            Category::PlaqueImmatriculation => "plaqueImmatriculation",
            Category::Cadastre => "cadastre",
            Category::SiteWebSensible => "siteWebSensible",
            Category::AnnotationSupplementaire => "annotationSupplementaire",
        }
    }

    /// Resolve a label in either its internal or external spelling
    pub fn from_label(label: &str) -> Option<Category> {
        Self::ALL
            .into_iter()
            .find(|c| c.external_name().eq_ignore_ascii_case(label))
    }

    /// Map any label to its external form; unknown labels pass through
    pub fn external_label(label: &str) -> String {
        match Self::from_label(label) {
            Some(category) => category.external_name().to_string(),
            None => label.to_string(),
        }
    }
}

/// Human review flags accumulated across pipeline stages
///
/// Append-only, insertion order preserved, no implicit dedup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checklist(Vec<String>);

impl Checklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, flag: impl Into<String>) {
        self.0.push(flag.into());
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.0.iter().any(|f| f == flag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_serialization_matches_wire_format() {
        let entity = Entity::from_model("Pierre", 0, 6, "personnePhysique", 0.98);
        let json = serde_json::to_value(&entity).unwrap();

        assert_eq!(json["text"], "Pierre");
        assert_eq!(json["start"], 0);
        assert_eq!(json["end"], 6);
        assert_eq!(json["label"], "personnePhysique");
        assert_eq!(json["source"], "NER model");
        assert!(json.get("entityId").is_none());

        let rule = Entity::from_rule("Nantes", 55, 61, "localite").with_entity_id();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["source"], "postprocess");
        assert!(json["score"].is_null());
        assert_eq!(json["entityId"], "localite_nantes");
    }

    #[test]
    fn test_entity_id_is_lowercased() {
        let entity = Entity::from_model("DUPONT", 7, 13, "personnePhysique", 0.9);
        assert_eq!(entity.derive_entity_id(), "personnephysique_dupont");
    }

    #[test]
    fn test_category_label_mapping() {
        assert_eq!(Category::external_label("personnephysique"), "personnePhysique");
        assert_eq!(Category::external_label("professionnelavocat"), "professionnelAvocat");
        assert_eq!(Category::external_label("adresse"), "adresse");
        assert_eq!(Category::external_label("inconnu"), "inconnu");
        assert_eq!(Category::from_label("PERSONNEMORALE"), Some(Category::PersonneMorale));
    }

    #[test]
    fn test_span_relations() {
        let moral = Entity::from_model("clinique des Anges", 174, 192, "personneMorale", 0.9);
        let inner = Entity::from_rule("Anges", 187, 192, "personnePhysique");
        assert!(moral.contains(&inner));
        assert!(!inner.contains(&moral));
        assert!(moral.overlaps(190, 200));
        assert!(!moral.overlaps(192, 200));
    }

    #[test]
    fn test_checklist_keeps_insertion_order_and_duplicates() {
        let mut checklist = Checklist::new();
        checklist.push("b");
        checklist.push("a");
        checklist.push("b");

        assert_eq!(checklist.iter().collect::<Vec<_>>(), vec!["b", "a", "b"]);
        assert_eq!(serde_json::to_string(&checklist).unwrap(), r#"["b","a","b"]"#);
    }
}
