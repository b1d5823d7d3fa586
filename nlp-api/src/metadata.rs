//! Normalization of source-specific decision metadata
//!
//! Callers send party metadata in the shape of their source system:
//! - `jurinet`: rows of 19 positional cells (see [`JURINET_COLUMNS`])
//! - `jurica`: party objects whose identity strings must go through the
//!   entity model to extract person names
//!
//! Fewer than two rows means "no metadata". Other sources carry none.

use crate::models::Source;
use crate::tagger::{ModelError, Tagger};
use nlp_common::Category;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Jurinet column order
pub const JURINET_COLUMNS: [&str; 19] = [
    "ID_DOCUMENT",
    "TYPE_PERSONNE",
    "ID_PARTIE",
    "NATURE_PARTIE",
    "TYPE_PARTIE",
    "ID_TITRE",
    "NOM",
    "PRENOM",
    "NOM_MARITAL",
    "AUTRE_PRENOM",
    "ALIAS",
    "SIGLE",
    "DOMICILIATION",
    "LIG_ADR1",
    "LIG_ADR2",
    "LIG_ADR3",
    "CODE_POSTAL",
    "NOM_COMMUNE",
    "NUMERO",
];

/// Metadata rows did not have the shape their source requires
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Metadata are not in the good format. (row {row}: {reason})")]
pub struct MetadataFormatError {
    pub row: usize,
    pub reason: String,
}

impl MetadataFormatError {
    fn new(row: usize, reason: impl Into<String>) -> Self {
        Self {
            row,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Format(#[from] MetadataFormatError),

    #[error("Name extraction from metadata failed: {0}")]
    Model(#[from] ModelError),
}

/// Scalar cell of a jurinet row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    fn from_json(value: &Value) -> Result<Option<Cell>, String> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(Cell::Text(s.clone()))),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Some(Cell::Integer(i))),
                None => n
                    .as_f64()
                    .map(|f| Some(Cell::Float(f)))
                    .ok_or_else(|| format!("unsupported number {}", n)),
            },
            other => Err(format!("cell must be a scalar, got {}", other)),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One jurinet party row, columns in [`JURINET_COLUMNS`] order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct JurinetParty {
    pub id_document: Option<Cell>,
    pub type_personne: Option<Cell>,
    pub id_partie: Option<Cell>,
    pub nature_partie: Option<Cell>,
    pub type_partie: Option<Cell>,
    pub id_titre: Option<Cell>,
    pub nom: Option<Cell>,
    pub prenom: Option<Cell>,
    pub nom_marital: Option<Cell>,
    pub autre_prenom: Option<Cell>,
    pub alias: Option<Cell>,
    pub sigle: Option<Cell>,
    pub domiciliation: Option<Cell>,
    pub lig_adr1: Option<Cell>,
    pub lig_adr2: Option<Cell>,
    pub lig_adr3: Option<Cell>,
    pub code_postal: Option<Cell>,
    pub nom_commune: Option<Cell>,
    pub numero: Option<Cell>,
}

impl JurinetParty {
    fn from_row(row: usize, value: &Value) -> Result<Self, MetadataFormatError> {
        let cells = value
            .as_array()
            .ok_or_else(|| MetadataFormatError::new(row, "row must be an array"))?;
        if cells.len() != JURINET_COLUMNS.len() {
            return Err(MetadataFormatError::new(
                row,
                format!("expected {} cells, got {}", JURINET_COLUMNS.len(), cells.len()),
            ));
        }

        let mut parsed = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                Cell::from_json(cell).map_err(|reason| {
                    MetadataFormatError::new(row, format!("{}: {}", JURINET_COLUMNS[i], reason))
                })
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter();
        let mut next = || parsed.next().flatten();

        Ok(Self {
            id_document: next(),
            type_personne: next(),
            id_partie: next(),
            nature_partie: next(),
            type_partie: next(),
            id_titre: next(),
            nom: next(),
            prenom: next(),
            nom_marital: next(),
            autre_prenom: next(),
            alias: next(),
            sigle: next(),
            domiciliation: next(),
            lig_adr1: next(),
            lig_adr2: next(),
            lig_adr3: next(),
            code_postal: next(),
            nom_commune: next(),
            numero: next(),
        })
    }

    /// Name-bearing text cells
    pub fn names(&self) -> impl Iterator<Item = &str> {
        [
            &self.nom,
            &self.prenom,
            &self.nom_marital,
            &self.autre_prenom,
            &self.alias,
        ]
        .into_iter()
        .filter_map(|cell| cell.as_ref().and_then(Cell::as_text))
    }
}

/// Person name extracted from a jurica party
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JuricaName {
    pub text: String,
    pub entity: String,
}

/// Only natural persons need an identity
#[derive(Debug, Deserialize)]
struct JuricaParty {
    #[serde(default)]
    identite: Option<String>,
    attributes: JuricaAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JuricaAttributes {
    type_personne: String,
}

/// Metadata in a source-independent shape
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedMetadata {
    Jurinet(Vec<JurinetParty>),
    Jurica(Vec<JuricaName>),
}

/// Normalize raw metadata rows for the given source
pub fn normalize(
    raw: Option<&[Value]>,
    source: &Source,
    tagger: &Tagger,
) -> Result<Option<NormalizedMetadata>, MetadataError> {
    let rows = match raw {
        Some(rows) if rows.len() >= 2 => rows,
        _ => return Ok(None),
    };

    match source {
        Source::Jurinet => {
            let parties = rows
                .iter()
                .enumerate()
                .map(|(i, row)| JurinetParty::from_row(i, row))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(NormalizedMetadata::Jurinet(parties)))
        }
        Source::Jurica => Ok(Some(NormalizedMetadata::Jurica(jurica_names(rows, tagger)?))),
        other => {
            debug!(source = %other, rows = rows.len(), "Ignoring metadata for source");
            Ok(None)
        }
    }
}

fn jurica_names(rows: &[Value], tagger: &Tagger) -> Result<Vec<JuricaName>, MetadataError> {
    let parties = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            serde_json::from_value::<JuricaParty>(row.clone())
                .map_err(|e| MetadataFormatError::new(i, e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let identities: Vec<&str> = parties
        .iter()
        .enumerate()
        .filter(|(_, party)| party.attributes.type_personne == "PP")
        .map(|(i, party)| {
            party
                .identite
                .as_deref()
                .ok_or_else(|| MetadataFormatError::new(i, "missing field `identite`"))
        })
        .collect::<Result<_, _>>()?;

    let mut names: Vec<JuricaName> = Vec::new();
    for tagged in tagger.tag_sentences(&identities)? {
        for span in tagged.spans {
            if span.label != Category::PersonnePhysique.external_name() {
                continue;
            }
            let name = JuricaName {
                text: span.text,
                entity: Category::PersonnePhysique.external_name().to_string(),
            };
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    Ok(names)
}
