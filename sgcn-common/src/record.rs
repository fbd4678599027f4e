use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// One extracted entity (e.g. one species row) keyed by lower-cased column name.
pub type CandidateRecord = serde_json::Map<String, serde_json::Value>;

/// Further lookups the taxonomic service would like to run for a species.
pub type NameQueue = Vec<String>;

/// Field that carries the fingerprint on a forwarded item.
pub const ID_FIELD: &str = "id";

const NAME_FIELDS: [&str; 2] = ["scientific name", "scientific_name"];

/// Human readable identity of a candidate, used in logs so the offending row can be found in the
/// source file.
pub fn candidate_name(record: &CandidateRecord) -> String {
    NAME_FIELDS
        .iter()
        .find_map(|field| match record.get(*field) {
            Some(serde_json::Value::String(name)) => Some(name.clone()),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
        .unwrap_or_else(|| "<unnamed>".to_owned())
}

/// One unit of source work: a state's process file for a given reporting year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessUnit {
    pub sciencebase_item_id: String,
    pub state: String,
    pub year: String,
    pub source_file_url: String,
    pub source_file_date: String,
}

impl fmt::Display for ProcessUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.state, self.year)
    }
}

/// A validated, deduplicated candidate tagged with its fingerprint. Serialised flat, with the
/// fingerprint under `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardedItem {
    pub id: Fingerprint,
    #[serde(flatten)]
    fields: CandidateRecord,
}

impl ForwardedItem {
    /// The fingerprint owns the `id` key; an `id` column in the source row is replaced.
    pub fn new(id: Fingerprint, mut fields: CandidateRecord) -> Self {
        fields.remove(ID_FIELD);
        Self { id, fields }
    }

    pub fn fields(&self) -> &CandidateRecord {
        &self.fields
    }

    pub fn name(&self) -> String {
        candidate_name(&self.fields)
    }

    /// Flat representation: every candidate field plus `id`.
    pub fn to_record(&self) -> CandidateRecord {
        let mut record = self.fields.clone();
        record.insert(
            ID_FIELD.to_owned(),
            serde_json::Value::String(self.id.to_string()),
        );
        record
    }
}

/// The finalized record handed to the durable sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalRecord {
    pub row_id: String,
    pub data: CandidateRecord,
}

impl TerminalRecord {
    /// Key under which the sink stores this record.
    pub fn sink_key(&self) -> String {
        format!("final_res:{}", self.row_id)
    }
}

/// Request for additional cross-reference data from one lookup source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredLookup {
    pub name_queue: NameQueue,
    pub sppin_source: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a pipeline stage")]
pub struct UnknownStage(pub u8);

/// The four ordered stages of the conveyor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Enumerate,
    ExtractGate,
    EnrichFinalize,
    DeferredEnrich,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Enumerate,
        Stage::ExtractGate,
        Stage::EnrichFinalize,
        Stage::DeferredEnrich,
    ];

    pub fn number(&self) -> u8 {
        match self {
            Stage::Enumerate => 1,
            Stage::ExtractGate => 2,
            Stage::EnrichFinalize => 3,
            Stage::DeferredEnrich => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enumerate => "enumerate",
            Stage::ExtractGate => "extract_gate",
            Stage::EnrichFinalize => "enrich_finalize",
            Stage::DeferredEnrich => "deferred_enrich",
        }
    }
}

impl TryFrom<u8> for Stage {
    type Error = UnknownStage;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Stage::Enumerate),
            2 => Ok(Stage::ExtractGate),
            3 => Ok(Stage::EnrichFinalize),
            4 => Ok(Stage::DeferredEnrich),
            other => Err(UnknownStage(other)),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({})", self.number(), self.as_str())
    }
}

/// What travels from one stage to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum StagePayload {
    Unit(ProcessUnit),
    Item(ForwardedItem),
    Deferred(DeferredLookup),
}

impl StagePayload {
    /// The stage that consumes this payload.
    pub fn target(&self) -> Stage {
        match self {
            StagePayload::Unit(_) => Stage::ExtractGate,
            StagePayload::Item(_) => Stage::EnrichFinalize,
            StagePayload::Deferred(_) => Stage::DeferredEnrich,
        }
    }
}

/// Envelope a transport wraps around every payload it carries between stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMessage {
    pub run_id: String,
    pub sb_item_id: String,
    pub download_uri: String,
    pub stage: Stage,
    pub payload: StagePayload,
}
