//! Contracts for the external services the driver calls but does not own.
//!
//! The scheduler builds one [`Collaborators`] bundle and hands it to every stage invocation, so
//! the driver never decides how a catalog client or a taxonomic lookup client is constructed or
//! pooled. Every call is awaited in place; timeouts and retries belong to the implementation or
//! to the surrounding transport.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sgcn_common::{
    CandidateRecord, ForwardedItem, NameQueue, ProcessUnit, Stage, StagePayload, TerminalRecord,
};

/// Enumerates the source units that are ready to be processed for the current run.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn enumerate_processable_units(&self) -> Result<Vec<ProcessUnit>>;
}

/// Loads the reference data every extraction needs. Must be idempotent: it is called once per
/// stage-2 invocation.
#[async_trait]
pub trait MetadataCache: Send + Sync {
    async fn warm(&self) -> Result<MetadataHandle>;
}

/// Reads candidate records out of one unit of source data.
#[async_trait]
pub trait SourceExtractor: Send + Sync {
    async fn extract_candidates(
        &self,
        unit: &ProcessUnit,
        metadata: &SgcnMetadata,
    ) -> Result<Vec<CandidateRecord>>;
}

/// Schema check for a single candidate. `Ok(false)` means the record is invalid; `Err` means the
/// check itself could not run.
#[async_trait]
pub trait RecordValidator: Send + Sync {
    async fn validate(&self, record: &CandidateRecord) -> Result<bool>;
}

/// Taxonomic cross-reference service (ITIS, WoRMS and the deferred sources).
#[async_trait]
pub trait TaxonomyService: Send + Sync {
    async fn lookup_taxonomy(&self, item: &ForwardedItem) -> Result<TaxonomyLookup>;

    async fn lookup_additional(&self, name_queue: &NameQueue, source_tag: &str) -> Result<()>;
}

/// Forwarding primitives granted by the transport for the duration of one invocation. Both are
/// fire-and-forget: implementations report their own delivery failures.
#[async_trait]
pub trait StageSender: Send + Sync {
    async fn send_to_stage(&self, stage: Stage, payload: StagePayload);

    async fn send_final(&self, record: TerminalRecord);
}

/// Result of a taxonomic lookup. An empty summary is treated exactly like a missing one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyLookup {
    #[serde(default)]
    pub summary: Option<CandidateRecord>,
    #[serde(default)]
    pub name_queue: NameQueue,
}

impl TaxonomyLookup {
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Explicit ITIS identifier to apply to a reported scientific name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItisOverride {
    #[serde(rename = "ScientificName_original")]
    pub scientific_name: String,
    #[serde(rename = "taxonomicAuthorityID")]
    pub taxonomic_authority_id: String,
}

/// Reference data shared by every extraction within a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SgcnMetadata {
    historic_names: HashSet<String>,
    itis_overrides: Vec<ItisOverride>,
}

impl SgcnMetadata {
    pub fn new(
        historic_names: impl IntoIterator<Item = String>,
        itis_overrides: Vec<ItisOverride>,
    ) -> Self {
        Self {
            historic_names: historic_names.into_iter().collect(),
            itis_overrides,
        }
    }

    /// Whether the name appears on the 2005 national list.
    pub fn is_historic(&self, scientific_name: &str) -> bool {
        self.historic_names.contains(scientific_name)
    }

    pub fn itis_override(&self, scientific_name: &str) -> Option<&str> {
        self.itis_overrides
            .iter()
            .find(|o| o.scientific_name == scientific_name)
            .map(|o| o.taxonomic_authority_id.as_str())
    }
}

pub type MetadataHandle = Arc<SgcnMetadata>;

/// Every service a stage invocation may call.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub metadata: Arc<dyn MetadataCache>,
    pub extractor: Arc<dyn SourceExtractor>,
    pub validator: Arc<dyn RecordValidator>,
    pub taxonomy: Arc<dyn TaxonomyService>,
}
