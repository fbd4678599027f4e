//! In-memory collaborators and a recording transport for exercising stage handlers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use sgcn_common::{
    CandidateRecord, ForwardedItem, NameQueue, ProcessUnit, Stage, StagePayload, TerminalRecord,
};

use crate::collaborators::{
    Catalog, Collaborators, MetadataCache, MetadataHandle, RecordValidator, SgcnMetadata,
    SourceExtractor, StageSender, TaxonomyLookup, TaxonomyService,
};

pub fn record(value: serde_json::Value) -> CandidateRecord {
    value
        .as_object()
        .cloned()
        .expect("test records must be JSON objects")
}

pub fn unit(state: &str, year: &str) -> ProcessUnit {
    ProcessUnit {
        sciencebase_item_id: format!("https://www.sciencebase.gov/catalog/item/{state}{year}"),
        state: state.to_owned(),
        year: year.to_owned(),
        source_file_url: format!("/sgcn/{state}_{year}.txt"),
        source_file_date: "2019-06-01T00:00:00Z".to_owned(),
    }
}

/// Captures everything a stage forwards.
#[derive(Default)]
pub struct RecordingSender {
    forwarded: Mutex<Vec<(Stage, StagePayload)>>,
    finals: Mutex<Vec<TerminalRecord>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarded(&self) -> Vec<(Stage, StagePayload)> {
        self.forwarded.lock().unwrap().clone()
    }

    pub fn forwarded_items(&self) -> Vec<ForwardedItem> {
        self.forwarded()
            .into_iter()
            .filter_map(|(_, payload)| match payload {
                StagePayload::Item(item) => Some(item),
                _ => None,
            })
            .collect()
    }

    pub fn finals(&self) -> Vec<TerminalRecord> {
        self.finals.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageSender for RecordingSender {
    async fn send_to_stage(&self, stage: Stage, payload: StagePayload) {
        self.forwarded.lock().unwrap().push((stage, payload));
    }

    async fn send_final(&self, record: TerminalRecord) {
        self.finals.lock().unwrap().push(record);
    }
}

pub struct StaticCatalog {
    units: Option<Vec<ProcessUnit>>,
}

impl StaticCatalog {
    pub fn new(units: Vec<ProcessUnit>) -> Self {
        Self { units: Some(units) }
    }

    pub fn failing() -> Self {
        Self { units: None }
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn enumerate_processable_units(&self) -> Result<Vec<ProcessUnit>> {
        self.units
            .clone()
            .ok_or_else(|| anyhow!("catalog service unavailable"))
    }
}

#[derive(Default)]
pub struct StaticMetadataCache {
    metadata: MetadataHandle,
    fail: bool,
    warm_calls: AtomicUsize,
}

impl StaticMetadataCache {
    pub fn new(metadata: SgcnMetadata) -> Self {
        Self {
            metadata: Arc::new(metadata),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn warm_calls(&self) -> usize {
        self.warm_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataCache for StaticMetadataCache {
    async fn warm(&self) -> Result<MetadataHandle> {
        self.warm_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("schema cache unreachable"));
        }
        Ok(self.metadata.clone())
    }
}

/// Candidates keyed by the unit's source file url; unknown units fail extraction.
#[derive(Default)]
pub struct StaticExtractor {
    by_source: HashMap<String, Vec<CandidateRecord>>,
}

impl StaticExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit(mut self, unit: &ProcessUnit, records: Vec<CandidateRecord>) -> Self {
        self.by_source.insert(unit.source_file_url.clone(), records);
        self
    }
}

#[async_trait]
impl SourceExtractor for StaticExtractor {
    async fn extract_candidates(
        &self,
        unit: &ProcessUnit,
        _metadata: &SgcnMetadata,
    ) -> Result<Vec<CandidateRecord>> {
        self.by_source
            .get(&unit.source_file_url)
            .cloned()
            .ok_or_else(|| anyhow!("no such source file: {}", unit.source_file_url))
    }
}

/// Validator driven by a closure.
pub struct FnValidator<F>(pub F)
where
    F: Fn(&CandidateRecord) -> Result<bool> + Send + Sync;

#[async_trait]
impl<F> RecordValidator for FnValidator<F>
where
    F: Fn(&CandidateRecord) -> Result<bool> + Send + Sync,
{
    async fn validate(&self, record: &CandidateRecord) -> Result<bool> {
        (self.0)(record)
    }
}

pub fn accept_all() -> FnValidator<fn(&CandidateRecord) -> Result<bool>> {
    fn accept_any(_: &CandidateRecord) -> Result<bool> {
        Ok(true)
    }
    let accept: fn(&CandidateRecord) -> Result<bool> = accept_any;
    FnValidator(accept)
}

/// Lookups keyed by candidate name; unknown names come back absent.
#[derive(Default)]
pub struct StaticTaxonomy {
    lookups: HashMap<String, TaxonomyLookup>,
    failing_names: HashSet<String>,
    failing_sources: HashSet<String>,
    additional_calls: Mutex<Vec<(NameQueue, String)>>,
}

impl StaticTaxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookup(mut self, name: &str, lookup: TaxonomyLookup) -> Self {
        self.lookups.insert(name.to_owned(), lookup);
        self
    }

    pub fn failing_for(mut self, name: &str) -> Self {
        self.failing_names.insert(name.to_owned());
        self
    }

    pub fn failing_source(mut self, source: &str) -> Self {
        self.failing_sources.insert(source.to_owned());
        self
    }

    pub fn additional_calls(&self) -> Vec<(NameQueue, String)> {
        self.additional_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaxonomyService for StaticTaxonomy {
    async fn lookup_taxonomy(&self, item: &ForwardedItem) -> Result<TaxonomyLookup> {
        let name = item.name();
        if self.failing_names.contains(&name) {
            return Err(anyhow!("ITIS request timed out for {name}"));
        }
        Ok(self.lookups.get(&name).cloned().unwrap_or_default())
    }

    async fn lookup_additional(&self, name_queue: &NameQueue, source_tag: &str) -> Result<()> {
        self.additional_calls
            .lock()
            .unwrap()
            .push((name_queue.clone(), source_tag.to_owned()));
        if self.failing_sources.contains(source_tag) {
            return Err(anyhow!("{source_tag} lookup failed"));
        }
        Ok(())
    }
}

/// Bundle with an accept-all validator and empty reference data.
pub fn collaborators(
    catalog: StaticCatalog,
    extractor: StaticExtractor,
    taxonomy: StaticTaxonomy,
) -> Collaborators {
    Collaborators {
        catalog: Arc::new(catalog),
        metadata: Arc::new(StaticMetadataCache::new(SgcnMetadata::default())),
        extractor: Arc::new(extractor),
        validator: Arc::new(accept_all()),
        taxonomy: Arc::new(taxonomy),
    }
}
