//! Stage handlers for the SGCN conveyor.
//!
//! ```text
//! Enumerate(1) ──unit──▶ ExtractGate(2) ──item──▶ EnrichFinalize(3) ──final──▶ sink
//!                                                        │
//!                                                        └─(enable_deferred_enrichment)─▶ DeferredEnrich(4)
//! ```
//!
//! A transport invokes exactly one handler per message and lends it a [`StageSender`]. No handler
//! keeps state between invocations: the [`SeenSet`] lives only for one stage-2 call and the
//! reference data belongs to the metadata collaborator.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use sgcn_common::{
    DeferredLookup, ForwardedItem, NameQueue, ProcessUnit, Stage, StagePayload, TerminalRecord,
};

use crate::collaborators::{Collaborators, StageSender};
use crate::dedup::SeenSet;
use crate::merge::merge;
use crate::metrics_consts::{
    BATCH_SIZE_HISTOGRAM, DEFERRED_LOOKUPS_COUNTER, ENRICHMENT_RESULTS_COUNTER,
    STAGE_DURATION_HISTOGRAM, STAGE_INVOCATIONS_COUNTER, TERMINAL_RECORDS_COUNTER,
    UNITS_ENUMERATED_COUNTER,
};
use crate::processor::{process_candidate, BatchReport};

/// Lookup sources queried by the deferred stage, in the order they are forwarded.
pub const DEFAULT_DEFERRED_SOURCES: [&str; 4] = ["gbif", "ecos", "iucn", "natureserve"];

/// Invocation-level failures. Per-candidate problems never surface here; they are reported as
/// [`crate::processor::CandidateOutcome`]s instead.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("failed to enumerate processable units")]
    Enumerate(#[source] anyhow::Error),
    #[error("failed to warm the metadata cache")]
    WarmMetadata(#[source] anyhow::Error),
    #[error("failed to extract candidates from {unit}")]
    Extract {
        unit: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("deferred {source_tag} lookup failed")]
    DeferredLookup {
        source_tag: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Forward stage 3's name queue to stage 4, once per entry in `deferred_sources`.
    pub enable_deferred_enrichment: bool,
    pub deferred_sources: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            enable_deferred_enrichment: false,
            deferred_sources: DEFAULT_DEFERRED_SOURCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// What a transport hands to [`PipelineDriver::handle`].
#[derive(Debug, Clone, PartialEq)]
pub enum StageInput {
    /// Kick off a run at stage 1.
    Start,
    Payload(StagePayload),
}

impl StageInput {
    pub fn stage(&self) -> Stage {
        match self {
            StageInput::Start => Stage::Enumerate,
            StageInput::Payload(payload) => payload.target(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// Number of units forwarded to stage 2
    Enumerated(usize),
    /// Outcome tally for one unit; `forwarded` is the unit's species count
    Gated(BatchReport),
    Finalized(TerminalRecord),
    DeferredComplete,
}

pub struct PipelineDriver {
    collaborators: Arc<Collaborators>,
    config: DriverConfig,
}

impl PipelineDriver {
    pub fn new(collaborators: Arc<Collaborators>, config: DriverConfig) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Route one message to its stage handler, recording duration and result per stage.
    pub async fn handle(
        &self,
        input: StageInput,
        sender: &dyn StageSender,
    ) -> Result<StageOutput, StageError> {
        let stage = input.stage();
        let span = info_span!("stage", number = stage.number(), stage = stage.as_str());
        let start = Instant::now();

        let result = async {
            match input {
                StageInput::Start => self.enumerate(sender).await.map(StageOutput::Enumerated),
                StageInput::Payload(StagePayload::Unit(unit)) => self
                    .extract_and_gate(&unit, sender)
                    .await
                    .map(StageOutput::Gated),
                StageInput::Payload(StagePayload::Item(item)) => Ok(StageOutput::Finalized(
                    self.enrich_and_finalize(&item, sender).await,
                )),
                StageInput::Payload(StagePayload::Deferred(lookup)) => self
                    .deferred_enrich(&lookup)
                    .await
                    .map(|_| StageOutput::DeferredComplete),
            }
        }
        .instrument(span)
        .await;

        let labels = [
            ("stage", stage.as_str().to_owned()),
            (
                "result",
                if result.is_ok() { "ok" } else { "error" }.to_owned(),
            ),
        ];
        metrics::counter!(STAGE_INVOCATIONS_COUNTER, &labels).increment(1);
        if let Err(e) = &result {
            error!(stage = stage.as_str(), error = ?e, "stage invocation failed");
        }
        metrics::histogram!(STAGE_DURATION_HISTOGRAM, "stage" => stage.as_str())
            .record(start.elapsed().as_secs_f64());

        result
    }

    /// Stage 1: forward every processable unit, unmodified, to stage 2.
    pub async fn enumerate(&self, sender: &dyn StageSender) -> Result<usize, StageError> {
        let units = self
            .collaborators
            .catalog
            .enumerate_processable_units()
            .await
            .map_err(StageError::Enumerate)?;

        let count = units.len();
        info!(units = count, "enumerated processable units");

        for unit in units {
            sender
                .send_to_stage(Stage::ExtractGate, StagePayload::Unit(unit))
                .await;
        }

        metrics::counter!(UNITS_ENUMERATED_COUNTER).increment(count as u64);
        Ok(count)
    }

    /// Stage 2: extract candidates from one unit and gate each through validation and
    /// deduplication. Failures of individual candidates are tallied, not returned.
    pub async fn extract_and_gate(
        &self,
        unit: &ProcessUnit,
        sender: &dyn StageSender,
    ) -> Result<BatchReport, StageError> {
        let metadata = self
            .collaborators
            .metadata
            .warm()
            .await
            .map_err(StageError::WarmMetadata)?;

        info!(state = %unit.state, year = %unit.year, "processing {}", unit);

        let candidates = self
            .collaborators
            .extractor
            .extract_candidates(unit, &metadata)
            .await
            .map_err(|source| StageError::Extract {
                unit: unit.to_string(),
                source,
            })?;

        metrics::histogram!(BATCH_SIZE_HISTOGRAM).record(candidates.len() as f64);

        let mut seen = SeenSet::new();
        let mut report = BatchReport::default();
        for candidate in candidates {
            let outcome = process_candidate(
                candidate,
                self.collaborators.validator.as_ref(),
                &mut seen,
                sender,
            )
            .await;
            report.observe(&outcome);
        }

        info!(
            state = %unit.state,
            year = %unit.year,
            species = report.forwarded,
            invalid = report.invalid,
            duplicate = report.duplicate,
            errored = report.errored,
            "species count"
        );

        Ok(report)
    }

    /// Stage 3: enrich one forwarded item and finalize it. Always sends exactly one terminal
    /// record; a failed lookup only means the record goes out without enrichment.
    pub async fn enrich_and_finalize(
        &self,
        item: &ForwardedItem,
        sender: &dyn StageSender,
    ) -> TerminalRecord {
        let name = item.name();
        debug!(species = %name, row_id = %item.id, "start species");

        let (summary, name_queue, result) =
            match self.collaborators.taxonomy.lookup_taxonomy(item).await {
                Ok(lookup) => {
                    let summary = lookup.summary.filter(|s| !s.is_empty());
                    let result = if summary.is_some() { "enriched" } else { "absent" };
                    (summary, lookup.name_queue, result)
                }
                Err(e) => {
                    error!(
                        species = %name,
                        row_id = %item.id,
                        error = ?e,
                        "taxonomic lookup failed, finalizing without enrichment"
                    );
                    (None, NameQueue::new(), "failed")
                }
            };
        metrics::counter!(ENRICHMENT_RESULTS_COUNTER, "result" => result).increment(1);

        let terminal = TerminalRecord {
            row_id: item.id.to_string(),
            data: merge(&item.to_record(), summary.as_ref()),
        };
        sender.send_final(terminal.clone()).await;
        metrics::counter!(TERMINAL_RECORDS_COUNTER).increment(1);

        if !name_queue.is_empty() {
            if self.config.enable_deferred_enrichment {
                for source in &self.config.deferred_sources {
                    sender
                        .send_to_stage(
                            Stage::DeferredEnrich,
                            StagePayload::Deferred(DeferredLookup {
                                name_queue: name_queue.clone(),
                                sppin_source: source.clone(),
                            }),
                        )
                        .await;
                    metrics::counter!(DEFERRED_LOOKUPS_COUNTER, "source" => source.clone())
                        .increment(1);
                }
            } else {
                debug!(
                    species = %name,
                    queued_names = name_queue.len(),
                    "deferred enrichment disabled, dropping name queue"
                );
            }
        }

        debug!(species = %name, row_id = %item.id, "end species");
        terminal
    }

    /// Stage 4: gather additional cross-reference data for a name queue. Side effects only.
    pub async fn deferred_enrich(&self, lookup: &DeferredLookup) -> Result<(), StageError> {
        if lookup.name_queue.is_empty() {
            warn!(source = %lookup.sppin_source, "empty name queue, nothing to look up");
            return Ok(());
        }

        self.collaborators
            .taxonomy
            .lookup_additional(&lookup.name_queue, &lookup.sppin_source)
            .await
            .map_err(|source| StageError::DeferredLookup {
                source_tag: lookup.sppin_source.clone(),
                source,
            })?;

        info!(
            source = %lookup.sppin_source,
            names = lookup.name_queue.len(),
            "gathered additional cache resources"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::TaxonomyLookup;
    use crate::test_utils::{
        collaborators, record, unit, FnValidator, RecordingSender, StaticCatalog, StaticExtractor,
        StaticMetadataCache, StaticTaxonomy,
    };
    use assert_json_diff::assert_json_eq;
    use serde_json::{json, Value};
    use sgcn_common::{CandidateRecord, Fingerprint};

    fn driver(collaborators: Collaborators) -> PipelineDriver {
        PipelineDriver::new(Arc::new(collaborators), DriverConfig::default())
    }

    fn deferred_driver(collaborators: Collaborators) -> PipelineDriver {
        PipelineDriver::new(
            Arc::new(collaborators),
            DriverConfig {
                enable_deferred_enrichment: true,
                ..Default::default()
            },
        )
    }

    fn item(id: &str, fields: Value) -> ForwardedItem {
        ForwardedItem::new(Fingerprint::from_hex(id), record(fields))
    }

    fn queued(names: &[&str]) -> TaxonomyLookup {
        TaxonomyLookup {
            summary: Some(record(json!({"kingdom": "Animalia"}))),
            name_queue: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[test]
    fn test_default_config_keeps_deferred_branch_dormant() {
        let config = DriverConfig::default();
        assert!(!config.enable_deferred_enrichment);
        assert_eq!(
            config.deferred_sources,
            vec!["gbif", "ecos", "iucn", "natureserve"]
        );
    }

    #[tokio::test]
    async fn test_enumerate_forwards_every_unit_to_extraction() {
        let units = vec![unit("Iowa", "2005"), unit("Ohio", "2015")];
        let driver = driver(collaborators(
            StaticCatalog::new(units.clone()),
            StaticExtractor::new(),
            StaticTaxonomy::new(),
        ));
        let sender = RecordingSender::new();

        let count = driver.enumerate(&sender).await.unwrap();

        assert_eq!(count, 2);
        let forwarded = sender.forwarded();
        assert_eq!(
            forwarded,
            vec![
                (Stage::ExtractGate, StagePayload::Unit(units[0].clone())),
                (Stage::ExtractGate, StagePayload::Unit(units[1].clone())),
            ]
        );
    }

    #[tokio::test]
    async fn test_enumerate_empty_catalog_forwards_nothing() {
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            StaticTaxonomy::new(),
        ));
        let sender = RecordingSender::new();

        assert_eq!(driver.enumerate(&sender).await.unwrap(), 0);
        assert!(sender.forwarded().is_empty());
    }

    #[tokio::test]
    async fn test_enumerate_failure_is_fatal() {
        let driver = driver(collaborators(
            StaticCatalog::failing(),
            StaticExtractor::new(),
            StaticTaxonomy::new(),
        ));
        let sender = RecordingSender::new();

        let err = driver.enumerate(&sender).await.unwrap_err();
        assert!(matches!(err, StageError::Enumerate(_)));
        assert!(sender.forwarded().is_empty());
    }

    #[tokio::test]
    async fn test_identical_content_in_different_key_order_is_forwarded_once() {
        let iowa = unit("Iowa", "2005");
        let extractor = StaticExtractor::new().with_unit(
            &iowa,
            vec![
                record(json!({"scientific name": "Foo bar", "state": "Iowa", "year": "2005"})),
                record(json!({"year": "2005", "state": "Iowa", "scientific name": "Foo bar"})),
            ],
        );
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            extractor,
            StaticTaxonomy::new(),
        ));
        let sender = RecordingSender::new();

        let report = driver.extract_and_gate(&iowa, &sender).await.unwrap();

        assert_eq!(report.forwarded, 1);
        assert_eq!(report.duplicate, 1);
        let items = sender.forwarded_items();
        assert_eq!(items.len(), 1);
        assert!(sender
            .forwarded()
            .iter()
            .all(|(stage, _)| *stage == Stage::EnrichFinalize));
    }

    #[tokio::test]
    async fn test_invalid_candidate_does_not_block_valid_sibling() {
        let ohio = unit("Ohio", "2015");
        let extractor = StaticExtractor::new().with_unit(
            &ohio,
            vec![
                record(json!({"state": "Ohio", "year": "2015"})),
                record(json!({"scientific name": "Foo bar", "state": "Ohio", "year": "2015"})),
            ],
        );
        let mut bundle = collaborators(StaticCatalog::new(vec![]), extractor, StaticTaxonomy::new());
        bundle.validator = Arc::new(FnValidator(|r: &CandidateRecord| {
            Ok(r.contains_key("scientific name"))
        }));
        let driver = driver(bundle);
        let sender = RecordingSender::new();

        let report = driver.extract_and_gate(&ohio, &sender).await.unwrap();

        assert_eq!(report.forwarded, 1);
        assert_eq!(report.invalid, 1);
        let items = sender.forwarded_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name(), "Foo bar");
    }

    #[tokio::test]
    async fn test_dedup_scope_is_one_invocation() {
        let iowa = unit("Iowa", "2005");
        let extractor = StaticExtractor::new().with_unit(
            &iowa,
            vec![record(json!({"scientific name": "Foo bar", "state": "Iowa"}))],
        );
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            extractor,
            StaticTaxonomy::new(),
        ));
        let sender = RecordingSender::new();

        driver.extract_and_gate(&iowa, &sender).await.unwrap();
        driver.extract_and_gate(&iowa, &sender).await.unwrap();

        let items = sender.forwarded_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, items[1].id);
    }

    #[tokio::test]
    async fn test_empty_unit_reports_zero() {
        let iowa = unit("Iowa", "2005");
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new().with_unit(&iowa, vec![]),
            StaticTaxonomy::new(),
        ));
        let sender = RecordingSender::new();

        let report = driver.extract_and_gate(&iowa, &sender).await.unwrap();

        assert_eq!(report, BatchReport::default());
        assert!(sender.forwarded().is_empty());
    }

    #[tokio::test]
    async fn test_extraction_failure_is_fatal_to_the_invocation() {
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            StaticTaxonomy::new(),
        ));
        let sender = RecordingSender::new();

        let err = driver
            .extract_and_gate(&unit("Utah", "2005"), &sender)
            .await
            .unwrap_err();

        match err {
            StageError::Extract { unit, .. } => assert_eq!(unit, "Utah 2005"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(sender.forwarded().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_warm_failure_is_fatal_to_the_invocation() {
        let iowa = unit("Iowa", "2005");
        let mut bundle = collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new().with_unit(&iowa, vec![record(json!({"scientific name": "A"}))]),
            StaticTaxonomy::new(),
        );
        let cache = Arc::new(StaticMetadataCache::failing());
        bundle.metadata = cache.clone();
        let driver = driver(bundle);
        let sender = RecordingSender::new();

        let err = driver.extract_and_gate(&iowa, &sender).await.unwrap_err();

        assert!(matches!(err, StageError::WarmMetadata(_)));
        assert_eq!(cache.warm_calls(), 1);
        assert!(sender.forwarded().is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_payload_is_merged_into_terminal_record() {
        let taxonomy = StaticTaxonomy::new().with_lookup(
            "Foo bar",
            TaxonomyLookup {
                summary: Some(record(json!({"kingdom": "Animalia"}))),
                name_queue: vec![],
            },
        );
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            taxonomy,
        ));
        let sender = RecordingSender::new();
        let forwarded = item("abc123", json!({"scientific_name": "Foo bar"}));

        let terminal = driver.enrich_and_finalize(&forwarded, &sender).await;

        assert_eq!(terminal.row_id, "abc123");
        assert_json_eq!(
            Value::Object(terminal.data.clone()),
            json!({"id": "abc123", "scientific_name": "Foo bar", "kingdom": "Animalia"})
        );
        assert_eq!(sender.finals(), vec![terminal]);
        assert!(sender.forwarded().is_empty());
    }

    #[tokio::test]
    async fn test_absent_enrichment_finalizes_item_unchanged() {
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            StaticTaxonomy::new(),
        ));
        let sender = RecordingSender::new();
        let forwarded = item("abc123", json!({"scientific name": "Foo bar", "state": "Iowa"}));

        let terminal = driver.enrich_and_finalize(&forwarded, &sender).await;

        assert_eq!(terminal.row_id, "abc123");
        assert_eq!(terminal.data, forwarded.to_record());
        assert_eq!(sender.finals().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_summary_is_treated_as_absent() {
        let taxonomy = StaticTaxonomy::new().with_lookup(
            "Foo bar",
            TaxonomyLookup {
                summary: Some(CandidateRecord::new()),
                name_queue: vec![],
            },
        );
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            taxonomy,
        ));
        let sender = RecordingSender::new();
        let forwarded = item("abc123", json!({"scientific name": "Foo bar"}));

        let terminal = driver.enrich_and_finalize(&forwarded, &sender).await;

        assert_eq!(terminal.data, forwarded.to_record());
    }

    #[tokio::test]
    async fn test_failed_lookup_still_finalizes() {
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            StaticTaxonomy::new().failing_for("Foo bar"),
        ));
        let sender = RecordingSender::new();
        let forwarded = item("abc123", json!({"scientific name": "Foo bar"}));

        let terminal = driver.enrich_and_finalize(&forwarded, &sender).await;

        assert_eq!(terminal.data, forwarded.to_record());
        assert_eq!(sender.finals().len(), 1);
        assert!(sender.forwarded().is_empty());
    }

    #[tokio::test]
    async fn test_name_queue_is_dropped_while_deferred_enrichment_is_off() {
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            StaticTaxonomy::new().with_lookup("Foo bar", queued(&["Foo bar", "Foo baz"])),
        ));
        let sender = RecordingSender::new();

        driver
            .enrich_and_finalize(&item("abc123", json!({"scientific name": "Foo bar"})), &sender)
            .await;

        assert_eq!(sender.finals().len(), 1);
        assert!(sender.forwarded().is_empty());
    }

    #[tokio::test]
    async fn test_name_queue_fans_out_to_each_deferred_source() {
        let driver = deferred_driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            StaticTaxonomy::new().with_lookup("Foo bar", queued(&["Foo bar", "Foo baz"])),
        ));
        let sender = RecordingSender::new();

        driver
            .enrich_and_finalize(&item("abc123", json!({"scientific name": "Foo bar"})), &sender)
            .await;

        assert_eq!(sender.finals().len(), 1);
        let sources: Vec<String> = sender
            .forwarded()
            .into_iter()
            .map(|(stage, payload)| {
                assert_eq!(stage, Stage::DeferredEnrich);
                match payload {
                    StagePayload::Deferred(lookup) => {
                        assert_eq!(lookup.name_queue, vec!["Foo bar", "Foo baz"]);
                        lookup.sppin_source
                    }
                    other => panic!("unexpected payload {other:?}"),
                }
            })
            .collect();
        assert_eq!(sources, vec!["gbif", "ecos", "iucn", "natureserve"]);
    }

    #[tokio::test]
    async fn test_empty_name_queue_never_reaches_deferred_stage() {
        let driver = deferred_driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            StaticTaxonomy::new().with_lookup("Foo bar", queued(&[])),
        ));
        let sender = RecordingSender::new();

        driver
            .enrich_and_finalize(&item("abc123", json!({"scientific name": "Foo bar"})), &sender)
            .await;

        assert!(sender.forwarded().is_empty());
    }

    #[tokio::test]
    async fn test_deferred_enrich_calls_additional_lookup() {
        let taxonomy = Arc::new(StaticTaxonomy::new());
        let mut bundle = collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            StaticTaxonomy::new(),
        );
        bundle.taxonomy = taxonomy.clone();
        let driver = driver(bundle);
        let lookup = DeferredLookup {
            name_queue: vec!["Foo bar".to_owned()],
            sppin_source: "gbif".to_owned(),
        };

        driver.deferred_enrich(&lookup).await.unwrap();

        assert_eq!(
            taxonomy.additional_calls(),
            vec![(vec!["Foo bar".to_owned()], "gbif".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_deferred_enrich_failure_names_the_source() {
        let driver = driver(collaborators(
            StaticCatalog::new(vec![]),
            StaticExtractor::new(),
            StaticTaxonomy::new().failing_source("iucn"),
        ));
        let lookup = DeferredLookup {
            name_queue: vec!["Foo bar".to_owned()],
            sppin_source: "iucn".to_owned(),
        };

        let err = driver.deferred_enrich(&lookup).await.unwrap_err();
        match err {
            StageError::DeferredLookup { source_tag, .. } => assert_eq!(source_tag, "iucn"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_routes_by_payload() {
        let iowa = unit("Iowa", "2005");
        let driver = driver(collaborators(
            StaticCatalog::new(vec![iowa.clone()]),
            StaticExtractor::new().with_unit(&iowa, vec![record(json!({"scientific name": "A"}))]),
            StaticTaxonomy::new(),
        ));
        let sender = RecordingSender::new();

        let started = driver.handle(StageInput::Start, &sender).await.unwrap();
        assert_eq!(started, StageOutput::Enumerated(1));

        let gated = driver
            .handle(StageInput::Payload(StagePayload::Unit(iowa)), &sender)
            .await
            .unwrap();
        assert!(matches!(gated, StageOutput::Gated(report) if report.forwarded == 1));

        let forwarded = sender.forwarded_items().remove(0);
        let finalized = driver
            .handle(StageInput::Payload(StagePayload::Item(forwarded.clone())), &sender)
            .await
            .unwrap();
        match finalized {
            StageOutput::Finalized(terminal) => assert_eq!(terminal.row_id, forwarded.id.to_string()),
            other => panic!("unexpected output {other:?}"),
        }

        assert_eq!(
            StageInput::Payload(StagePayload::Deferred(DeferredLookup {
                name_queue: vec![],
                sppin_source: "gbif".to_owned(),
            }))
            .stage(),
            Stage::DeferredEnrich
        );
    }
}
