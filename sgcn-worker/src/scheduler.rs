//! Local stand-in for the pipeline transport.
//!
//! Stages are drained in order. Every message for a stage runs as its own invocation on a
//! [`JoinSet`], bounded by a semaphore, with a private [`Outbox`] as its sender. Stages only ever
//! forward to later stages, so once a stage's invocations have all returned nothing new can
//! arrive for it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use sgcn_common::{Stage, StageMessage, StagePayload, TerminalRecord};
use sgcn_pipeline::metrics_consts::SINK_WRITES_COUNTER;
use sgcn_pipeline::{PipelineDriver, StageError, StageInput, StageOutput, StageSender};

use crate::sink::TerminalSink;

/// Identifies the run on every message a stage forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub sb_item_id: String,
    pub download_uri: String,
}

impl RunContext {
    fn seal(&self, stage: Stage, payload: StagePayload) -> StageMessage {
        StageMessage {
            run_id: self.run_id.clone(),
            sb_item_id: self.sb_item_id.clone(),
            download_uri: self.download_uri.clone(),
            stage,
            payload,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub units: usize,
    pub forwarded: usize,
    pub invalid: usize,
    pub duplicate: usize,
    pub errored: usize,
    pub finalized: usize,
    pub deferred: usize,
    pub failed_invocations: usize,
    pub sink_failures: usize,
}

impl RunSummary {
    fn observe(&mut self, output: &StageOutput) {
        match output {
            StageOutput::Enumerated(units) => self.units += units,
            StageOutput::Gated(report) => {
                self.forwarded += report.forwarded;
                self.invalid += report.invalid;
                self.duplicate += report.duplicate;
                self.errored += report.errored;
            }
            StageOutput::Finalized(_) => self.finalized += 1,
            StageOutput::DeferredComplete => self.deferred += 1,
        }
    }
}

/// Sender lent to one invocation. Collects what it forwards so the scheduler can route it once
/// the invocation returns.
struct Outbox {
    context: Arc<RunContext>,
    messages: Mutex<Vec<StageMessage>>,
    finals: Mutex<Vec<TerminalRecord>>,
}

impl Outbox {
    fn new(context: Arc<RunContext>) -> Self {
        Self {
            context,
            messages: Mutex::new(Vec::new()),
            finals: Mutex::new(Vec::new()),
        }
    }

    fn into_parts(self) -> (Vec<StageMessage>, Vec<TerminalRecord>) {
        (self.messages.into_inner(), self.finals.into_inner())
    }
}

#[async_trait]
impl StageSender for Outbox {
    async fn send_to_stage(&self, stage: Stage, payload: StagePayload) {
        let message = self.context.seal(stage, payload);
        self.messages.lock().await.push(message);
    }

    async fn send_final(&self, record: TerminalRecord) {
        self.finals.lock().await.push(record);
    }
}

pub struct Scheduler {
    driver: Arc<PipelineDriver>,
    sink: Arc<dyn TerminalSink>,
    context: Arc<RunContext>,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        driver: PipelineDriver,
        sink: Arc<dyn TerminalSink>,
        context: RunContext,
        max_concurrent_invocations: usize,
    ) -> Self {
        Self {
            driver: Arc::new(driver),
            sink,
            context: Arc::new(context),
            permits: Arc::new(Semaphore::new(max_concurrent_invocations.max(1))),
        }
    }

    /// Run every stage to completion. Only a failure to enumerate aborts the run; any other failed
    /// invocation is logged and counted while its siblings carry on.
    pub async fn run(&self) -> Result<RunSummary, StageError> {
        let mut summary = RunSummary::default();
        let mut pending: BTreeMap<Stage, Vec<StageMessage>> = BTreeMap::new();

        info!(run_id = %self.context.run_id, sb_item_id = %self.context.sb_item_id, "starting run");

        let outbox = Outbox::new(self.context.clone());
        let output = self.driver.handle(StageInput::Start, &outbox).await?;
        summary.observe(&output);
        self.route(outbox, &mut pending, &mut summary).await;

        for stage in [Stage::ExtractGate, Stage::EnrichFinalize, Stage::DeferredEnrich] {
            let messages = pending.remove(&stage).unwrap_or_default();
            if messages.is_empty() {
                continue;
            }
            info!(%stage, messages = messages.len(), "draining stage");
            self.drain(stage, messages, &mut pending, &mut summary).await;
        }

        for (stage, messages) in pending {
            // Only possible if a stage forwards backwards
            warn!(%stage, dropped = messages.len(), "messages left undelivered");
            summary.failed_invocations += messages.len();
        }

        info!(run_id = %self.context.run_id, ?summary, "run complete");
        Ok(summary)
    }

    async fn drain(
        &self,
        stage: Stage,
        messages: Vec<StageMessage>,
        pending: &mut BTreeMap<Stage, Vec<StageMessage>>,
        summary: &mut RunSummary,
    ) {
        let mut invocations = JoinSet::new();

        for message in messages {
            if message.stage != stage || message.payload.target() != stage {
                error!(
                    %stage,
                    payload_stage = %message.payload.target(),
                    "message routed to the wrong stage"
                );
                summary.failed_invocations += 1;
                continue;
            }

            let driver = self.driver.clone();
            let permits = self.permits.clone();
            let outbox = Outbox::new(self.context.clone());
            invocations.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await;
                let result = driver
                    .handle(StageInput::Payload(message.payload), &outbox)
                    .await;
                (result, outbox)
            });
        }

        while let Some(joined) = invocations.join_next().await {
            match joined {
                Ok((Ok(output), outbox)) => {
                    summary.observe(&output);
                    self.route(outbox, pending, summary).await;
                }
                Ok((Err(_), outbox)) => {
                    // Already logged by the driver; anything sent before the failure still counts
                    summary.failed_invocations += 1;
                    self.route(outbox, pending, summary).await;
                }
                Err(e) => {
                    error!(%stage, error = ?e, "stage invocation panicked");
                    summary.failed_invocations += 1;
                }
            }
        }
    }

    async fn route(
        &self,
        outbox: Outbox,
        pending: &mut BTreeMap<Stage, Vec<StageMessage>>,
        summary: &mut RunSummary,
    ) {
        let (messages, finals) = outbox.into_parts();
        for message in messages {
            pending.entry(message.stage).or_default().push(message);
        }
        for record in finals {
            match self.sink.write(&record).await {
                Ok(()) => metrics::counter!(SINK_WRITES_COUNTER, "result" => "ok").increment(1),
                Err(e) => {
                    error!(row_id = %record.row_id, error = ?e, "failed to write terminal record");
                    metrics::counter!(SINK_WRITES_COUNTER, "result" => "error").increment(1);
                    summary.sink_failures += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use serde_json::json;
    use sgcn_pipeline::test_utils::{
        collaborators, record, unit, StaticCatalog, StaticExtractor, StaticTaxonomy,
    };
    use sgcn_pipeline::{DriverConfig, TaxonomyLookup};

    #[derive(Default)]
    struct MemorySink {
        records: std::sync::Mutex<Vec<TerminalRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl TerminalSink for MemorySink {
        async fn write(&self, record: &TerminalRecord) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Io(std::io::Error::other("disk full")));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn context() -> RunContext {
        RunContext {
            run_id: "ef33db60-543d-11ea-a34e-023f40fa784e".to_owned(),
            sb_item_id: "56d720ece4b015c306f442d5".to_owned(),
            download_uri: ".".to_owned(),
        }
    }

    fn scheduler(
        bundle: sgcn_pipeline::Collaborators,
        config: DriverConfig,
        sink: Arc<MemorySink>,
    ) -> Scheduler {
        Scheduler::new(
            PipelineDriver::new(Arc::new(bundle), config),
            sink,
            context(),
            4,
        )
    }

    #[tokio::test]
    async fn test_run_drains_every_stage() {
        let iowa = unit("Iowa", "2005");
        let ohio = unit("Ohio", "2015");
        let extractor = StaticExtractor::new()
            .with_unit(
                &iowa,
                vec![
                    record(json!({"scientific name": "Foo bar"})),
                    record(json!({"scientific name": "Foo bar"})),
                    record(json!({"scientific name": "Baz qux"})),
                ],
            )
            .with_unit(&ohio, vec![record(json!({"scientific name": "Foo bar"}))]);
        let taxonomy = StaticTaxonomy::new().with_lookup(
            "Foo bar",
            TaxonomyLookup {
                summary: Some(record(json!({"kingdom": "Animalia"}))),
                name_queue: vec!["Foo bar".to_owned()],
            },
        );
        let sink = Arc::new(MemorySink::default());

        let summary = scheduler(
            collaborators(StaticCatalog::new(vec![iowa, ohio]), extractor, taxonomy),
            DriverConfig::default(),
            sink.clone(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(
            summary,
            RunSummary {
                units: 2,
                forwarded: 3,
                duplicate: 1,
                finalized: 3,
                ..Default::default()
            }
        );

        let records = sink.records.lock().unwrap().clone();
        assert_eq!(records.len(), 3);
        let enriched = records
            .iter()
            .filter(|r| r.data.get("kingdom") == Some(&json!("Animalia")))
            .count();
        assert_eq!(enriched, 2);
    }

    #[tokio::test]
    async fn test_failed_unit_does_not_stop_the_run() {
        let iowa = unit("Iowa", "2005");
        let extractor = StaticExtractor::new()
            .with_unit(&iowa, vec![record(json!({"scientific name": "Foo bar"}))]);
        let sink = Arc::new(MemorySink::default());

        // Utah has no source file, so its extraction fails
        let summary = scheduler(
            collaborators(
                StaticCatalog::new(vec![unit("Utah", "2005"), iowa]),
                extractor,
                StaticTaxonomy::new(),
            ),
            DriverConfig::default(),
            sink.clone(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.units, 2);
        assert_eq!(summary.failed_invocations, 1);
        assert_eq!(summary.finalized, 1);
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enumeration_failure_aborts_the_run() {
        let result = scheduler(
            collaborators(
                StaticCatalog::failing(),
                StaticExtractor::new(),
                StaticTaxonomy::new(),
            ),
            DriverConfig::default(),
            Arc::new(MemorySink::default()),
        )
        .run()
        .await;

        assert!(matches!(result, Err(StageError::Enumerate(_))));
    }

    #[tokio::test]
    async fn test_deferred_stage_runs_when_enabled() {
        let iowa = unit("Iowa", "2005");
        let extractor = StaticExtractor::new()
            .with_unit(&iowa, vec![record(json!({"scientific name": "Foo bar"}))]);
        let taxonomy = StaticTaxonomy::new()
            .with_lookup(
                "Foo bar",
                TaxonomyLookup {
                    summary: None,
                    name_queue: vec!["Foo bar".to_owned()],
                },
            )
            .failing_source("iucn");

        let summary = scheduler(
            collaborators(StaticCatalog::new(vec![iowa]), extractor, taxonomy),
            DriverConfig {
                enable_deferred_enrichment: true,
                ..Default::default()
            },
            Arc::new(MemorySink::default()),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.finalized, 1);
        assert_eq!(summary.deferred, 3);
        assert_eq!(summary.failed_invocations, 1);
    }

    #[tokio::test]
    async fn test_sink_failures_are_counted() {
        let iowa = unit("Iowa", "2005");
        let extractor = StaticExtractor::new()
            .with_unit(&iowa, vec![record(json!({"scientific name": "Foo bar"}))]);
        let sink = Arc::new(MemorySink {
            fail: true,
            ..Default::default()
        });

        let summary = scheduler(
            collaborators(StaticCatalog::new(vec![iowa]), extractor, StaticTaxonomy::new()),
            DriverConfig::default(),
            sink,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.finalized, 1);
        assert_eq!(summary.sink_failures, 1);
    }

    #[tokio::test]
    async fn test_outbox_wraps_messages_in_the_run_envelope() {
        let outbox = Outbox::new(Arc::new(context()));
        outbox
            .send_to_stage(Stage::ExtractGate, StagePayload::Unit(unit("Iowa", "2005")))
            .await;

        let (messages, finals) = outbox.into_parts();
        assert!(finals.is_empty());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].run_id, "ef33db60-543d-11ea-a34e-023f40fa784e");
        assert_eq!(messages[0].sb_item_id, "56d720ece4b015c306f442d5");
        assert_eq!(messages[0].stage, Stage::ExtractGate);
    }
}
