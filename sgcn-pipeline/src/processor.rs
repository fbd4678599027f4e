//! Per-candidate gating: validate, fingerprint, deduplicate, forward.
//!
//! Every candidate ends in exactly one [`CandidateOutcome`]. Nothing that goes wrong with one
//! candidate escapes [`process_candidate`], so a single malformed row never stops its siblings
//! in the same source file from reaching enrichment.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use sgcn_common::{
    candidate_name, fingerprint_record, CandidateRecord, Fingerprint, FingerprintError,
    ForwardedItem, Stage, StagePayload,
};

use crate::collaborators::{RecordValidator, StageSender};
use crate::dedup::SeenSet;
use crate::metrics_consts::CANDIDATE_OUTCOMES_COUNTER;

/// Why a candidate could not be gated.
#[derive(Error, Debug)]
pub enum CandidateError {
    #[error("validator failed: {0:#}")]
    Validation(anyhow::Error),
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
}

#[derive(Debug)]
pub enum CandidateOutcome {
    /// Sent on to enrichment under this fingerprint
    Forwarded(Fingerprint),
    /// Rejected by the record schema
    Invalid,
    /// Same content as an earlier candidate of this batch
    Duplicate(Fingerprint),
    /// Validation or fingerprinting could not run
    Errored(CandidateError),
}

impl CandidateOutcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, CandidateOutcome::Forwarded(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            CandidateOutcome::Forwarded(_) => "forwarded",
            CandidateOutcome::Invalid => "invalid",
            CandidateOutcome::Duplicate(_) => "duplicate",
            CandidateOutcome::Errored(_) => "errored",
        }
    }
}

/// Outcome tally for one unit of source data. Only `forwarded` counts toward the unit's
/// species count.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub forwarded: usize,
    pub invalid: usize,
    pub duplicate: usize,
    pub errored: usize,
}

impl BatchReport {
    pub fn observe(&mut self, outcome: &CandidateOutcome) {
        match outcome {
            CandidateOutcome::Forwarded(_) => self.forwarded += 1,
            CandidateOutcome::Invalid => self.invalid += 1,
            CandidateOutcome::Duplicate(_) => self.duplicate += 1,
            CandidateOutcome::Errored(_) => self.errored += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.forwarded + self.invalid + self.duplicate + self.errored
    }

    pub fn merge(&mut self, other: &BatchReport) {
        self.forwarded += other.forwarded;
        self.invalid += other.invalid;
        self.duplicate += other.duplicate;
        self.errored += other.errored;
    }
}

/// Gate one candidate and, if it survives, forward it to stage 3 tagged with its fingerprint.
pub async fn process_candidate(
    record: CandidateRecord,
    validator: &dyn RecordValidator,
    seen: &mut SeenSet,
    sender: &dyn StageSender,
) -> CandidateOutcome {
    let name = candidate_name(&record);
    let outcome = gate(record, validator, seen, sender).await;

    match &outcome {
        CandidateOutcome::Forwarded(fingerprint) => {
            debug!(species = %name, %fingerprint, "forwarded species");
        }
        CandidateOutcome::Invalid => {
            warn!(species = %name, "invalid species found");
        }
        CandidateOutcome::Duplicate(fingerprint) => {
            warn!(species = %name, %fingerprint, "duplicate species found");
        }
        CandidateOutcome::Errored(e) => {
            error!(species = %name, error = ?e, "failed to process species");
        }
    }

    metrics::counter!(CANDIDATE_OUTCOMES_COUNTER, "outcome" => outcome.label()).increment(1);

    outcome
}

async fn gate(
    record: CandidateRecord,
    validator: &dyn RecordValidator,
    seen: &mut SeenSet,
    sender: &dyn StageSender,
) -> CandidateOutcome {
    match validator.validate(&record).await {
        Ok(true) => {}
        Ok(false) => return CandidateOutcome::Invalid,
        Err(e) => return CandidateOutcome::Errored(CandidateError::Validation(e)),
    }

    // Infallible for a `CandidateRecord`, which is already a JSON object
    let fingerprint = match fingerprint_record(&record) {
        Ok(fingerprint) => fingerprint,
        Err(e) => return CandidateOutcome::Errored(e.into()),
    };

    if seen.is_duplicate(&fingerprint) {
        return CandidateOutcome::Duplicate(fingerprint);
    }

    let item = ForwardedItem::new(fingerprint.clone(), record.clone());
    seen.record(fingerprint.clone(), record);
    sender
        .send_to_stage(Stage::EnrichFinalize, StagePayload::Item(item))
        .await;

    CandidateOutcome::Forwarded(fingerprint)
}
