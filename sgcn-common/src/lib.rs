//! Types shared by every stage of the SGCN conveyor, plus the content fingerprint used to
//! suppress duplicate species records within one source file.

pub mod fingerprint;
pub mod metrics;
pub mod record;

pub use fingerprint::{fingerprint, fingerprint_record, Fingerprint, FingerprintError};
pub use record::{
    candidate_name, CandidateRecord, DeferredLookup, ForwardedItem, NameQueue, ProcessUnit, Stage,
    StageMessage, StagePayload, TerminalRecord, UnknownStage,
};
