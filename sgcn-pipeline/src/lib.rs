//! The SGCN stage driver: enumerate source units, gate their candidates, enrich and finalize the
//! survivors. Collaborators and transport are injected; this crate owns only the routing and the
//! per-record guarantees.

pub mod collaborators;
pub mod dedup;
pub mod driver;
pub mod merge;
pub mod metrics_consts;
pub mod processor;
pub mod test_utils;

pub use collaborators::{
    Catalog, Collaborators, ItisOverride, MetadataCache, MetadataHandle, RecordValidator,
    SgcnMetadata, SourceExtractor, StageSender, TaxonomyLookup, TaxonomyService,
};
pub use dedup::SeenSet;
pub use driver::{
    DriverConfig, PipelineDriver, StageError, StageInput, StageOutput, DEFAULT_DEFERRED_SOURCES,
};
pub use merge::merge;
pub use processor::{process_candidate, BatchReport, CandidateError, CandidateOutcome};
