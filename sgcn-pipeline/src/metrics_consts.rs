// ==== Stage driver metrics ====
/// Counter for stage invocations, labelled by stage and result (ok/error)
pub const STAGE_INVOCATIONS_COUNTER: &str = "sgcn_stage_invocations_total";

/// Histogram for the wall time of one stage invocation
pub const STAGE_DURATION_HISTOGRAM: &str = "sgcn_stage_duration_seconds";

/// Counter for process units forwarded by the enumerate stage
pub const UNITS_ENUMERATED_COUNTER: &str = "sgcn_units_enumerated_total";

// ==== Candidate gating metrics ====
/// Counter for candidate outcomes, labelled by outcome (forwarded/invalid/duplicate/errored)
pub const CANDIDATE_OUTCOMES_COUNTER: &str = "sgcn_candidate_outcomes_total";

/// Histogram for the number of candidates extracted from one unit
pub const BATCH_SIZE_HISTOGRAM: &str = "sgcn_batch_candidates";

// ==== Enrichment metrics ====
/// Counter for taxonomic lookups, labelled by result (enriched/absent/failed)
pub const ENRICHMENT_RESULTS_COUNTER: &str = "sgcn_enrichment_results_total";

/// Counter for terminal records handed to the sink
pub const TERMINAL_RECORDS_COUNTER: &str = "sgcn_terminal_records_total";

/// Counter for deferred lookups forwarded to stage 4, labelled by source
pub const DEFERRED_LOOKUPS_COUNTER: &str = "sgcn_deferred_lookups_forwarded_total";

// ==== Sink metrics ====
/// Counter for terminal record writes, labelled by result (ok/error)
pub const SINK_WRITES_COUNTER: &str = "sgcn_sink_writes_total";
