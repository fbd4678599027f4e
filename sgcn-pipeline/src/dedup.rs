//! Intra-batch duplicate suppression.

use std::collections::HashSet;

use sgcn_common::{CandidateRecord, Fingerprint};

/// Fingerprints seen while gating one unit of source data, in first-seen order.
///
/// A `SeenSet` belongs to exactly one stage-2 invocation. It is deliberately not `Clone` and is
/// never stored on the driver: sharing one across invocations would deduplicate unrelated files
/// against each other.
#[derive(Debug, Default)]
pub struct SeenSet {
    entries: Vec<(Fingerprint, CandidateRecord)>,
    index: HashSet<Fingerprint>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_duplicate(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains(fingerprint)
    }

    /// Remember a fingerprint and the record that produced it. Returns `false` and keeps the
    /// original entry when the fingerprint was already recorded.
    pub fn record(&mut self, fingerprint: Fingerprint, record: CandidateRecord) -> bool {
        if !self.index.insert(fingerprint.clone()) {
            return false;
        }
        self.entries.push((fingerprint, record));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Fingerprint, CandidateRecord)> {
        self.entries.iter()
    }
}
