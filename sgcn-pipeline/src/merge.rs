use sgcn_common::CandidateRecord;

/// Shallow-merge an enrichment payload over a staged record. Payload fields win on collision;
/// an absent or empty payload leaves the record untouched.
pub fn merge(base: &CandidateRecord, enrichment: Option<&CandidateRecord>) -> CandidateRecord {
    let mut merged = base.clone();
    if let Some(payload) = enrichment {
        for (key, value) in payload {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}
