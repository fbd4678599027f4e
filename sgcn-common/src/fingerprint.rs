//! Content fingerprints for candidate records.
//!
//! A record is rendered to compact JSON with object keys sorted at every level, then digested
//! with SHA-1. Two records holding the same fields and values therefore share a fingerprint no
//! matter in which order their columns were read. Fingerprints only identify a record within the
//! batch that computed them.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::record::CandidateRecord;

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("record cannot be canonically serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lowercase hex SHA-1 digest of a record's canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of the hex rendering.
    pub const HEX_LEN: usize = 40;

    /// Wrap an already computed digest, e.g. one read back from a stage message.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint any serializable value.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<Fingerprint, FingerprintError> {
    let value = serde_json::to_value(value)?;
    let mut canonical = Vec::new();
    write_canonical(&value, &mut canonical)?;

    let mut hasher = Sha1::new();
    hasher.update(&canonical);
    let digest = hasher.finalize();

    let hex = digest.iter().fold(String::new(), |mut acc, byte| {
        let _ = write!(acc, "{:02x}", byte);
        acc
    });
    Ok(Fingerprint(hex))
}

pub fn fingerprint_record(record: &CandidateRecord) -> Result<Fingerprint, FingerprintError> {
    fingerprint(record)
}

// Keys are sorted here rather than relying on serde_json's map ordering, which flips to
// insertion order if any crate in the build enables `preserve_order`.
fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            out.push(b'{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(value, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}
