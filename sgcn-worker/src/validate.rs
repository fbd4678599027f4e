use anyhow::Error;
use async_trait::async_trait;
use serde_json::Value;

use sgcn_common::CandidateRecord;
use sgcn_pipeline::RecordValidator;

use crate::extract::SCIENTIFIC_NAME;

const REQUIRED_FIELDS: [&str; 4] = [SCIENTIFIC_NAME, "state", "year", "sciencebase_item_id"];

/// The SGCN record schema: every required field is a non-blank string and `year` is four digits.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequiredFieldsValidator;

impl RequiredFieldsValidator {
    pub fn check(record: &CandidateRecord) -> bool {
        let present = REQUIRED_FIELDS.iter().all(|field| {
            matches!(record.get(*field), Some(Value::String(s)) if !s.trim().is_empty())
        });

        present
            && record
                .get("year")
                .and_then(Value::as_str)
                .is_some_and(is_year)
    }
}

fn is_year(s: &str) -> bool {
    let s = s.trim();
    s.len() == 4 && s.chars().all(|c| c.is_ascii_digit())
}

#[async_trait]
impl RecordValidator for RequiredFieldsValidator {
    async fn validate(&self, record: &CandidateRecord) -> Result<bool, Error> {
        Ok(Self::check(record))
    }
}
