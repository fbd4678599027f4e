use anyhow::{Context, Error};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use sgcn_common::{CandidateRecord, ProcessUnit};
use sgcn_pipeline::{SgcnMetadata, SourceExtractor};

use crate::fetch::{decode_text, fetch_bytes};

pub const SCIENTIFIC_NAME: &str = "scientific name";
const TAXONOMIC_CATEGORY: &str = "taxonomic category";
const TAXONOMY_GROUP_ALIASES: [&str; 2] = ["taxonomy group", "taxonomy group (use drop down box)"];
const DROPPED_COLUMNS: [&str; 1] = ["2005 swap"];

/// Reads a unit's tab-delimited process file into candidate records. Column names are
/// lower-cased; empty cells become null.
pub struct TsvExtractor {
    client: Client,
}

impl TsvExtractor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceExtractor for TsvExtractor {
    async fn extract_candidates(
        &self,
        unit: &ProcessUnit,
        metadata: &SgcnMetadata,
    ) -> Result<Vec<CandidateRecord>, Error> {
        let bytes = fetch_bytes(&self.client, &unit.source_file_url).await?;
        let text = decode_text(bytes);
        let processed_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let records = parse_tsv(&text)
            .with_context(|| format!("malformed process file {}", unit.source_file_url))?
            .into_iter()
            .map(|row| annotate(row, unit, metadata, &processed_at))
            .collect::<Vec<_>>();

        debug!(unit = %unit, rows = records.len(), "extracted candidates");
        Ok(records)
    }
}

fn parse_tsv(text: &str) -> Result<Vec<CandidateRecord>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(normalize_header)
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let mut row = CandidateRecord::new();
        for (i, header) in headers.iter().enumerate() {
            let value = match record.get(i).map(str::trim) {
                Some(cell) if !cell.is_empty() => Value::String(cell.to_owned()),
                _ => Value::Null,
            };
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn normalize_header(header: &str) -> String {
    let lower = header.trim().to_lowercase();
    if TAXONOMY_GROUP_ALIASES.contains(&lower.as_str()) {
        TAXONOMIC_CATEGORY.to_owned()
    } else {
        lower
    }
}

fn annotate(
    mut row: CandidateRecord,
    unit: &ProcessUnit,
    metadata: &SgcnMetadata,
    processed_at: &str,
) -> CandidateRecord {
    for column in DROPPED_COLUMNS {
        row.remove(column);
    }

    row.insert(
        "sciencebase_item_id".to_owned(),
        Value::String(unit.sciencebase_item_id.clone()),
    );
    row.insert(
        "record_processed".to_owned(),
        Value::String(processed_at.to_owned()),
    );
    row.insert(
        "source_file_date".to_owned(),
        Value::String(unit.source_file_date.clone()),
    );
    row.insert(
        "source_fileurl".to_owned(),
        Value::String(unit.source_file_url.clone()),
    );

    fill_missing(&mut row, "state", &unit.state);
    fill_missing(&mut row, "year", &unit.year);

    let name = row
        .get(SCIENTIFIC_NAME)
        .and_then(Value::as_str)
        .map(str::to_owned);

    let clean = name.as_deref().and_then(clean_scientific_name);
    let historic = name.as_deref().is_some_and(|n| metadata.is_historic(n));
    let itis = name.as_deref().and_then(|n| metadata.itis_override(n));

    row.insert(
        "clean_scientific_name".to_owned(),
        clean.map_or(Value::Null, Value::String),
    );
    row.insert("historic_list".to_owned(), Value::Bool(historic));
    row.insert(
        "itis_identifier".to_owned(),
        itis.map_or(Value::Null, |id| Value::String(id.to_owned())),
    );

    row
}

fn fill_missing(row: &mut CandidateRecord, key: &str, value: &str) {
    if !row.contains_key(key) {
        row.insert(key.to_owned(), Value::String(value.to_owned()));
    }
}

/// Normalize a reported scientific name for taxonomic lookup: parenthetical notes, quotes and
/// rank placeholders (`sp.`, `spp.`, `pop. 1`) are removed and the genus is capitalized.
pub fn clean_scientific_name(name: &str) -> Option<String> {
    let mut stripped = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '"' | '\'' => {}
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }

    let mut tokens = Vec::new();
    for token in stripped.split_whitespace() {
        let lower = token.to_lowercase();
        if lower == "pop" || lower == "pop." {
            break;
        }
        if matches!(lower.as_str(), "sp" | "sp." | "spp" | "spp." | "cf." | "cf") {
            continue;
        }
        tokens.push(token);
    }

    let joined = tokens.join(" ");
    let mut chars = joined.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}
