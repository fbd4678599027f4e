//! Catalog backed by a JSON listing of ScienceBase items, the shape returned by an item search
//! under the SGCN root item (`title,dates,files,tags`).

use anyhow::{Context, Error};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use sgcn_common::ProcessUnit;
use sgcn_pipeline::Catalog;

use crate::fetch::fetch_bytes;

const PROCESS_FILE_TITLE: &str = "Process File";
const PLACE_TAG: &str = "Place";
const COLLECTED_DATE: &str = "Collected";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing {
    Search { items: Vec<CatalogItem> },
    Items(Vec<CatalogItem>),
}

impl Listing {
    fn into_items(self) -> Vec<CatalogItem> {
        match self {
            Listing::Search { items } => items,
            Listing::Items(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<Link>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    dates: Vec<ItemDate>,
    #[serde(default)]
    files: Vec<ItemFile>,
}

#[derive(Debug, Deserialize)]
struct Link {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Tag {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemDate {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(rename = "dateString", default)]
    date_string: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemFile {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "dateUploaded", default)]
    date_uploaded: Option<String>,
}

/// A unit that has already been processed, matched on source url and upload date.
#[derive(Debug, Deserialize)]
struct ProcessLogEntry {
    source_file_url: String,
    source_file_date: String,
}

impl CatalogItem {
    fn process_file(&self) -> Option<&ItemFile> {
        self.files
            .iter()
            .find(|f| f.title.as_deref() == Some(PROCESS_FILE_TITLE))
    }

    /// `Ok(None)` when the item has no process file at all; `Err` names the first attribute a
    /// processable item is missing.
    fn to_unit(&self) -> Result<Option<ProcessUnit>, &'static str> {
        let Some(file) = self.process_file() else {
            return Ok(None);
        };

        let sciencebase_item_id = self.link.as_ref().ok_or("link.url")?.url.clone();
        let state = self
            .tags
            .iter()
            .find(|t| t.kind.as_deref() == Some(PLACE_TAG))
            .and_then(|t| t.name.clone())
            .ok_or("Place tag")?;
        let year = self
            .dates
            .iter()
            .find(|d| d.kind.as_deref() == Some(COLLECTED_DATE))
            .and_then(|d| d.date_string.clone())
            .ok_or("Collected date")?;
        let source_file_url = file.url.clone().ok_or("Process File url")?;
        let source_file_date = file
            .date_uploaded
            .clone()
            .ok_or("Process File dateUploaded")?;

        Ok(Some(ProcessUnit {
            sciencebase_item_id,
            state,
            year,
            source_file_url,
            source_file_date,
        }))
    }
}

pub struct FileCatalog {
    listing: String,
    process_log: Option<String>,
    client: Client,
}

impl FileCatalog {
    pub fn new(listing: String, process_log: Option<String>, client: Client) -> Self {
        Self {
            listing,
            process_log,
            client,
        }
    }

    async fn processed(&self) -> Result<Vec<ProcessLogEntry>, Error> {
        let Some(location) = &self.process_log else {
            return Ok(vec![]);
        };
        let bytes = fetch_bytes(&self.client, location).await?;
        serde_json::from_slice(&bytes).with_context(|| format!("invalid process log {location}"))
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn enumerate_processable_units(&self) -> Result<Vec<ProcessUnit>, Error> {
        let bytes = fetch_bytes(&self.client, &self.listing).await?;
        let listing: Listing = serde_json::from_slice(&bytes)
            .with_context(|| format!("invalid catalog listing {}", self.listing))?;
        let processed = self.processed().await?;

        let mut units = Vec::new();
        for item in listing.into_items() {
            let unit = match item.to_unit() {
                Ok(Some(unit)) => unit,
                Ok(None) => continue,
                Err(missing) => {
                    warn!(
                        title = item.title.as_deref().unwrap_or("<untitled>"),
                        missing,
                        "skipping catalog item missing a required attribute"
                    );
                    continue;
                }
            };

            let already_processed = processed.iter().any(|p| {
                p.source_file_url == unit.source_file_url
                    && p.source_file_date == unit.source_file_date
            });
            if already_processed {
                info!(unit = %unit, "already processed, skipping");
                continue;
            }

            units.push(unit);
        }

        Ok(units)
    }
}
