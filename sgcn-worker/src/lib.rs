//! Local runtime for the SGCN pipeline: file and HTTP backed collaborators, terminal sinks and an
//! in-process scheduler that carries messages between stages.

use std::sync::Arc;

use reqwest::Client;
use tracing::info;

use sgcn_pipeline::{Collaborators, TaxonomyService};

pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod metadata;
pub mod scheduler;
pub mod sink;
pub mod taxonomy;
pub mod validate;

use crate::catalog::FileCatalog;
use crate::config::Config;
use crate::error::WorkerError;
use crate::extract::TsvExtractor;
use crate::metadata::FileMetadataCache;
use crate::taxonomy::{HttpTaxonomyService, NoopTaxonomyService};
use crate::validate::RequiredFieldsValidator;

/// Build the one collaborator bundle every stage invocation of a run shares.
pub fn build_collaborators(config: &Config) -> Result<Collaborators, WorkerError> {
    // Source downloads can be large, so only the taxonomy lookups are time boxed, per request
    let client = Client::builder()
        .build()
        .map_err(|e| WorkerError::Setup {
            component: "http client",
            source: e.into(),
        })?;

    let taxonomy: Arc<dyn TaxonomyService> = match &config.taxonomy_url {
        Some(url) => {
            info!(url = %url, "using taxonomy service");
            Arc::new(
                HttpTaxonomyService::new(url, client.clone(), config.taxonomy_timeout.0).map_err(
                    |source| WorkerError::Setup {
                        component: "taxonomy service",
                        source,
                    },
                )?,
            )
        }
        None => {
            info!("no taxonomy service configured, records will not be enriched");
            Arc::new(NoopTaxonomyService)
        }
    };

    Ok(Collaborators {
        catalog: Arc::new(FileCatalog::new(
            config.catalog_path.clone(),
            config.process_log_path.clone(),
            client.clone(),
        )),
        metadata: Arc::new(FileMetadataCache::new(
            config.historic_list_path.clone(),
            config.itis_overrides_path.clone(),
            client.clone(),
        )),
        extractor: Arc::new(TsvExtractor::new(client)),
        validator: Arc::new(RequiredFieldsValidator),
        taxonomy,
    })
}
