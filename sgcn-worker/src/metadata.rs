use anyhow::{Context, Error};
use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::info;

use sgcn_pipeline::{ItisOverride, MetadataCache, MetadataHandle, SgcnMetadata};

use crate::fetch::{decode_text, fetch_bytes};

/// Loads the historic national list and the ITIS overrides once per process. Either source may
/// be unset, in which case no name is historic or overridden.
pub struct FileMetadataCache {
    historic_list: Option<String>,
    itis_overrides: Option<String>,
    client: Client,
    loaded: OnceCell<MetadataHandle>,
}

impl FileMetadataCache {
    pub fn new(
        historic_list: Option<String>,
        itis_overrides: Option<String>,
        client: Client,
    ) -> Self {
        Self {
            historic_list,
            itis_overrides,
            client,
            loaded: OnceCell::new(),
        }
    }

    async fn load(&self) -> Result<MetadataHandle, Error> {
        let historic_names = match &self.historic_list {
            Some(location) => parse_historic_list(&decode_text(
                fetch_bytes(&self.client, location).await?,
            )),
            None => vec![],
        };

        let overrides: Vec<ItisOverride> = match &self.itis_overrides {
            Some(location) => {
                let bytes = fetch_bytes(&self.client, location).await?;
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("invalid ITIS overrides {location}"))?
            }
            None => vec![],
        };

        info!(
            historic_names = historic_names.len(),
            itis_overrides = overrides.len(),
            "cached SGCN metadata"
        );

        Ok(MetadataHandle::new(SgcnMetadata::new(
            historic_names,
            overrides,
        )))
    }
}

#[async_trait]
impl MetadataCache for FileMetadataCache {
    async fn warm(&self) -> Result<MetadataHandle, Error> {
        self.loaded
            .get_or_try_init(|| self.load())
            .await
            .cloned()
    }
}

fn parse_historic_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}
