use std::time::Duration;

use anyhow::{Context, Error};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;

use sgcn_common::{ForwardedItem, NameQueue};
use sgcn_pipeline::{TaxonomyLookup, TaxonomyService};

/// Client for the taxonomic summary service. `POST {base}/taxa_summary` takes the flat forwarded
/// item and answers with a [`TaxonomyLookup`]; `POST {base}/additional/{source}` takes a name
/// queue and caches whatever that source knows about it.
pub struct HttpTaxonomyService {
    client: Client,
    base: Url,
    timeout: Duration,
}

#[derive(Serialize)]
struct AdditionalRequest<'a> {
    name_queue: &'a NameQueue,
}

impl HttpTaxonomyService {
    /// `timeout` bounds each lookup request; the client itself is shared with the source
    /// downloads and carries no overall timeout.
    pub fn new(base: &str, client: Client, timeout: Duration) -> Result<Self, Error> {
        let mut base = Url::parse(base).with_context(|| format!("invalid taxonomy url {base}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            base,
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base.join(path)?)
    }
}

#[async_trait]
impl TaxonomyService for HttpTaxonomyService {
    async fn lookup_taxonomy(&self, item: &ForwardedItem) -> Result<TaxonomyLookup, Error> {
        let url = self.endpoint("taxa_summary")?;
        let lookup = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(item)
            .send()
            .await?
            .error_for_status()?
            .json::<TaxonomyLookup>()
            .await
            .with_context(|| format!("invalid taxa summary for {}", item.name()))?;

        debug!(
            species = %item.name(),
            enriched = lookup.summary.is_some(),
            queued_names = lookup.name_queue.len(),
            "taxa summary"
        );
        Ok(lookup)
    }

    async fn lookup_additional(&self, name_queue: &NameQueue, source_tag: &str) -> Result<(), Error> {
        let url = self.endpoint(&format!("additional/{source_tag}"))?;
        self.client
            .post(url)
            .timeout(self.timeout)
            .json(&AdditionalRequest { name_queue })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Used when no taxonomy service is configured: every lookup is absent and the deferred sources
/// have nothing to do.
pub struct NoopTaxonomyService;

#[async_trait]
impl TaxonomyService for NoopTaxonomyService {
    async fn lookup_taxonomy(&self, _item: &ForwardedItem) -> Result<TaxonomyLookup, Error> {
        Ok(TaxonomyLookup::absent())
    }

    async fn lookup_additional(&self, _name_queue: &NameQueue, _source_tag: &str) -> Result<(), Error> {
        Ok(())
    }
}
