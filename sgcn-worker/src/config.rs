use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use sgcn_pipeline::DriverConfig;

use crate::error::ConfigError;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(from = "RUN_ID", default = "local")]
    pub run_id: String,

    // The SGCN root item on ScienceBase
    #[envconfig(from = "SB_ITEM_ID", default = "56d720ece4b015c306f442d5")]
    pub sb_item_id: String,

    #[envconfig(from = "DOWNLOAD_URI", default = ".")]
    pub download_uri: String,

    /// JSON listing of the catalog items to enumerate
    #[envconfig(from = "CATALOG_PATH")]
    pub catalog_path: String,

    /// JSON array of units already processed; matching units are skipped
    #[envconfig(from = "PROCESS_LOG_PATH")]
    pub process_log_path: Option<String>,

    #[envconfig(from = "HISTORIC_LIST_PATH")]
    pub historic_list_path: Option<String>,

    #[envconfig(from = "ITIS_OVERRIDES_PATH")]
    pub itis_overrides_path: Option<String>,

    /// Base url of the taxonomic lookup service. Without it, every lookup comes back absent.
    #[envconfig(from = "TAXONOMY_URL")]
    pub taxonomy_url: Option<String>,

    #[envconfig(from = "TAXONOMY_TIMEOUT", default = "5000")]
    pub taxonomy_timeout: EnvMsDuration,

    #[envconfig(from = "ENABLE_DEFERRED_ENRICHMENT", default = "false")]
    pub enable_deferred_enrichment: bool,

    // comma separated
    #[envconfig(from = "DEFERRED_SOURCES", default = "gbif,ecos,iucn,natureserve")]
    pub deferred_sources: String,

    #[envconfig(from = "SINK", default = "stdout")]
    pub sink: String,

    #[envconfig(from = "OUTPUT_PATH", default = "sgcn_final.jsonl")]
    pub output_path: String,

    #[envconfig(from = "MAX_CONCURRENT_INVOCATIONS", default = "8")]
    pub max_concurrent_invocations: usize,

    #[envconfig(from = "EXPORT_PROMETHEUS", default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            enable_deferred_enrichment: self.enable_deferred_enrichment,
            deferred_sources: self
                .deferred_sources
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    pub fn sink_kind(&self) -> Result<SinkKind, ConfigError> {
        self.sink.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Stdout,
    File,
    NoOp,
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stdout" => Ok(SinkKind::Stdout),
            "file" => Ok(SinkKind::File),
            "noop" => Ok(SinkKind::NoOp),
            other => Err(ConfigError::UnknownSink(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
