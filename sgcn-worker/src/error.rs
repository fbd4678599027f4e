use metrics_exporter_prometheus::BuildError;
use sgcn_pipeline::StageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not a known sink, expected stdout, file or noop")]
    UnknownSink(String),
}

/// Errors writing a terminal record to its durable destination.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write terminal record: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize terminal record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that abort the worker before or during a run.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration")]
    EnvConfig(#[from] envconfig::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to set up {component}")]
    Setup {
        component: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to install the metrics recorder")]
    Metrics(#[from] BuildError),
    #[error("pipeline run aborted")]
    Run(#[from] StageError),
}
