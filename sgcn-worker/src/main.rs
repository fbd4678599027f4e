//! Run the SGCN pipeline once, end to end, against the configured catalog.
use std::sync::Arc;

use envconfig::Envconfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use sgcn_common::metrics::{serve, setup_metrics_router};
use sgcn_pipeline::PipelineDriver;
use sgcn_worker::build_collaborators;
use sgcn_worker::config::Config;
use sgcn_worker::error::WorkerError;
use sgcn_worker::scheduler::{RunContext, Scheduler};
use sgcn_worker::sink::build_sink;

fn setup_tracing() {
    let log_layer: tracing_subscriber::filter::Filtered<
        tracing_subscriber::fmt::Layer<tracing_subscriber::Registry>,
        EnvFilter,
        tracing_subscriber::Registry,
    > = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;

    if config.export_prometheus {
        let router = setup_metrics_router()?;
        let bind = config.bind();
        tokio::task::spawn(async move {
            if let Err(e) = serve(router, &bind).await {
                error!("failed to serve metrics on {}: {}", bind, e);
            }
        });
    }

    let sink = build_sink(config.sink_kind()?, &config.output_path)
        .await
        .map_err(|e| WorkerError::Setup {
            component: "sink",
            source: e.into(),
        })?;

    let driver = PipelineDriver::new(
        Arc::new(build_collaborators(&config)?),
        config.driver_config(),
    );
    let scheduler = Scheduler::new(
        driver,
        Arc::from(sink),
        RunContext {
            run_id: config.run_id.clone(),
            sb_item_id: config.sb_item_id.clone(),
            download_uri: config.download_uri.clone(),
        },
        config.max_concurrent_invocations,
    );

    let summary = scheduler.run().await?;
    info!(
        units = summary.units,
        species = summary.forwarded,
        finalized = summary.finalized,
        failed_invocations = summary.failed_invocations,
        sink_failures = summary.sink_failures,
        "Shutting down"
    );

    Ok(())
}
