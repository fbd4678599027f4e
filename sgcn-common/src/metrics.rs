//! Prometheus exposition for the worker: a global recorder plus a small axum router serving
//! `/metrics` next to the liveness and readiness probes.

use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Stage invocations wrap source downloads and taxonomic lookups, so durations run well past a
/// typical request histogram.
const DURATION_BUCKETS_SECONDS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

const HTTP_REQUESTS_COUNTER: &str = "sgcn_http_requests_total";
const HTTP_REQUEST_DURATION_HISTOGRAM: &str = "sgcn_http_request_duration_seconds";

pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await
}

pub async fn index() -> &'static str {
    "sgcn pipeline worker"
}

pub fn metrics_builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets(DURATION_BUCKETS_SECONDS)
}

/// Install the global recorder. Must be called at most once per process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    metrics_builder()?.install_recorder()
}

/// Install the global recorder and build a router that renders it.
pub fn setup_metrics_router() -> Result<Router, BuildError> {
    Ok(metrics_router(setup_metrics_recorder()?))
}

pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_liveness", get(index))
        .route("/_readiness", get(index))
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .layer(axum::middleware::from_fn(track_http_request))
}

async fn track_http_request(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let response = next.run(req).await;

    let labels = [
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!(HTTP_REQUESTS_COUNTER, &labels).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_HISTOGRAM, &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
