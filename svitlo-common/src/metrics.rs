//! Prometheus exposition for the monitor's HTTP server.

use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::Response,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Probe durations range from a few milliseconds to the whole probe timeout.
const DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Installs the global recorder, then serves it at `/metrics` next to the routes of `router`.
///
/// Must be called once per process, after every other route was added.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let handle = setup_metrics_recorder()?;

    Ok(router
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .layer(axum::middleware::from_fn(track_metrics)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)?
        .install_recorder()
}

/// Counts requests and their latency per route, method and status.
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", route),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("svitlo_http_requests_total", &labels).increment(1);
    metrics::histogram!("svitlo_http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
