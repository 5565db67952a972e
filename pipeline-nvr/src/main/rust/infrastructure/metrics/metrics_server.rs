use std::future::Future;

use serde::Serialize;
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::Filter;

use super::prometheus_reporter::{CHANNELS_ONLINE, RECORDINGS_ACTIVE};
use super::PrometheusReporter;

const SERVICE_NAME: &str = "pipeline-nvr";

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    channels_online: i64,
    recordings_active: i64,
}

impl StatusResponse {
    fn new(status: &'static str) -> Self {
        Self {
            status,
            service: SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            channels_online: CHANNELS_ONLINE.get(),
            recordings_active: RECORDINGS_ACTIVE.get(),
        }
    }
}

/// Serve `/metrics` and the probes until `shutdown` resolves.
///
/// `/readyz` answers 503 until `ready` turns true, which happens once the
/// always-on channels have been started.
pub async fn serve_metrics(
    port: u16,
    ready: watch::Receiver<bool>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "OPTIONS"])
        .allow_headers(vec!["Content-Type"]);

    let metrics_route = warp::path("metrics").map(|| {
        warp::reply::with_header(
            PrometheusReporter::gather_metrics(),
            "content-type",
            "text/plain; version=0.0.4; charset=utf-8",
        )
    });

    let health_route =
        warp::path("health").map(|| warp::reply::json(&StatusResponse::new("healthy")));

    let liveness_route = warp::path("livez").map(|| warp::reply::with_status("OK", StatusCode::OK));

    let readiness_route = warp::path("readyz").map(move || {
        if *ready.borrow() {
            warp::reply::with_status(
                warp::reply::json(&StatusResponse::new("ready")),
                StatusCode::OK,
            )
        } else {
            warp::reply::with_status(
                warp::reply::json(&StatusResponse::new("starting")),
                StatusCode::SERVICE_UNAVAILABLE,
            )
        }
    });

    let routes = metrics_route
        .or(health_route)
        .or(liveness_route)
        .or(readiness_route)
        .with(cors);

    let (addr, server) =
        warp::serve(routes).bind_with_graceful_shutdown(([0, 0, 0, 0], port), shutdown);
    tracing::info!("Metrics server listening on http://{}", addr);
    server.await;
}
