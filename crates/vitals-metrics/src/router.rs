use std::sync::Arc;

use axum::{Router, middleware, routing::get};

use crate::{Telemetry, handlers, middleware::track_http_metrics};

pub const METRICS_PATH: &str = "/metrics";

/// Adds the scrape endpoint and request instrumentation to `router`. With
/// telemetry disabled the router is returned untouched, so requests pay
/// nothing for metrics and `/metrics` does not exist.
pub fn with_metrics(router: Router, telemetry: Option<Arc<Telemetry>>) -> Router {
    let Some(telemetry) = telemetry else {
        return router;
    };

    let instrumentor = telemetry.instrumentor();
    router
        .merge(
            Router::new()
                .route(METRICS_PATH, get(handlers::metrics::prometheus_metrics))
                .with_state(telemetry),
        )
        .layer(middleware::from_fn_with_state(
            instrumentor,
            track_http_metrics,
        ))
}

pub fn health_router() -> Router {
    Router::new().route("/health", get(handlers::health::health_check))
}
