use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::{Telemetry, metrics::exposition::CONTENT_TYPE};

pub async fn prometheus_metrics(State(telemetry): State<Arc<Telemetry>>) -> impl IntoResponse {
    let payload = telemetry.render();

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));

    response
}
