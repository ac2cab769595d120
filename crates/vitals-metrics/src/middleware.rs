use std::convert::Infallible;

use axum::{
    extract::{MatchedPath, Request, State},
    http::header::CONTENT_LENGTH,
    middleware::Next,
    response::Response,
};

use crate::instrument::{RequestInfo, RequestInstrumentor};

/// Records every request that passes through the router. The endpoint label is
/// the matched route template; requests that matched no route are `unknown`.
pub async fn track_http_metrics(
    State(instrumentor): State<RequestInstrumentor>,
    request: Request,
    next: Next,
) -> Response {
    let info = RequestInfo::new(
        request.method().as_str(),
        request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str),
        request
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok()),
    );

    let outcome = instrumentor
        .instrument(info, async move { Ok::<_, Infallible>(next.run(request).await) })
        .await;

    match outcome {
        Ok(response) => response,
        Err(never) => match never {},
    }
}
