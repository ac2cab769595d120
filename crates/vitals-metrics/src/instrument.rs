//! Request lifecycle instrumentation, independent of any web framework.
//!
//! [`RequestInstrumentor::instrument`] wraps the future that runs the rest of
//! the request pipeline. The in-flight gauge is released by a drop guard, so
//! it is decremented on success, on error, on panic and when the request
//! future is dropped before completion.

use std::{
    borrow::Cow,
    convert::Infallible,
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{http::header::CONTENT_LENGTH, response::Response};
use futures::FutureExt;
use http_body::Body as _;
use tracing::warn;
use vitals_common::VitalsError;

use crate::metrics::HttpMetrics;

/// Endpoint label used when the serving layer resolved no route template.
pub const UNKNOWN_ENDPOINT: &str = "unknown";

/// Exception label recorded when the handler panics.
pub const PANIC_EXCEPTION: &str = "panic";

const FAILURE_STATUS: u16 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub endpoint: String,
    pub request_size: u64,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, route: Option<&str>, content_length: Option<&str>) -> Self {
        Self {
            method: method.into(),
            endpoint: route.unwrap_or(UNKNOWN_ENDPOINT).to_string(),
            request_size: parse_content_length(content_length).unwrap_or(0),
        }
    }
}

/// A declared content length, if it is a non-negative integer.
pub fn parse_content_length(value: Option<&str>) -> Option<u64> {
    value.and_then(|value| value.trim().parse::<u64>().ok())
}

/// What the instrumentor needs from a finished response.
pub trait ResponseMeta {
    fn status_code(&self) -> u16;

    /// Body size in bytes, or `None` when it is not known up front.
    fn response_size(&self) -> Option<u64>;
}

impl ResponseMeta for Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn response_size(&self) -> Option<u64> {
        let declared = self
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok());

        parse_content_length(declared).or_else(|| self.body().size_hint().exact())
    }
}

/// Label value for a failed handler.
pub trait ExceptionKind {
    fn exception_kind(&self) -> Cow<'_, str>;
}

impl ExceptionKind for Infallible {
    fn exception_kind(&self) -> Cow<'_, str> {
        match *self {}
    }
}

impl ExceptionKind for std::io::Error {
    fn exception_kind(&self) -> Cow<'_, str> {
        Cow::Owned(format!("io::{:?}", self.kind()))
    }
}

impl ExceptionKind for VitalsError {
    fn exception_kind(&self) -> Cow<'_, str> {
        let kind = match self {
            Self::DuplicateMetricName(_) => "DuplicateMetricName",
            Self::LabelArityMismatch { .. } => "LabelArityMismatch",
            Self::InvalidMetricName(_) => "InvalidMetricName",
            Self::InvalidLabelName { .. } => "InvalidLabelName",
            Self::InvalidBuckets { .. } => "InvalidBuckets",
            Self::InvalidValue { .. } => "InvalidValue",
            Self::UnsupportedOperation { .. } => "UnsupportedOperation",
            Self::InfoAlreadySet(_) => "InfoAlreadySet",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::Io(_) => "Io",
        };
        Cow::Borrowed(kind)
    }
}

#[derive(Clone)]
pub struct RequestInstrumentor {
    metrics: Arc<HttpMetrics>,
}

impl RequestInstrumentor {
    pub fn new(metrics: Arc<HttpMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &HttpMetrics {
        &self.metrics
    }

    /// Runs `handler` as one instrumented request. Errors and panics are
    /// recorded as a 500 plus an exception, then handed back unchanged.
    pub async fn instrument<F, R, E>(&self, request: RequestInfo, handler: F) -> Result<R, E>
    where
        F: Future<Output = Result<R, E>>,
        R: ResponseMeta,
        E: ExceptionKind,
    {
        let _active = ActiveRequestGuard::start(&self.metrics, &request);
        let started_at = Instant::now();

        match AssertUnwindSafe(handler).catch_unwind().await {
            Ok(Ok(response)) => {
                self.record_completion(
                    &request,
                    response.status_code(),
                    started_at.elapsed(),
                    response.response_size().unwrap_or(0),
                );
                Ok(response)
            }
            Ok(Err(err)) => {
                self.record_failure(&request, &err.exception_kind(), started_at.elapsed());
                Err(err)
            }
            Err(payload) => {
                self.record_failure(&request, PANIC_EXCEPTION, started_at.elapsed());
                panic::resume_unwind(payload)
            }
        }
    }

    fn record_completion(&self, request: &RequestInfo, status: u16, duration: Duration, response_size: u64) {
        if let Err(err) = self.metrics.record_request(
            &request.method,
            &request.endpoint,
            status,
            duration,
            request.request_size,
            response_size,
        ) {
            warn!(error = %err, method = %request.method, endpoint = %request.endpoint, "failed to record request metrics");
        }
    }

    fn record_failure(&self, request: &RequestInfo, exception_type: &str, duration: Duration) {
        if let Err(err) = self
            .metrics
            .record_exception(&request.method, &request.endpoint, exception_type)
        {
            warn!(error = %err, exception_type, "failed to record request exception");
        }
        self.record_completion(request, FAILURE_STATUS, duration, 0);
    }
}

/// Holds one unit of `http_requests_active` for the lifetime of a request.
struct ActiveRequestGuard<'a> {
    metrics: &'a HttpMetrics,
    request: &'a RequestInfo,
    started: bool,
}

impl<'a> ActiveRequestGuard<'a> {
    fn start(metrics: &'a HttpMetrics, request: &'a RequestInfo) -> Self {
        let started = match metrics.start_request(&request.method, &request.endpoint) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to mark request active");
                false
            }
        };

        Self {
            metrics,
            request,
            started,
        }
    }
}

impl Drop for ActiveRequestGuard<'_> {
    fn drop(&mut self) {
        if !self.started {
            return;
        }

        if let Err(err) = self
            .metrics
            .end_request(&self.request.method, &self.request.endpoint)
        {
            warn!(error = %err, "failed to mark request finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{borrow::Cow, panic::AssertUnwindSafe, sync::Arc, time::Duration};

    use axum::{
        body::Body,
        http::{self, StatusCode},
        response::Response,
    };
    use futures::FutureExt;

    use super::{
        ExceptionKind, RequestInfo, RequestInstrumentor, ResponseMeta, UNKNOWN_ENDPOINT,
        parse_content_length,
    };
    use crate::metrics::{HttpMetrics, MetricValue, MetricsRegistry};

    #[derive(Debug, PartialEq)]
    struct StoreUnavailable;

    impl ExceptionKind for StoreUnavailable {
        fn exception_kind(&self) -> Cow<'_, str> {
            Cow::Borrowed("StoreUnavailable")
        }
    }

    struct Reply {
        status: u16,
        size: Option<u64>,
    }

    impl ResponseMeta for Reply {
        fn status_code(&self) -> u16 {
            self.status
        }

        fn response_size(&self) -> Option<u64> {
            self.size
        }
    }

    fn instrumentor() -> (RequestInstrumentor, Arc<MetricsRegistry>) {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Arc::new(HttpMetrics::register(&registry).unwrap());
        (RequestInstrumentor::new(metrics), registry)
    }

    fn histogram_buckets(registry: &MetricsRegistry, name: &str, labels: &[&str]) -> Vec<(f64, u64)> {
        let snapshot = registry.snapshot();
        let metric = snapshot
            .iter()
            .find(|metric| metric.descriptor.name == name)
            .unwrap();
        match &metric.sample(labels).unwrap().value {
            MetricValue::Histogram { buckets, .. } => buckets.clone(),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn request_info_defaults() {
        let info = RequestInfo::new("GET", None, Some("not-a-number"));
        assert_eq!(info.endpoint, UNKNOWN_ENDPOINT);
        assert_eq!(info.request_size, 0);

        let info = RequestInfo::new("PUT", Some("/users/{id}"), Some(" 42 "));
        assert_eq!(info.endpoint, "/users/{id}");
        assert_eq!(info.request_size, 42);

        assert_eq!(parse_content_length(Some("-1")), None);
    }

    #[test]
    fn axum_response_size_prefers_header_then_body() {
        let with_header = http::Response::builder()
            .header("content-length", "340")
            .body(Body::empty())
            .unwrap();
        assert_eq!(with_header.response_size(), Some(340));

        let from_body = Response::new(Body::from("hello"));
        assert_eq!(from_body.response_size(), Some(5));
        assert_eq!(from_body.status_code(), StatusCode::OK.as_u16());
    }

    #[tokio::test]
    async fn successful_request_is_recorded() {
        let (instrumentor, registry) = instrumentor();
        let request = RequestInfo::new("GET", Some("/users/{id}"), None);

        let reply = instrumentor
            .instrument(request, async {
                tokio::time::sleep(Duration::from_millis(12)).await;
                Ok::<_, StoreUnavailable>(Reply {
                    status: 200,
                    size: Some(340),
                })
            })
            .await
            .unwrap();
        assert_eq!(reply.status, 200);

        let metrics = instrumentor.metrics();
        assert_eq!(metrics.request_count("GET", "/users/{id}", 200), 1.0);
        assert_eq!(metrics.active_requests("GET", "/users/{id}"), 0.0);

        let duration = histogram_buckets(&registry, "http_request_duration_seconds", &["GET", "/users/{id}"]);
        for (bound, cumulative) in &duration {
            // At least 12ms elapsed; well under 10s.
            if *bound >= 10.0 {
                assert_eq!(*cumulative, 1, "duration bucket le={bound}");
            }
            if *bound <= 0.01 {
                assert_eq!(*cumulative, 0, "duration bucket le={bound}");
            }
        }

        let response = histogram_buckets(&registry, "http_response_size_bytes", &["GET", "/users/{id}"]);
        for (bound, cumulative) in &response {
            assert_eq!(*cumulative, u64::from(*bound >= 1024.0), "size bucket le={bound}");
        }
    }

    #[tokio::test]
    async fn handler_errors_are_recorded_and_returned() {
        let (instrumentor, registry) = instrumentor();
        let request = RequestInfo::new("POST", Some("/users/"), Some("128"));

        let result = instrumentor
            .instrument(request, async { Err::<Reply, _>(StoreUnavailable) })
            .await;

        assert_eq!(result.err(), Some(StoreUnavailable));
        let metrics = instrumentor.metrics();
        assert_eq!(metrics.exception_count("POST", "/users/", "StoreUnavailable"), 1.0);
        assert_eq!(metrics.request_count("POST", "/users/", 500), 1.0);
        assert_eq!(metrics.active_requests("POST", "/users/"), 0.0);

        let request_size = histogram_buckets(&registry, "http_request_size_bytes", &["POST", "/users/"]);
        for (bound, cumulative) in &request_size {
            assert_eq!(*cumulative, u64::from(*bound >= 256.0), "size bucket le={bound}");
        }
    }

    #[tokio::test]
    async fn panics_are_recorded_and_resumed() {
        let (instrumentor, _registry) = instrumentor();
        let request = RequestInfo::new("GET", Some("/boom"), None);

        let outcome = AssertUnwindSafe(instrumentor.instrument(request, async {
            if true {
                panic!("handler blew up");
            }
            Ok::<Reply, StoreUnavailable>(Reply {
                status: 200,
                size: None,
            })
        }))
        .catch_unwind()
        .await;

        let payload = outcome.err().expect("panic propagates");
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"handler blew up"));

        let metrics = instrumentor.metrics();
        assert_eq!(metrics.exception_count("GET", "/boom", "panic"), 1.0);
        assert_eq!(metrics.request_count("GET", "/boom", 500), 1.0);
        assert_eq!(metrics.active_requests("GET", "/boom"), 0.0);
    }

    #[tokio::test]
    async fn cancelled_request_releases_active_gauge() {
        let (instrumentor, _registry) = instrumentor();
        let request = RequestInfo::new("GET", Some("/slow"), None);

        let slow = instrumentor.instrument(request, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, StoreUnavailable>(Reply {
                status: 200,
                size: None,
            })
        });

        let timed_out = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert!(timed_out.is_err());

        let metrics = instrumentor.metrics();
        assert_eq!(metrics.active_requests("GET", "/slow"), 0.0);
        assert_eq!(metrics.request_count("GET", "/slow", 200), 0.0);
    }

    #[tokio::test]
    async fn concurrent_mixed_requests_balance_active_gauge() {
        let (instrumentor, _registry) = instrumentor();

        let tasks = (0..64)
            .map(|index| {
                let instrumentor = instrumentor.clone();
                tokio::spawn(async move {
                    let request = RequestInfo::new("GET", Some("/items/{id}"), None);
                    let _ = instrumentor
                        .instrument(request, async move {
                            tokio::time::sleep(Duration::from_millis(index % 5)).await;
                            if index % 3 == 0 {
                                Err(StoreUnavailable)
                            } else {
                                Ok(Reply {
                                    status: 200,
                                    size: Some(10),
                                })
                            }
                        })
                        .await;
                })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            task.await.unwrap();
        }

        let metrics = instrumentor.metrics();
        assert_eq!(metrics.active_requests("GET", "/items/{id}"), 0.0);
        let total = metrics.request_count("GET", "/items/{id}", 200)
            + metrics.request_count("GET", "/items/{id}", 500);
        assert_eq!(total, 64.0);
        assert_eq!(metrics.request_count("GET", "/items/{id}", 500), 22.0);
    }
}
