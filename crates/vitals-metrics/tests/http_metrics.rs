//! Router-level tests: scrape endpoint, route-template labels and the
//! disabled configuration, driven through `tower::ServiceExt::oneshot`.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    routing::{get, post},
};
use http_body_util::BodyExt;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use vitals_metrics::{
    MetricsConfig, Telemetry,
    metrics::{MetricValue, exposition::CONTENT_TYPE},
    router::{health_router, with_metrics},
};

async fn get_user() -> String {
    tokio::time::sleep(Duration::from_millis(12)).await;
    "x".repeat(340)
}

async fn create_user() -> StatusCode {
    panic!("user store offline");
}

async fn upload(body: String) -> String {
    body.len().to_string()
}

fn app(telemetry: Option<Arc<Telemetry>>) -> Router {
    let routes = Router::new()
        .route("/users/{id}", get(get_user))
        .route("/users/", post(create_user))
        .route("/uploads", post(upload))
        .merge(health_router())
        .fallback(|| async { StatusCode::NOT_FOUND });

    with_metrics(routes, telemetry).layer(CatchPanicLayer::new())
}

async fn send(router: &Router, method: &str, uri: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn scrape_returns_prometheus_text() {
    let telemetry = Arc::new(Telemetry::new().unwrap());
    let router = app(Some(Arc::clone(&telemetry)));

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        CONTENT_TYPE
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("# TYPE http_requests_total counter\n"));
    assert!(body.contains("# TYPE http_request_duration_seconds histogram\n"));
    assert!(body.contains("# TYPE process_start_time_seconds gauge\n"));
}

#[tokio::test]
async fn requests_are_labelled_by_route_template() {
    let telemetry = Arc::new(Telemetry::new().unwrap());
    let router = app(Some(Arc::clone(&telemetry)));

    for id in ["1", "2", "42"] {
        let (status, body) = send(&router, "GET", &format!("/users/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.len(), 340);
    }

    let http = telemetry.http_metrics();
    assert_eq!(http.request_count("GET", "/users/{id}", 200), 3.0);
    assert_eq!(http.active_requests("GET", "/users/{id}"), 0.0);

    let snapshot = telemetry.registry().snapshot();
    let response_sizes = snapshot
        .iter()
        .find(|metric| metric.descriptor.name == "http_response_size_bytes")
        .unwrap();
    match &response_sizes.sample(&["GET", "/users/{id}"]).unwrap().value {
        MetricValue::Histogram { count, sum, .. } => {
            assert_eq!(*count, 3);
            assert_eq!(*sum, 1020.0);
        }
        other => panic!("unexpected value {other:?}"),
    }

    let (_, scrape) = send(&router, "GET", "/metrics").await;
    assert!(scrape.contains(
        "http_requests_total{method=\"GET\",endpoint=\"/users/{id}\",status_code=\"200\"} 3\n"
    ));
    assert!(!scrape.contains("endpoint=\"/users/42\""));
}

#[tokio::test]
async fn declared_request_size_is_observed() {
    let telemetry = Arc::new(Telemetry::new().unwrap());
    let router = app(Some(Arc::clone(&telemetry)));

    let request = Request::builder()
        .method("POST")
        .uri("/uploads")
        .header(header::CONTENT_LENGTH, "300")
        .body(Body::from("a".repeat(300)))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let snapshot = telemetry.registry().snapshot();
    let request_sizes = snapshot
        .iter()
        .find(|metric| metric.descriptor.name == "http_request_size_bytes")
        .unwrap();
    match &request_sizes.sample(&["POST", "/uploads"]).unwrap().value {
        MetricValue::Histogram { buckets, count, sum } => {
            assert_eq!(*count, 1);
            assert_eq!(*sum, 300.0);
            for (bound, cumulative) in buckets {
                assert_eq!(*cumulative, u64::from(*bound >= 1024.0), "bucket le={bound}");
            }
        }
        other => panic!("unexpected value {other:?}"),
    }

    let (_, scrape) = send(&router, "GET", "/metrics").await;
    assert!(scrape.contains(
        "http_request_size_bytes_sum{method=\"POST\",endpoint=\"/uploads\"} 300\n"
    ));
}

#[tokio::test]
async fn unmatched_requests_use_unknown_endpoint() {
    let telemetry = Arc::new(Telemetry::new().unwrap());
    let router = app(Some(Arc::clone(&telemetry)));

    let (status, _) = send(&router, "GET", "/nowhere/at/all").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let http = telemetry.http_metrics();
    assert_eq!(http.request_count("GET", "unknown", 404), 1.0);
    assert_eq!(http.request_count("GET", "/nowhere/at/all", 404), 0.0);
}

#[tokio::test]
async fn panicking_handler_is_counted_and_still_answered() {
    let telemetry = Arc::new(Telemetry::new().unwrap());
    let router = app(Some(Arc::clone(&telemetry)));

    let (status, _) = send(&router, "POST", "/users/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let http = telemetry.http_metrics();
    assert_eq!(http.exception_count("POST", "/users/", "panic"), 1.0);
    assert_eq!(http.request_count("POST", "/users/", 500), 1.0);
    assert_eq!(http.active_requests("POST", "/users/"), 0.0);
}

#[tokio::test]
async fn disabled_metrics_leave_router_untouched() {
    let telemetry = Telemetry::from_config(&MetricsConfig::disabled()).unwrap();
    assert!(telemetry.is_none());

    let router = app(telemetry);
    let (status, _) = send(&router, "GET", "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&router, "GET", "/users/7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), 340);
}

#[tokio::test]
async fn health_reports_version() {
    let router = app(None);
    let (status, body) = send(&router, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
