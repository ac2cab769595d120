use std::{sync::Arc, time::Duration};

use vitals_common::error::Result;

use crate::metrics::registry::{CounterMetric, GaugeMetric, HistogramMetric, MetricsRegistry};

pub const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

pub const SIZE_BUCKETS: &[f64] = &[
    64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0,
];

/// Per-request series. Request-scoped labels are `(method, endpoint)`, where
/// `endpoint` is a route template and never a literal path.
pub struct HttpMetrics {
    requests_total: Arc<CounterMetric>,
    request_duration_seconds: Arc<HistogramMetric>,
    request_size_bytes: Arc<HistogramMetric>,
    response_size_bytes: Arc<HistogramMetric>,
    requests_active: Arc<GaugeMetric>,
    exceptions_total: Arc<CounterMetric>,
}

impl HttpMetrics {
    pub fn register(registry: &MetricsRegistry) -> Result<Self> {
        Ok(Self {
            requests_total: registry.register_counter(
                "http_requests_total",
                "Total HTTP requests",
                &["method", "endpoint", "status_code"],
            )?,
            request_duration_seconds: registry.register_histogram(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "endpoint"],
                DURATION_BUCKETS,
            )?,
            request_size_bytes: registry.register_histogram(
                "http_request_size_bytes",
                "HTTP request size in bytes",
                &["method", "endpoint"],
                SIZE_BUCKETS,
            )?,
            response_size_bytes: registry.register_histogram(
                "http_response_size_bytes",
                "HTTP response size in bytes",
                &["method", "endpoint"],
                SIZE_BUCKETS,
            )?,
            requests_active: registry.register_gauge(
                "http_requests_active",
                "Number of active HTTP requests",
                &["method", "endpoint"],
            )?,
            exceptions_total: registry.register_counter(
                "http_requests_exceptions_total",
                "Total HTTP requests that resulted in exceptions",
                &["method", "endpoint", "exception_type"],
            )?,
        })
    }

    /// Records a finished request. Zero sizes mean "unknown" and are skipped.
    pub fn record_request(
        &self,
        method: &str,
        endpoint: &str,
        status: u16,
        duration: Duration,
        request_size: u64,
        response_size: u64,
    ) -> Result<()> {
        let status_value = status.to_string();
        self.requests_total
            .inc_one(&[method, endpoint, &status_value])?;
        self.request_duration_seconds
            .observe(&[method, endpoint], duration.as_secs_f64())?;

        if request_size > 0 {
            self.request_size_bytes
                .observe(&[method, endpoint], request_size as f64)?;
        }

        if response_size > 0 {
            self.response_size_bytes
                .observe(&[method, endpoint], response_size as f64)?;
        }

        Ok(())
    }

    pub fn record_exception(&self, method: &str, endpoint: &str, exception_type: &str) -> Result<()> {
        self.exceptions_total
            .inc_one(&[method, endpoint, exception_type])
    }

    pub fn start_request(&self, method: &str, endpoint: &str) -> Result<()> {
        self.requests_active.inc(&[method, endpoint])
    }

    pub fn end_request(&self, method: &str, endpoint: &str) -> Result<()> {
        self.requests_active.dec(&[method, endpoint])
    }

    pub fn active_requests(&self, method: &str, endpoint: &str) -> f64 {
        self.requests_active.get(&[method, endpoint]).unwrap_or(0.0)
    }

    pub fn request_count(&self, method: &str, endpoint: &str, status: u16) -> f64 {
        self.requests_total
            .get(&[method, endpoint, &status.to_string()])
            .unwrap_or(0.0)
    }

    pub fn exception_count(&self, method: &str, endpoint: &str, exception_type: &str) -> f64 {
        self.exceptions_total
            .get(&[method, endpoint, exception_type])
            .unwrap_or(0.0)
    }
}
