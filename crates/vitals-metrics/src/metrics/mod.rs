pub mod collectors;
pub mod exposition;
pub mod registry;
pub mod types;

pub use collectors::{http::HttpMetrics, system::SystemMetrics};
pub use registry::{
    CounterMetric, GaugeMetric, HistogramMetric, InfoMetric, MetricHandle, MetricsRegistry,
};
pub use types::{CollectedMetric, MetricDescriptor, MetricSample, MetricType, MetricValue};
