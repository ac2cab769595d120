pub mod config;
pub mod handlers;
pub mod instrument;
pub mod metrics;
pub mod middleware;
pub mod router;
pub mod sampler;

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vitals_common::error::Result;

use crate::{
    instrument::RequestInstrumentor,
    metrics::{HttpMetrics, MetricsRegistry, SystemMetrics},
    sampler::SystemSampler,
};

pub use config::MetricsConfig;

/// The process-wide metrics state: one registry plus the collectors that
/// write into it. Built once at startup and shared by handle.
pub struct Telemetry {
    registry: Arc<MetricsRegistry>,
    http_metrics: Arc<HttpMetrics>,
    system_metrics: Arc<SystemMetrics>,
    instrumentor: RequestInstrumentor,
}

impl Telemetry {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(MetricsRegistry::new());
        let http_metrics = Arc::new(HttpMetrics::register(registry.as_ref())?);
        let system_metrics = Arc::new(SystemMetrics::register(registry.as_ref())?);
        let instrumentor = RequestInstrumentor::new(Arc::clone(&http_metrics));

        Ok(Self {
            registry,
            http_metrics,
            system_metrics,
            instrumentor,
        })
    }

    /// Builds telemetry only when the subsystem is enabled.
    pub fn from_config(config: &MetricsConfig) -> Result<Option<Arc<Self>>> {
        if !config.enabled {
            return Ok(None);
        }
        Ok(Some(Arc::new(Self::new()?)))
    }

    pub fn registry(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn http_metrics(&self) -> Arc<HttpMetrics> {
        Arc::clone(&self.http_metrics)
    }

    pub fn system_metrics(&self) -> Arc<SystemMetrics> {
        Arc::clone(&self.system_metrics)
    }

    pub fn instrumentor(&self) -> RequestInstrumentor {
        self.instrumentor.clone()
    }

    pub fn render(&self) -> String {
        self.registry.render_prometheus()
    }

    pub fn spawn_sampler(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        SystemSampler::with_procfs(self.system_metrics()).spawn(interval, shutdown)
    }
}
