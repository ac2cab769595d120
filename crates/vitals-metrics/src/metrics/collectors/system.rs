use std::{
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use vitals_common::error::Result;

use crate::metrics::registry::{CounterMetric, GaugeMetric, InfoMetric, MetricsRegistry};

/// Process and runtime health series written by the background sampler.
pub struct SystemMetrics {
    start_time: Instant,
    cpu_seconds_total: Arc<CounterMetric>,
    resident_memory_bytes: Arc<GaugeMetric>,
    virtual_memory_bytes: Arc<GaugeMetric>,
    start_time_seconds: Arc<GaugeMetric>,
    uptime_seconds: Arc<GaugeMetric>,
    open_fds: Arc<GaugeMetric>,
    max_fds: Arc<GaugeMetric>,
    reclaim_scanned_pages_total: Arc<CounterMetric>,
    reclaim_stolen_pages_total: Arc<CounterMetric>,
    threads: Arc<GaugeMetric>,
    runtime_workers: Arc<GaugeMetric>,
    runtime_alive_tasks: Arc<GaugeMetric>,
    build_info: Arc<InfoMetric>,
}

impl SystemMetrics {
    pub fn register(registry: &MetricsRegistry) -> Result<Self> {
        let metrics = Self {
            start_time: Instant::now(),
            cpu_seconds_total: registry.register_counter(
                "process_cpu_seconds_total",
                "Total user and system CPU time consumed by the process in seconds",
                &[],
            )?,
            resident_memory_bytes: registry.register_gauge(
                "process_resident_memory_bytes",
                "Resident memory size of the process in bytes",
                &[],
            )?,
            virtual_memory_bytes: registry.register_gauge(
                "process_virtual_memory_bytes",
                "Virtual memory size of the process in bytes",
                &[],
            )?,
            start_time_seconds: registry.register_gauge(
                "process_start_time_seconds",
                "Start time of the process since unix epoch in seconds",
                &[],
            )?,
            uptime_seconds: registry.register_gauge(
                "process_uptime_seconds",
                "Process uptime in seconds",
                &[],
            )?,
            open_fds: registry.register_gauge(
                "process_open_fds",
                "Number of open file descriptors",
                &[],
            )?,
            max_fds: registry.register_gauge(
                "process_max_fds",
                "Soft limit on open file descriptors",
                &[],
            )?,
            reclaim_scanned_pages_total: registry.register_counter(
                "memory_reclaim_scanned_pages_total",
                "Pages scanned by the kernel page reclaimer",
                &["tier"],
            )?,
            reclaim_stolen_pages_total: registry.register_counter(
                "memory_reclaim_stolen_pages_total",
                "Pages reclaimed by the kernel page reclaimer",
                &["tier"],
            )?,
            threads: registry.register_gauge(
                "process_threads",
                "Number of OS threads in the process",
                &[],
            )?,
            runtime_workers: registry.register_gauge(
                "tokio_workers",
                "Number of async runtime worker threads",
                &[],
            )?,
            runtime_alive_tasks: registry.register_gauge(
                "tokio_alive_tasks",
                "Number of alive async runtime tasks",
                &[],
            )?,
            build_info: registry.register_info("vitals_build_info", "Build and platform information")?,
        };

        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or_default();
        metrics.start_time_seconds.set(&[], started_at)?;
        metrics.build_info.set(&[
            ("version", env!("CARGO_PKG_VERSION")),
            ("os", std::env::consts::OS),
            ("arch", std::env::consts::ARCH),
            ("family", std::env::consts::FAMILY),
        ])?;

        Ok(metrics)
    }

    pub fn add_cpu_seconds(&self, delta: f64) -> Result<()> {
        self.cpu_seconds_total.inc(&[], delta)
    }

    pub fn cpu_seconds(&self) -> f64 {
        self.cpu_seconds_total.get(&[]).unwrap_or(0.0)
    }

    pub fn set_memory(&self, resident_bytes: u64, virtual_bytes: u64) -> Result<()> {
        self.resident_memory_bytes.set(&[], resident_bytes as f64)?;
        self.virtual_memory_bytes.set(&[], virtual_bytes as f64)
    }

    pub fn set_open_fds(&self, count: u64) -> Result<()> {
        self.open_fds.set(&[], count as f64)
    }

    pub fn set_max_fds(&self, limit: u64) -> Result<()> {
        self.max_fds.set(&[], limit as f64)
    }

    pub fn add_reclaimed_pages(&self, tier: &str, scanned: u64, stolen: u64) -> Result<()> {
        self.reclaim_scanned_pages_total.inc(&[tier], scanned as f64)?;
        self.reclaim_stolen_pages_total.inc(&[tier], stolen as f64)
    }

    /// `(scanned, stolen)` pages accumulated for a reclaim tier.
    pub fn reclaimed_pages(&self, tier: &str) -> (f64, f64) {
        (
            self.reclaim_scanned_pages_total.get(&[tier]).unwrap_or(0.0),
            self.reclaim_stolen_pages_total.get(&[tier]).unwrap_or(0.0),
        )
    }

    pub fn set_threads(&self, count: u64) -> Result<()> {
        self.threads.set(&[], count as f64)
    }

    pub fn set_runtime(&self, workers: usize, alive_tasks: usize) -> Result<()> {
        self.runtime_workers.set(&[], workers as f64)?;
        self.runtime_alive_tasks.set(&[], alive_tasks as f64)
    }

    pub fn refresh_uptime(&self) -> Result<()> {
        self.uptime_seconds
            .set(&[], self.start_time.elapsed().as_secs_f64())
    }

    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        let gauge = match name {
            "process_resident_memory_bytes" => &self.resident_memory_bytes,
            "process_virtual_memory_bytes" => &self.virtual_memory_bytes,
            "process_start_time_seconds" => &self.start_time_seconds,
            "process_uptime_seconds" => &self.uptime_seconds,
            "process_open_fds" => &self.open_fds,
            "process_max_fds" => &self.max_fds,
            "process_threads" => &self.threads,
            "tokio_workers" => &self.runtime_workers,
            "tokio_alive_tasks" => &self.runtime_alive_tasks,
            _ => return None,
        };
        gauge.get(&[])
    }
}
