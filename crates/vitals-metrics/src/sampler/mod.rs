//! Background sampling of process resource usage.
//!
//! One [`SystemSampler`] owns the baselines for every cumulative OS counter and
//! is the only writer of the system series. Each tick runs its steps in order;
//! a failing or panicking step is logged and skipped, and the loop always
//! re-arms for the next tick.

pub mod probe;

use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use tokio::{
    runtime::Handle,
    task::{self, JoinHandle},
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vitals_common::error::Result;

use crate::metrics::SystemMetrics;

pub use probe::{MemoryUsage, ProcessProbe, ProcfsProbe, ReclaimStats};

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Last absolute readings of cumulative counters, used to turn them into deltas.
#[derive(Debug, Default)]
struct SamplerBaseline {
    cpu_seconds: f64,
    /// `None` until the first successful read.
    reclaim: Option<HashMap<String, (u64, u64)>>,
}

pub struct SystemSampler {
    metrics: Arc<SystemMetrics>,
    probe: Box<dyn ProcessProbe>,
    baseline: SamplerBaseline,
}

impl SystemSampler {
    pub fn new(metrics: Arc<SystemMetrics>, probe: Box<dyn ProcessProbe>) -> Self {
        let mut sampler = Self {
            metrics,
            probe,
            baseline: SamplerBaseline::default(),
        };

        // Reclaim counters are system-wide, so only growth after startup is attributed.
        if let Ok(stats) = sampler.probe.reclaim_stats() {
            sampler.baseline.reclaim = Some(reclaim_map(&stats));
        }

        sampler
    }

    pub fn with_procfs(metrics: Arc<SystemMetrics>) -> Self {
        Self::new(metrics, Box::new(ProcfsProbe))
    }

    /// Runs one sampling pass.
    pub fn tick(&mut self) {
        run_step("cpu", || self.sample_cpu());
        run_step("memory", || self.sample_memory());
        run_step("file_descriptors", || self.sample_fds());
        run_step("memory_reclaim", || self.sample_reclaim());
        run_step("threads", || self.sample_threads());
        run_step("uptime", || self.metrics.refresh_uptime());
    }

    /// Spawns the periodic loop on the current tokio runtime. The first tick
    /// fires immediately; the loop ends only when `shutdown` is cancelled.
    /// Ticks read procfs synchronously, so each one runs on the blocking pool.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "system metrics sampler started");

            let mut sampler = self;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let pass = task::spawn_blocking(move || {
                    sampler.tick();
                    sampler
                });
                sampler = match pass.await {
                    Ok(sampler) => sampler,
                    Err(err) => {
                        warn!(error = %err, "system metrics pass aborted, stopping sampler");
                        break;
                    }
                };
            }

            info!("system metrics sampler stopped");
        })
    }

    fn sample_cpu(&mut self) -> Result<()> {
        let current = self.probe.cpu_seconds()?;
        let delta = current - self.baseline.cpu_seconds;
        if delta.is_nan() || delta < 0.0 {
            debug!(
                current,
                baseline = self.baseline.cpu_seconds,
                "cpu time moved backwards, keeping baseline"
            );
            return Ok(());
        }

        self.metrics.add_cpu_seconds(delta)?;
        self.baseline.cpu_seconds = current;
        Ok(())
    }

    fn sample_memory(&mut self) -> Result<()> {
        let usage = self.probe.memory()?;
        self.metrics
            .set_memory(usage.resident_bytes, usage.virtual_bytes)
    }

    fn sample_fds(&mut self) -> Result<()> {
        self.metrics.set_open_fds(self.probe.open_fds()?)?;

        match self.probe.max_fds() {
            Ok(limit) => self.metrics.set_max_fds(limit),
            Err(err) => {
                debug!(error = %err, "open file limit unavailable");
                Ok(())
            }
        }
    }

    fn sample_reclaim(&mut self) -> Result<()> {
        let current = reclaim_map(&self.probe.reclaim_stats()?);

        if let Some(previous) = &self.baseline.reclaim {
            for (tier, (scanned, stolen)) in &current {
                let Some((last_scanned, last_stolen)) = previous.get(tier) else {
                    continue;
                };

                let scanned_delta = scanned.checked_sub(*last_scanned);
                let stolen_delta = stolen.checked_sub(*last_stolen);
                self.metrics.add_reclaimed_pages(
                    tier,
                    scanned_delta.unwrap_or(0),
                    stolen_delta.unwrap_or(0),
                )?;
            }
        }

        self.baseline.reclaim = Some(current);
        Ok(())
    }

    fn sample_threads(&mut self) -> Result<()> {
        if let Ok(runtime) = Handle::try_current() {
            let runtime_metrics = runtime.metrics();
            self.metrics
                .set_runtime(runtime_metrics.num_workers(), runtime_metrics.num_alive_tasks())?;
        }

        self.metrics.set_threads(self.probe.threads()?)
    }
}

fn reclaim_map(stats: &[ReclaimStats]) -> HashMap<String, (u64, u64)> {
    stats
        .iter()
        .map(|stat| (stat.tier.clone(), (stat.scanned, stat.stolen)))
        .collect()
}

fn run_step(step: &'static str, sample: impl FnOnce() -> Result<()>) {
    match panic::catch_unwind(AssertUnwindSafe(sample)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) if err.is_configuration_error() => {
            warn!(step, error = %err, "system metrics step failed");
        }
        Ok(Err(err)) => debug!(step, error = %err, "system metrics step skipped"),
        Err(_) => warn!(step, "system metrics step panicked"),
    }
}
