use std::time::Duration;

use vitals_common::error::{Result, VitalsError};

use crate::sampler::DEFAULT_SAMPLE_INTERVAL;

/// Startup-only settings for the metrics subsystem. Not hot-reloadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub sampler_interval: Duration,
}

impl MetricsConfig {
    pub fn new(enabled: bool, sampler_interval: Duration) -> Result<Self> {
        if sampler_interval.is_zero() {
            return Err(VitalsError::InvalidConfig(
                "sampler interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            enabled,
            sampler_interval,
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sampler_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}
