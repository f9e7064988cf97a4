//! Scheduler configuration

use serde::Deserialize;
use std::time::Duration;

use crate::application::SchedulerConfig as RuntimeSchedulerConfig;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between runs
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum records examined per run
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Wall-clock budget for one run, in seconds
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,

    /// Records processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 {
            return Err(ValidationError::InvalidSchedulerSetting("interval_secs"));
        }
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidSchedulerSetting("batch_size"));
        }
        if self.batch_timeout_secs == 0 {
            return Err(ValidationError::InvalidSchedulerSetting("batch_timeout_secs"));
        }
        if self.concurrency == 0 {
            return Err(ValidationError::InvalidSchedulerSetting("concurrency"));
        }
        Ok(())
    }

    pub fn to_runtime(&self) -> RuntimeSchedulerConfig {
        RuntimeSchedulerConfig::default()
            .with_interval(Duration::from_secs(self.interval_secs))
            .with_batch_size(self.batch_size)
            .with_batch_timeout(Duration::from_secs(self.batch_timeout_secs))
            .with_concurrency(self.concurrency)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval(),
            batch_size: default_batch_size(),
            batch_timeout_secs: default_batch_timeout(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    3600
}

fn default_batch_size() -> u32 {
    100
}

fn default_batch_timeout() -> u64 {
    300
}

fn default_concurrency() -> usize {
    1
}
