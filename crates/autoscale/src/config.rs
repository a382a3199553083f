//! Runtime settings
//!
//! Timing and endpoint settings that are not exposed as flags, read from
//! `AUTOSCALE_*` environment variables.

use anyhow::{Context, Result};
use autoscale_lib::collector::DrainConfig;
use autoscale_lib::pipeline::{PipelineConfig, Thresholds};
use autoscale_lib::source::{DEFAULT_CADVISOR_PORT, DEFAULT_METADATA_URL};
use autoscale_lib::FetchFailurePolicy;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Rancher metadata API base URL
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,

    /// Port of the cAdvisor agent on every host
    #[serde(default = "default_cadvisor_port")]
    pub cadvisor_port: u16,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_scale_check_interval_secs")]
    pub scale_check_interval_secs: u64,

    #[serde(default = "default_drain_ticks")]
    pub drain_ticks: u32,

    #[serde(default = "default_drain_tick_ms")]
    pub drain_tick_ms: u64,

    /// Samples between progress reports
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,

    /// Timeout for metadata requests; cAdvisor fetches have none
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_metadata_url() -> String {
    DEFAULT_METADATA_URL.to_string()
}

fn default_cadvisor_port() -> u16 {
    DEFAULT_CADVISOR_PORT
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_scale_check_interval_secs() -> u64 {
    15
}

fn default_drain_ticks() -> u32 {
    10
}

fn default_drain_tick_ms() -> u64 {
    100
}

fn default_progress_every() -> u64 {
    100
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Settings {
    /// Load settings from `AUTOSCALE_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix("AUTOSCALE"))
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read AUTOSCALE_* settings")?;

        config
            .try_deserialize()
            .context("Invalid AUTOSCALE_* settings")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Pipeline configuration from these settings and the command flags
    pub fn pipeline_config(
        &self,
        failure_policy: FetchFailurePolicy,
        thresholds: Thresholds,
        warmup: Duration,
    ) -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            scale_check_interval: Duration::from_secs(self.scale_check_interval_secs),
            warmup,
            drain: DrainConfig {
                ticks: self.drain_ticks,
                tick: Duration::from_millis(self.drain_tick_ms),
            },
            progress_every: self.progress_every,
            failure_policy,
            thresholds,
        }
    }
}
