//! Observability infrastructure for the pipeline
//!
//! Provides:
//! - Prometheus metrics (samples, fetch latency and errors, active pollers, scale)
//! - Structured logging of lifecycle events with tracing

use crate::collector::AggregateSummary;
use crate::models::MetricSample;
use crate::shutdown::{FetchFailurePolicy, ShutdownReason};
use crate::watch::ScaleChange;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, register_int_gauge_vec,
    Encoder, Histogram, IntCounter, IntGauge, IntGaugeVec, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for cAdvisor fetch latency (in seconds)
const FETCH_LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    samples_collected: IntCounter,
    samples_drained: IntCounter,
    fetch_errors: IntCounter,
    fetch_latency_seconds: Histogram,
    pollers_active: IntGauge,
    service_scale: IntGaugeVec,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            samples_collected: register_int_counter!(
                "autoscale_samples_collected_total",
                "Metric samples received by the aggregator while collecting"
            )
            .expect("Failed to register samples_collected"),

            samples_drained: register_int_counter!(
                "autoscale_samples_drained_total",
                "Metric samples flushed from the queue during the shutdown drain"
            )
            .expect("Failed to register samples_drained"),

            fetch_errors: register_int_counter!(
                "autoscale_fetch_errors_total",
                "Failed cAdvisor container stats fetches"
            )
            .expect("Failed to register fetch_errors"),

            fetch_latency_seconds: register_histogram!(
                "autoscale_fetch_latency_seconds",
                "Time spent fetching container stats from cAdvisor",
                FETCH_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register fetch_latency_seconds"),

            pollers_active: register_int_gauge!(
                "autoscale_pollers_active",
                "Number of per-container pollers currently running"
            )
            .expect("Failed to register pollers_active"),

            service_scale: register_int_gauge_vec!(
                "autoscale_service_scale",
                "Replica count of the watched service",
                &["kind"]
            )
            .expect("Failed to register service_scale"),
        }
    }
}

/// Lightweight handle to the global pipeline metrics
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    inner: &'static PipelineMetricsInner,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (registers global metrics on first call)
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new),
        }
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn inc_samples_collected(&self) {
        self.inner.samples_collected.inc();
    }

    pub fn inc_samples_drained(&self) {
        self.inner.samples_drained.inc();
    }

    pub fn inc_fetch_errors(&self) {
        self.inner.fetch_errors.inc();
    }

    pub fn observe_fetch_latency(&self, duration: Duration) {
        self.inner
            .fetch_latency_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn poller_started(&self) {
        self.inner.pollers_active.inc();
    }

    pub fn poller_stopped(&self) {
        self.inner.pollers_active.dec();
    }

    pub fn set_baseline_scale(&self, scale: u32) {
        self.inner
            .service_scale
            .with_label_values(&["baseline"])
            .set(i64::from(scale));
    }

    pub fn set_current_scale(&self, scale: u32) {
        self.inner
            .service_scale
            .with_label_values(&["current"])
            .set(i64::from(scale));
    }
}

/// Structured logger for pipeline lifecycle events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Log the start of monitoring. Thresholds are reported, not acted on.
    pub fn log_monitoring_started(
        &self,
        baseline: u32,
        pollers: usize,
        cpu_threshold: f64,
        mem_threshold: f64,
        period: Duration,
    ) {
        info!(
            event = "monitoring_started",
            service = %self.service,
            baseline_scale = baseline,
            pollers = pollers,
            cpu_threshold_percent = cpu_threshold,
            mem_threshold_percent = mem_threshold,
            period_secs = period.as_secs(),
            "Monitoring service"
        );
    }

    pub fn log_progress(&self, total: u64, sample: &MetricSample) {
        let latest = sample.stats.latest();
        info!(
            event = "metrics_progress",
            service = %self.service,
            collected = total,
            container_id = %sample.container_id,
            window_start = %sample.window_start,
            window_end = %sample.window_end,
            stats_entries = sample.stats.stats.len(),
            cpu_total_ns = latest.map(|s| s.cpu.usage.total),
            memory_usage_bytes = latest.map(|s| s.memory.usage),
            "Collected {} container metrics",
            total
        );
    }

    pub fn log_scale_change(&self, change: &ScaleChange) {
        info!(
            event = "scale_change_detected",
            service = %self.service,
            direction = change.direction(),
            from = change.from(),
            to = change.to(),
            "Detected scale {}: {} -> {}",
            change.direction(),
            change.from(),
            change.to()
        );
    }

    pub fn log_warmup(&self, warmup: Duration) {
        info!(
            event = "warmup",
            service = %self.service,
            warmup_secs = warmup.as_secs_f64(),
            "Waiting {:?} for container to warm up",
            warmup
        );
    }

    pub fn log_shutdown(&self, reason: &ShutdownReason) {
        info!(
            event = "shutdown",
            service = %self.service,
            reason = %reason,
            "Stopping metrics collection"
        );
    }

    pub fn log_drain_complete(&self, summary: &AggregateSummary) {
        info!(
            event = "drain_complete",
            service = %self.service,
            collected = summary.collected,
            drained = summary.drained,
            progress_reports = summary.progress_reports,
            drain_ticks = summary.drain_ticks,
            "Stopped processing all metrics"
        );
    }

    pub fn log_fetch_failure(&self, container_id: &str, error: &str, policy: FetchFailurePolicy) {
        match policy {
            FetchFailurePolicy::Fatal => error!(
                event = "fetch_failed",
                service = %self.service,
                container_id = %container_id,
                error = %error,
                policy = "fatal",
                "Metrics fetch failed, shutting down pipeline"
            ),
            FetchFailurePolicy::Isolate => warn!(
                event = "fetch_failed",
                service = %self.service,
                container_id = %container_id,
                error = %error,
                policy = "isolate",
                "Metrics fetch failed, stopping poller for this container only"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_metrics_handles_share_registry() {
        let a = PipelineMetrics::new();
        let b = PipelineMetrics::new();

        a.set_baseline_scale(2);
        b.set_current_scale(3);
        a.observe_fetch_latency(Duration::from_millis(12));
        b.inc_fetch_errors();

        assert!(std::ptr::eq(a.inner, b.inner));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("web/frontend");
        assert_eq!(logger.service(), "web/frontend");
    }
}
