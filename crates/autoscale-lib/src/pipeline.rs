//! Pipeline orchestration
//!
//! [`Pipeline`] owns everything one monitoring run needs: the poll targets,
//! the scale source, the shutdown coordinator and health registry. `run`
//! launches the aggregator and the staggered pollers, watches the scale,
//! and turns the shutdown reason into the run's result.

use crate::collector::{
    rendezvous, AggregateSummary, Aggregator, DrainConfig, PollTarget, Poller, PollerExit,
    SpawnSchedule, DEFAULT_POLL_INTERVAL, DEFAULT_PROGRESS_EVERY,
};
use crate::error::{AutoscaleError, AutoscaleResult, SourceError};
use crate::health::{components, HealthRegistry};
use crate::models::ServiceTarget;
use crate::observability::StructuredLogger;
use crate::shutdown::{FetchFailurePolicy, ShutdownCoordinator, ShutdownReason};
use crate::source::ScaleSource;
use crate::watch::{
    ScaleChange, ScaleWatch, WatchOutcome, DEFAULT_SCALE_CHECK_INTERVAL, DEFAULT_WARMUP,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Thresholds accepted on the command line.
///
/// Nothing in the pipeline reads these; they are carried so they can be
/// reported at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub period: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            mem_percent: 80.0,
            period: Duration::from_secs(60),
        }
    }
}

/// Timing and policy for a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interval between fetches per container (default: 1 second)
    pub poll_interval: Duration,
    /// Interval between scale checks (default: 15 seconds)
    pub scale_check_interval: Duration,
    /// Wait after a scale up before finishing (default: 60 seconds)
    pub warmup: Duration,
    pub drain: DrainConfig,
    pub progress_every: u64,
    pub failure_policy: FetchFailurePolicy,
    pub thresholds: Thresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            scale_check_interval: DEFAULT_SCALE_CHECK_INTERVAL,
            warmup: DEFAULT_WARMUP,
            drain: DrainConfig::default(),
            progress_every: DEFAULT_PROGRESS_EVERY,
            failure_policy: FetchFailurePolicy::default(),
            thresholds: Thresholds::default(),
        }
    }
}

/// Successful end of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Scaled {
        change: ScaleChange,
        summary: Option<AggregateSummary>,
    },
    Interrupted {
        summary: Option<AggregateSummary>,
    },
}

pub struct Pipeline {
    target: ServiceTarget,
    baseline: u32,
    targets: Vec<PollTarget>,
    scale_source: Arc<dyn ScaleSource>,
    config: PipelineConfig,
    coordinator: Arc<ShutdownCoordinator>,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl Pipeline {
    /// Handle for requesting shutdown from outside, e.g. on Ctrl-C
    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        self.coordinator.clone()
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn targets(&self) -> &[PollTarget] {
        &self.targets
    }

    pub async fn run(self) -> AutoscaleResult<Outcome> {
        let Pipeline {
            target,
            baseline,
            targets,
            scale_source,
            config,
            coordinator,
            health,
            logger,
        } = self;

        logger.log_monitoring_started(
            baseline,
            targets.len(),
            config.thresholds.cpu_percent,
            config.thresholds.mem_percent,
            config.thresholds.period,
        );

        let (queue_tx, queue_rx) = rendezvous();

        coordinator.expect_drain();
        let mut aggregator = Aggregator::new(
            queue_rx,
            coordinator.clone(),
            config.drain,
            config.progress_every,
            logger.clone(),
        );
        let aggregator = tokio::spawn(async move { aggregator.run().await });

        let mut pollers = JoinSet::new();
        let schedule = SpawnSchedule::spread(config.poll_interval, baseline);
        let launched = schedule
            .launch(targets, &coordinator.token(), |pt| {
                let container_id = pt.target.id.clone();
                let poller = Poller::new(
                    pt.target,
                    pt.source,
                    queue_tx.clone(),
                    coordinator.clone(),
                    config.poll_interval,
                )
                .with_health(health.clone());
                pollers.spawn(async move { (container_id, poller.run().await) });
            })
            .await;
        drop(queue_tx);

        info!(pollers = launched, "All pollers launched");
        health.set_ready(true).await;

        let mut watch = ScaleWatch::new(
            target,
            scale_source,
            baseline,
            config.scale_check_interval,
            config.warmup,
            logger,
        );

        let watched = watch.run(&coordinator).await;
        if let Err(e) = &watched {
            health
                .set_unhealthy(components::SCALE_WATCH, e.to_string())
                .await;
            coordinator.signal(ShutdownReason::ScaleQueryFailed);
        }

        // Every path above has raised the cancellation signal
        let summary = aggregator.await?;
        let failures = collect_pollers(&mut pollers).await;

        match (watched?, coordinator.reason()) {
            (WatchOutcome::Changed(change), _) if !coordinator.is_interrupted() => {
                Ok(Outcome::Scaled {
                    change,
                    summary: Some(summary),
                })
            }
            (_, Some(ShutdownReason::FetchFailed { container_id })) => {
                let source = failures
                    .into_iter()
                    .find(|(id, _)| id == container_id)
                    .map(|(_, e)| e)
                    .unwrap_or_else(|| SourceError::Other("poller failed".to_string()));
                Err(AutoscaleError::Fetch {
                    container_id: container_id.clone(),
                    source,
                })
            }
            // Cancelled elsewhere, or interrupted during the warm-up
            _ => Ok(Outcome::Interrupted {
                summary: Some(summary),
            }),
        }
    }
}

/// Stop whatever pollers remain and return their fetch failures
async fn collect_pollers(
    pollers: &mut JoinSet<(String, PollerExit)>,
) -> Vec<(String, SourceError)> {
    // Pollers stuck in a fetch never look at the token again
    pollers.abort_all();

    let mut failures = Vec::new();
    while let Some(joined) = pollers.join_next().await {
        if let Ok((container_id, PollerExit::Failed(e))) = joined {
            failures.push((container_id, e));
        }
    }
    failures
}

/// Builder for creating a pipeline
pub struct PipelineBuilder {
    target: Option<ServiceTarget>,
    baseline: Option<u32>,
    targets: Vec<PollTarget>,
    scale_source: Option<Arc<dyn ScaleSource>>,
    config: PipelineConfig,
    health: Option<HealthRegistry>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            target: None,
            baseline: None,
            targets: Vec::new(),
            scale_source: None,
            config: PipelineConfig::default(),
            health: None,
        }
    }

    pub fn service(mut self, target: ServiceTarget, baseline: u32) -> Self {
        self.target = Some(target);
        self.baseline = Some(baseline);
        self
    }

    pub fn poll_targets(mut self, targets: Vec<PollTarget>) -> Self {
        self.targets = targets;
        self
    }

    pub fn scale_source(mut self, source: Arc<dyn ScaleSource>) -> Self {
        self.scale_source = Some(source);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> anyhow::Result<Pipeline> {
        let target = self
            .target
            .ok_or_else(|| anyhow::anyhow!("Service target is required"))?;
        let baseline = self
            .baseline
            .ok_or_else(|| anyhow::anyhow!("Baseline scale is required"))?;
        let scale_source = self
            .scale_source
            .ok_or_else(|| anyhow::anyhow!("Scale source is required"))?;

        // Exactly one poller per container
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.targets.len());
        for pt in self.targets {
            if seen.insert(pt.target.id.clone()) {
                targets.push(pt);
            } else {
                warn!(container_id = %pt.target.id, "Dropping duplicate poll target");
            }
        }

        let logger = StructuredLogger::new(target.to_string());
        let coordinator = Arc::new(ShutdownCoordinator::new(
            self.config.failure_policy,
            logger.clone(),
        ));

        Ok(Pipeline {
            target,
            baseline,
            targets,
            scale_source,
            config: self.config,
            coordinator,
            health: self.health.unwrap_or_default(),
            logger,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
