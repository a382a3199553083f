//! Scale watch loop
//!
//! Polls the orchestrator for the watched service's replica count. The
//! first change from the baseline shuts the pipeline down; a scale up then
//! waits out the warm-up before the loop finishes.

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::models::{ServiceScaleState, ServiceTarget};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
use crate::source::ScaleSource;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default interval between scale checks
pub const DEFAULT_SCALE_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Default wait after a scale up before finishing
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(60);

/// A detected change of the replica count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleChange {
    Up { from: u32, to: u32 },
    Down { from: u32, to: u32 },
}

impl ScaleChange {
    /// Compare an observed scale against the baseline
    pub fn classify(baseline: u32, current: u32) -> Option<Self> {
        match current.cmp(&baseline) {
            std::cmp::Ordering::Greater => Some(ScaleChange::Up {
                from: baseline,
                to: current,
            }),
            std::cmp::Ordering::Less => Some(ScaleChange::Down {
                from: baseline,
                to: current,
            }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn from(&self) -> u32 {
        match *self {
            ScaleChange::Up { from, .. } | ScaleChange::Down { from, .. } => from,
        }
    }

    pub fn to(&self) -> u32 {
        match *self {
            ScaleChange::Up { to, .. } | ScaleChange::Down { to, .. } => to,
        }
    }

    pub fn direction(&self) -> &'static str {
        match self {
            ScaleChange::Up { .. } => "up",
            ScaleChange::Down { .. } => "down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Watching,
    Triggered,
    Done,
}

/// How the watch loop finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Changed(ScaleChange),
    /// Someone else shut the pipeline down first
    Cancelled,
}

pub struct ScaleWatch {
    target: ServiceTarget,
    source: Arc<dyn ScaleSource>,
    scale: ServiceScaleState,
    check_interval: Duration,
    warmup: Duration,
    state: WatchState,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl ScaleWatch {
    pub fn new(
        target: ServiceTarget,
        source: Arc<dyn ScaleSource>,
        baseline: u32,
        check_interval: Duration,
        warmup: Duration,
        logger: StructuredLogger,
    ) -> Self {
        let metrics = PipelineMetrics::new();
        metrics.set_baseline_scale(baseline);
        metrics.set_current_scale(baseline);

        Self {
            target,
            source,
            scale: ServiceScaleState::new(baseline),
            check_interval,
            warmup,
            state: WatchState::Watching,
            metrics,
            logger,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn scale(&self) -> ServiceScaleState {
        self.scale
    }

    /// Check every interval until the scale changes or the pipeline is cancelled
    pub async fn run(&mut self, coordinator: &ShutdownCoordinator) -> AutoscaleResult<WatchOutcome> {
        let token = coordinator.token();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(WatchOutcome::Cancelled),
                _ = tokio::time::sleep(self.check_interval) => {}
            }

            let current = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(WatchOutcome::Cancelled),
                queried = self.query() => queried?,
            };

            if let Some(change) = self.observe(current) {
                self.trigger(change, coordinator).await;
                return Ok(WatchOutcome::Changed(change));
            }
        }
    }

    /// Perform a single scale check, triggering shutdown on a change
    pub async fn check_once(
        &mut self,
        coordinator: &ShutdownCoordinator,
    ) -> AutoscaleResult<Option<ScaleChange>> {
        let current = self.query().await?;
        let change = self.observe(current);
        if let Some(change) = change {
            self.trigger(change, coordinator).await;
        }
        Ok(change)
    }

    async fn query(&self) -> AutoscaleResult<u32> {
        self.source
            .current_scale(&self.target)
            .await
            .map_err(|source| AutoscaleError::ScaleQuery {
                target: self.target.to_string(),
                source,
            })
    }

    fn observe(&mut self, current: u32) -> Option<ScaleChange> {
        self.scale.current = current;
        self.metrics.set_current_scale(current);
        debug!(
            baseline = self.scale.baseline,
            current = current,
            "Checked service scale"
        );
        ScaleChange::classify(self.scale.baseline, current)
    }

    async fn trigger(&mut self, change: ScaleChange, coordinator: &ShutdownCoordinator) {
        self.state = WatchState::Triggered;
        self.logger.log_scale_change(&change);

        coordinator
            .shutdown(ShutdownReason::ScaleChanged(change))
            .await;

        if let ScaleChange::Up { .. } = change {
            self.logger.log_warmup(self.warmup);
            tokio::select! {
                biased;
                _ = coordinator.interrupted() => debug!("Warm-up cut short by interrupt"),
                _ = tokio::time::sleep(self.warmup) => {}
            }
        }

        self.state = WatchState::Done;
    }
}
