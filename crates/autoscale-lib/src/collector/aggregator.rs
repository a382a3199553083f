//! Metrics aggregator
//!
//! Sole consumer of the fan-in queue. Counts samples while collecting,
//! reports progress every `progress_every` samples, and after cancellation
//! performs a fixed-length drain so pollers caught mid-send are released.

use super::queue::{SampleReceiver, TryRecvError};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Bounded drain performed after cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfig {
    /// Number of drain ticks (default: 10)
    pub ticks: u32,
    /// Spacing between ticks (default: 100ms)
    pub tick: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            ticks: 10,
            tick: Duration::from_millis(100),
        }
    }
}

impl DrainConfig {
    pub fn total(&self) -> Duration {
        self.tick * self.ticks
    }
}

/// Default number of samples between progress reports
pub const DEFAULT_PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Collecting,
    Draining,
    Stopped,
}

/// Counts reported once the aggregator stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateSummary {
    /// Samples received while collecting
    pub collected: u64,
    /// Samples flushed during the drain
    pub drained: u64,
    pub progress_reports: u64,
    pub drain_ticks: u32,
}

impl AggregateSummary {
    pub fn total(&self) -> u64 {
        self.collected + self.drained
    }
}

/// True when `count` is a positive multiple of `every`
pub fn is_progress_point(count: u64, every: u64) -> bool {
    every > 0 && count > 0 && count % every == 0
}

pub struct Aggregator {
    queue: SampleReceiver,
    coordinator: Arc<ShutdownCoordinator>,
    drain: DrainConfig,
    progress_every: u64,
    state: AggregatorState,
    summary: AggregateSummary,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl Aggregator {
    pub fn new(
        queue: SampleReceiver,
        coordinator: Arc<ShutdownCoordinator>,
        drain: DrainConfig,
        progress_every: u64,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            queue,
            coordinator,
            drain,
            progress_every,
            state: AggregatorState::Collecting,
            summary: AggregateSummary::default(),
            metrics: PipelineMetrics::new(),
            logger,
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn summary(&self) -> &AggregateSummary {
        &self.summary
    }

    /// Collect until cancelled, drain, then report the summary to the coordinator
    pub async fn run(&mut self) -> AggregateSummary {
        self.collect().await;
        self.drain().await;

        self.state = AggregatorState::Stopped;
        self.coordinator.complete_drain(self.summary.clone());
        self.summary.clone()
    }

    async fn collect(&mut self) {
        let token = self.coordinator.token();

        while self.state == AggregatorState::Collecting {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.state = AggregatorState::Draining;
                }
                received = self.queue.recv() => match received {
                    Some(sample) => {
                        self.summary.collected += 1;
                        self.metrics.inc_samples_collected();

                        if is_progress_point(self.summary.collected, self.progress_every) {
                            self.summary.progress_reports += 1;
                            self.logger.log_progress(self.summary.collected, &sample);
                        }
                    }
                    None => {
                        // Every poller is gone; nothing more will arrive before cancellation
                        debug!("All pollers stopped, waiting for cancellation");
                        token.cancelled().await;
                        self.state = AggregatorState::Draining;
                    }
                },
            }
        }
    }

    async fn drain(&mut self) {
        debug!(
            ticks = self.drain.ticks,
            tick_ms = self.drain.tick.as_millis() as u64,
            "Draining metrics"
        );

        let mut ticker = interval_at(Instant::now() + self.drain.tick, self.drain.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.summary.drain_ticks < self.drain.ticks {
            ticker.tick().await;
            self.summary.drain_ticks += 1;

            // Taking a sample frees the slot for the next blocked sender, which
            // only refills it once it runs. Yield before trusting an Empty.
            let mut yielded = false;
            loop {
                match self.queue.try_recv() {
                    Ok(sample) => {
                        yielded = false;
                        self.summary.drained += 1;
                        self.metrics.inc_samples_drained();
                        debug!(container_id = %sample.container_id, "Drained sample");
                    }
                    Err(TryRecvError::Empty) if !yielded => {
                        yielded = true;
                        tokio::task::yield_now().await;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }
    }
}
