//! Per-container poller
//!
//! Each poller owns one [`ContainerTarget`] and repeatedly fetches the stats
//! recorded since its previous fetch, so consecutive sample windows are
//! contiguous.

use super::queue::SampleSender;
use crate::error::SourceError;
use crate::health::{components, HealthRegistry};
use crate::models::{ContainerTarget, MetricSample};
use crate::observability::PipelineMetrics;
use crate::shutdown::{FailureAction, ShutdownCoordinator};
use crate::source::MetricsSource;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default interval between fetches for one container
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Why a poller stopped
#[derive(Debug)]
pub enum PollerExit {
    Cancelled,
    /// The aggregator stopped receiving
    QueueClosed,
    Failed(SourceError),
}

pub struct Poller {
    target: ContainerTarget,
    source: Arc<dyn MetricsSource>,
    queue: SampleSender,
    coordinator: Arc<ShutdownCoordinator>,
    interval: Duration,
    metrics: PipelineMetrics,
    health: Option<HealthRegistry>,
}

impl Poller {
    pub fn new(
        target: ContainerTarget,
        source: Arc<dyn MetricsSource>,
        queue: SampleSender,
        coordinator: Arc<ShutdownCoordinator>,
        interval: Duration,
    ) -> Self {
        Self {
            target,
            source,
            queue,
            coordinator,
            interval,
            metrics: PipelineMetrics::new(),
            health: None,
        }
    }

    /// Report fetch failures to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn target(&self) -> &ContainerTarget {
        &self.target
    }

    /// Poll until cancelled, the queue closes, or a fetch fails
    pub async fn run(mut self) -> PollerExit {
        self.metrics.poller_started();
        debug!(
            container_id = %self.target.id,
            host = %self.target.host_address,
            "Started collecting metrics"
        );

        let exit = self.poll_loop().await;

        self.metrics.poller_stopped();
        info!(
            container_id = %self.target.id,
            exit = ?exit,
            "Stopped collecting metrics for container"
        );
        exit
    }

    async fn poll_loop(&mut self) -> PollerExit {
        let token = self.coordinator.token();

        loop {
            if token.is_cancelled() {
                return PollerExit::Cancelled;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return PollerExit::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let sample = match self.poll_once().await {
                Ok(sample) => sample,
                // A fetch cut off by shutdown is not a failure of this container
                Err(_) if token.is_cancelled() => return PollerExit::Cancelled,
                Err(e) => {
                    self.metrics.inc_fetch_errors();
                    let action = self.coordinator.report_fetch_failure(&self.target.id, &e);
                    self.report_health(action, &e).await;
                    return PollerExit::Failed(e);
                }
            };

            // Cancelled while fetching: emit nothing further
            if token.is_cancelled() {
                return PollerExit::Cancelled;
            }

            if self.queue.send(sample).await.is_err() {
                return PollerExit::QueueClosed;
            }
        }
    }

    async fn report_health(&self, action: FailureAction, error: &SourceError) {
        let Some(health) = &self.health else {
            return;
        };
        let message = format!("container {}: {}", self.target.id, error);
        match action {
            FailureAction::ShutdownPipeline => {
                health.set_unhealthy(components::POLLERS, message).await
            }
            FailureAction::StopPoller => health.set_degraded(components::POLLERS, message).await,
        }
    }

    /// Fetch one sample covering the time since the previous fetch
    pub async fn poll_once(&mut self) -> Result<MetricSample, SourceError> {
        let window_start = self.target.last_fetch;
        let issued_at = Utc::now();

        let started = Instant::now();
        let stats = self
            .source
            .container_stats(&self.target.id, window_start)
            .await?;
        self.metrics.observe_fetch_latency(started.elapsed());

        let window_end = self.target.advance(issued_at);

        Ok(MetricSample {
            container_id: self.target.id.clone(),
            window_start,
            window_end,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::queue::rendezvous;
    use crate::health::ComponentStatus;
    use crate::models::ContainerStats;
    use crate::observability::StructuredLogger;
    use crate::shutdown::{FetchFailurePolicy, ShutdownReason};
    use crate::source::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Records the window start of every request
    struct RecordingSource {
        starts: Mutex<Vec<DateTime<Utc>>>,
    }

    #[async_trait]
    impl MetricsSource for RecordingSource {
        async fn container_stats(
            &self,
            container_id: &str,
            start: DateTime<Utc>,
        ) -> Result<ContainerStats, SourceError> {
            self.starts.lock().unwrap().push(start);
            Ok(ContainerStats {
                id: container_id.to_string(),
                ..Default::default()
            })
        }

        async fn list_containers(&self) -> Result<Vec<ContainerStats>, SourceError> {
            Ok(vec![])
        }
    }

    /// Holds every fetch until the pipeline shuts down, then fails it
    struct HangingSource {
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl MetricsSource for HangingSource {
        async fn container_stats(
            &self,
            _container_id: &str,
            _start: DateTime<Utc>,
        ) -> Result<ContainerStats, SourceError> {
            self.shutdown.cancelled().await;
            Err(SourceError::Other("connection reset".to_string()))
        }

        async fn list_containers(&self) -> Result<Vec<ContainerStats>, SourceError> {
            Ok(vec![])
        }
    }

    fn coordinator() -> Arc<ShutdownCoordinator> {
        Arc::new(ShutdownCoordinator::new(
            FetchFailurePolicy::Fatal,
            StructuredLogger::new("web/frontend"),
        ))
    }

    #[tokio::test]
    async fn test_consecutive_windows_are_contiguous() {
        let source = Arc::new(RecordingSource {
            starts: Mutex::new(Vec::new()),
        });
        let (tx, _rx) = rendezvous();
        let target = ContainerTarget::new("abc", "web-frontend-1", "10.0.0.1");
        let initial = target.last_fetch;

        let mut poller = Poller::new(
            target,
            source.clone(),
            tx,
            coordinator(),
            DEFAULT_POLL_INTERVAL,
        );

        let mut samples = Vec::new();
        for _ in 0..5 {
            samples.push(poller.poll_once().await.unwrap());
        }

        assert_eq!(samples[0].window_start, initial);
        for pair in samples.windows(2) {
            assert_eq!(pair[0].window_end, pair[1].window_start);
        }
        for sample in &samples {
            assert!(sample.window_start <= sample.window_end);
        }

        // Each request asked for exactly the previous window end
        let starts = source.starts.lock().unwrap().clone();
        let expected: Vec<_> = samples.iter().map(|s| s.window_start).collect();
        assert_eq!(starts, expected);
        assert_eq!(poller.target().last_fetch, samples[4].window_end);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_poller_exits_within_one_interval() {
        let source = Arc::new(RecordingSource {
            starts: Mutex::new(Vec::new()),
        });
        let (tx, _rx) = rendezvous();
        let coordinator = coordinator();

        let poller = Poller::new(
            ContainerTarget::new("abc", "web-frontend-1", "10.0.0.1"),
            source.clone(),
            tx,
            coordinator.clone(),
            DEFAULT_POLL_INTERVAL,
        );
        let handle = tokio::spawn(poller.run());

        tokio::time::sleep(Duration::from_millis(300)).await;
        coordinator.signal(ShutdownReason::Interrupted);

        let exit = tokio::time::timeout(DEFAULT_POLL_INTERVAL, handle)
            .await
            .expect("poller did not observe cancellation")
            .unwrap();
        assert!(matches!(exit, PollerExit::Cancelled));
        assert!(source.starts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failing_after_shutdown_is_not_reported() {
        let coordinator = coordinator();
        let health = HealthRegistry::for_pipeline().await;
        let source = Arc::new(HangingSource {
            shutdown: coordinator.token(),
        });
        let (tx, _rx) = rendezvous();

        let poller = Poller::new(
            ContainerTarget::new("abc", "web-frontend-1", "10.0.0.1"),
            source,
            tx,
            coordinator.clone(),
            DEFAULT_POLL_INTERVAL,
        )
        .with_health(health.clone());
        let handle = tokio::spawn(poller.run());

        // The first fetch is in flight when the interrupt lands
        tokio::time::sleep(Duration::from_millis(1500)).await;
        coordinator.signal(ShutdownReason::Interrupted);

        let exit = handle.await.unwrap();
        assert!(matches!(exit, PollerExit::Cancelled));
        assert_eq!(coordinator.reason(), Some(&ShutdownReason::Interrupted));
        assert_eq!(coordinator.isolated_failures(), 0);

        let report = health.health().await;
        assert_eq!(
            report.components[components::POLLERS].status,
            ComponentStatus::Healthy
        );
    }
}
