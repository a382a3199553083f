//! Integration tests for metrics collection
//!
//! These tests wire pollers, the rendezvous queue and the aggregator
//! together against in-memory metrics and scale sources, with tokio's clock
//! paused so the poll and drain intervals run instantly.

#[cfg(test)]
mod fan_in_tests {
    use crate::collector::{rendezvous, Aggregator, DrainConfig, DEFAULT_PROGRESS_EVERY};
    use crate::models::{ContainerStats, MetricSample};
    use crate::observability::StructuredLogger;
    use crate::shutdown::{FetchFailurePolicy, ShutdownCoordinator, ShutdownReason};
    use chrono::Utc;
    use std::sync::Arc;

    fn sample(id: &str) -> MetricSample {
        let now = Utc::now();
        MetricSample {
            container_id: id.to_string(),
            window_start: now,
            window_end: now,
            stats: ContainerStats::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_sent_sample_is_counted_once() {
        const SENDERS: u64 = 5;
        const PER_SENDER: u64 = 60;

        let coordinator = Arc::new(ShutdownCoordinator::new(
            FetchFailurePolicy::Fatal,
            StructuredLogger::new("web/frontend"),
        ));
        coordinator.expect_drain();

        let (tx, rx) = rendezvous();
        let mut aggregator = Aggregator::new(
            rx,
            coordinator.clone(),
            DrainConfig::default(),
            DEFAULT_PROGRESS_EVERY,
            StructuredLogger::new("web/frontend"),
        );
        let aggregator = tokio::spawn(async move { aggregator.run().await });

        let senders: Vec<_> = (0..SENDERS)
            .map(|n| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let id = format!("container-{}", n);
                    for _ in 0..PER_SENDER {
                        tx.send(sample(&id)).await.unwrap();
                    }
                })
            })
            .collect();
        drop(tx);

        for sender in senders {
            sender.await.unwrap();
        }

        // A completed send means the sample was received
        let summary = coordinator
            .shutdown(ShutdownReason::Interrupted)
            .await
            .expect("drain summary");
        assert_eq!(aggregator.await.unwrap(), summary);

        assert_eq!(summary.total(), SENDERS * PER_SENDER);
        assert_eq!(summary.collected, SENDERS * PER_SENDER);
        assert_eq!(summary.drained, 0);
        assert_eq!(summary.progress_reports, SENDERS * PER_SENDER / 100);
        assert_eq!(summary.drain_ticks, 10);
    }
}

#[cfg(test)]
mod pipeline_tests {
    use crate::collector::PollTarget;
    use crate::error::{AutoscaleError, SourceError};
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::{ContainerStats, ContainerTarget, ServiceTarget};
    use crate::pipeline::{Outcome, Pipeline, PipelineBuilder, PipelineConfig};
    use crate::shutdown::{FetchFailurePolicy, ShutdownReason};
    use crate::source::{async_trait, MetricsSource, ScaleSource};
    use crate::watch::ScaleChange;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Counts fetches and fails the nth one, if asked to
    struct CountingSource {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    impl CountingSource {
        fn new(fail_on: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_on,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetricsSource for CountingSource {
        async fn container_stats(
            &self,
            container_id: &str,
            _start: DateTime<Utc>,
        ) -> Result<ContainerStats, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(call) {
                return Err(SourceError::Other("agent unreachable".to_string()));
            }
            Ok(ContainerStats {
                id: container_id.to_string(),
                ..Default::default()
            })
        }

        async fn list_containers(&self) -> Result<Vec<ContainerStats>, SourceError> {
            Ok(vec![])
        }
    }

    /// Reports `baseline` until `change_after` checks have passed, then `changed`
    struct StepScale {
        baseline: u32,
        changed: u32,
        change_after: usize,
        calls: AtomicUsize,
    }

    impl StepScale {
        fn new(baseline: u32, changed: u32, change_after: usize) -> Arc<Self> {
            Arc::new(Self {
                baseline,
                changed,
                change_after,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ScaleSource for StepScale {
        async fn current_scale(&self, _target: &ServiceTarget) -> Result<u32, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call > self.change_after {
                Ok(self.changed)
            } else {
                Ok(self.baseline)
            }
        }
    }

    const IDS: [&str; 3] = ["aaa", "bbb", "ccc"];

    fn pipeline(
        sources: &[Arc<CountingSource>],
        scale: Arc<StepScale>,
        policy: FetchFailurePolicy,
        health: HealthRegistry,
    ) -> Pipeline {
        let targets = IDS
            .iter()
            .zip(sources)
            .map(|(id, source)| {
                let target = ContainerTarget::new(*id, format!("web-frontend-{}", id), "10.0.0.1");
                PollTarget::new(target, source.clone())
            })
            .collect();

        PipelineBuilder::new()
            .service(ServiceTarget::parse("web/frontend").unwrap(), 3)
            .poll_targets(targets)
            .scale_source(scale)
            .config(PipelineConfig {
                failure_policy: policy,
                ..Default::default()
            })
            .health(health)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_fetch_failure_stops_every_poller() {
        let sources = vec![
            CountingSource::new(None),
            CountingSource::new(Some(3)),
            CountingSource::new(None),
        ];
        let health = HealthRegistry::for_pipeline().await;
        let pipeline = pipeline(
            &sources,
            StepScale::new(3, 3, usize::MAX),
            FetchFailurePolicy::Fatal,
            health.clone(),
        );
        let coordinator = pipeline.coordinator();

        // Watch the drain window while the pipeline still owns its pollers
        let drain_window = {
            let coordinator = coordinator.clone();
            let sources = sources.clone();
            tokio::spawn(async move {
                coordinator.cancelled().await;
                let at_signal: Vec<_> = sources.iter().map(|s| s.calls()).collect();
                let signalled = Instant::now();
                let summary = coordinator.wait_drained().await;
                let after_drain: Vec<_> = sources.iter().map(|s| s.calls()).collect();
                (at_signal, after_drain, signalled.elapsed(), summary)
            })
        };

        let err = pipeline.run().await.unwrap_err();

        match err {
            AutoscaleError::Fetch { container_id, .. } => assert_eq!(container_id, "bbb"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            coordinator.reason(),
            Some(&ShutdownReason::FetchFailed {
                container_id: "bbb".to_string()
            })
        );

        let (at_signal, after_drain, drain_time, summary) = drain_window.await.unwrap();
        let summary = summary.expect("drain summary");
        let config = PipelineConfig::default();

        // A full drain spans ten poll intervals with no further fetches
        assert_eq!(drain_time, config.drain.total());
        assert_eq!(at_signal[1], 3);
        assert_eq!(at_signal, after_drain);

        // Each fetch that succeeded before the signal was counted once
        let fetched: usize = at_signal.iter().sum::<usize>() - 1;
        assert_eq!(summary.total(), fetched as u64);
        assert_eq!(summary.drain_ticks, config.drain.ticks);

        let report = health.health().await;
        assert_eq!(
            report.components[components::POLLERS].status,
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_warmup_ends_run_early() {
        let sources: Vec<_> = IDS.iter().map(|_| CountingSource::new(None)).collect();
        let health = HealthRegistry::for_pipeline().await;
        let pipeline = pipeline(
            &sources,
            StepScale::new(3, 4, 0),
            FetchFailurePolicy::Fatal,
            health,
        );
        let coordinator = pipeline.coordinator();
        let config = PipelineConfig::default();
        let into_warmup =
            config.scale_check_interval + config.drain.total() + Duration::from_secs(10);

        let interrupter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                tokio::time::sleep(into_warmup).await;
                coordinator.interrupt().await
            })
        };

        let started = Instant::now();
        let outcome = pipeline.run().await.unwrap();

        match outcome {
            Outcome::Interrupted { summary } => {
                assert_eq!(summary.expect("drain summary").drain_ticks, config.drain.ticks);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(started.elapsed(), into_warmup);
        assert!(coordinator.is_interrupted());
        assert_eq!(
            coordinator.reason(),
            Some(&ShutdownReason::ScaleChanged(ScaleChange::Up { from: 3, to: 4 }))
        );

        // The interrupt reuses the drain the scale change already completed
        assert!(interrupter.await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_isolated_fetch_failure_keeps_other_pollers_running() {
        let sources = vec![
            CountingSource::new(None),
            CountingSource::new(Some(2)),
            CountingSource::new(None),
        ];
        let health = HealthRegistry::for_pipeline().await;
        let pipeline = pipeline(
            &sources,
            StepScale::new(3, 2, 1),
            FetchFailurePolicy::Isolate,
            health.clone(),
        );
        let coordinator = pipeline.coordinator();

        let outcome = pipeline.run().await.unwrap();

        match outcome {
            Outcome::Scaled { change, summary } => {
                assert_eq!(change, ScaleChange::Down { from: 3, to: 2 });
                assert!(summary.expect("drain summary").collected > 20);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(sources[1].calls(), 2);
        assert!(sources[0].calls() > 20);
        assert!(sources[2].calls() > 20);
        assert_eq!(coordinator.isolated_failures(), 1);

        let report = health.health().await;
        assert_eq!(
            report.components[components::POLLERS].status,
            ComponentStatus::Degraded
        );
        assert_eq!(report.status, ComponentStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_up_drains_then_warms_up() {
        let sources: Vec<_> = IDS.iter().map(|_| CountingSource::new(None)).collect();
        let health = HealthRegistry::for_pipeline().await;
        let pipeline = pipeline(
            &sources,
            StepScale::new(3, 4, 0),
            FetchFailurePolicy::Fatal,
            health.clone(),
        );
        let coordinator = pipeline.coordinator();

        let started = Instant::now();
        let outcome = pipeline.run().await.unwrap();
        let config = PipelineConfig::default();

        match outcome {
            Outcome::Scaled { change, summary } => {
                assert_eq!(change, ScaleChange::Up { from: 3, to: 4 });
                let summary = summary.expect("drain summary");
                assert_eq!(summary.drain_ticks, config.drain.ticks);
                assert!(summary.collected > 0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert!(
            started.elapsed()
                >= config.scale_check_interval + config.drain.total() + config.warmup
        );
        assert_eq!(coordinator.shutdown_requests(), 1);

        // Nothing was fetched after the first scale check
        for source in &sources {
            assert!(source.calls() <= 15);
        }
        assert!(health.readiness().await.ready);
    }
}
