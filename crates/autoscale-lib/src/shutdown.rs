//! Shutdown coordination
//!
//! The [`ShutdownCoordinator`] owns the process-wide cancellation token and
//! the drain handshake with the aggregator. The token is a broadcast: every
//! poller and the aggregator hold a clone and observe the same transition
//! independently. The first shutdown request wins and records its reason;
//! later requests only wait for the drain to finish.

use crate::collector::AggregateSummary;
use crate::error::SourceError;
use crate::observability::StructuredLogger;
use crate::watch::ScaleChange;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What to do when a single poller's fetch fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchFailurePolicy {
    /// Shut the whole pipeline down and fail the run
    #[default]
    Fatal,
    /// Stop only the failing poller and keep collecting from the others
    Isolate,
}

/// Why the pipeline was shut down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    ScaleChanged(ScaleChange),
    FetchFailed { container_id: String },
    ScaleQueryFailed,
    Interrupted,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::ScaleChanged(change) => write!(
                f,
                "scale {} {} -> {}",
                change.direction(),
                change.from(),
                change.to()
            ),
            ShutdownReason::FetchFailed { container_id } => {
                write!(f, "fetch failed for container {}", container_id)
            }
            ShutdownReason::ScaleQueryFailed => write!(f, "scale query failed"),
            ShutdownReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Decision returned to a poller whose fetch failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// The pipeline is shutting down
    ShutdownPipeline,
    /// Only the reporting poller stops
    StopPoller,
}

/// Owner of the cancellation signal and the drain protocol
pub struct ShutdownCoordinator {
    token: CancellationToken,
    interrupt: CancellationToken,
    policy: FetchFailurePolicy,
    reason: OnceLock<ShutdownReason>,
    requests: AtomicUsize,
    isolated_failures: AtomicUsize,
    drain_expected: AtomicBool,
    drained: watch::Sender<Option<AggregateSummary>>,
    logger: StructuredLogger,
}

impl ShutdownCoordinator {
    pub fn new(policy: FetchFailurePolicy, logger: StructuredLogger) -> Self {
        let (drained, _) = watch::channel(None);
        Self {
            token: CancellationToken::new(),
            interrupt: CancellationToken::new(),
            policy,
            reason: OnceLock::new(),
            requests: AtomicUsize::new(0),
            isolated_failures: AtomicUsize::new(0),
            drain_expected: AtomicBool::new(false),
            drained,
            logger,
        }
    }

    pub fn policy(&self) -> FetchFailurePolicy {
        self.policy
    }

    /// A clone of the broadcast cancellation token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been signaled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Reason recorded by the first shutdown request
    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.get()
    }

    /// Number of shutdown requests received, including ignored repeats
    pub fn shutdown_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn isolated_failures(&self) -> usize {
        self.isolated_failures.load(Ordering::SeqCst)
    }

    /// Raise the cancellation signal without waiting for the drain.
    ///
    /// Returns true if this call performed the transition.
    pub fn signal(&self, reason: ShutdownReason) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);

        match self.reason.set(reason) {
            Ok(()) => {
                if let Some(reason) = self.reason.get() {
                    self.logger.log_shutdown(reason);
                }
                self.token.cancel();
                true
            }
            Err(ignored) => {
                debug!(ignored = %ignored, "Shutdown already requested");
                false
            }
        }
    }

    /// An operator interrupt. Unlike other reasons it also cuts short the
    /// scale-up warm-up, so it stays observable after the first reason won.
    pub async fn interrupt(&self) -> Option<AggregateSummary> {
        self.interrupt.cancel();
        self.shutdown(ShutdownReason::Interrupted).await
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Resolves once [`interrupt`](Self::interrupt) has been called
    pub async fn interrupted(&self) {
        self.interrupt.cancelled().await
    }

    /// Signal cancellation and wait until the aggregator has drained
    pub async fn shutdown(&self, reason: ShutdownReason) -> Option<AggregateSummary> {
        self.signal(reason);
        self.wait_drained().await
    }

    /// Register that an aggregator will report its drain
    pub fn expect_drain(&self) {
        self.drain_expected.store(true, Ordering::SeqCst);
    }

    /// Called by the aggregator once it has reached Stopped
    pub fn complete_drain(&self, summary: AggregateSummary) {
        self.logger.log_drain_complete(&summary);
        self.drained.send_replace(Some(summary));
    }

    /// Wait for the aggregator's drain; returns immediately if none is registered
    pub async fn wait_drained(&self) -> Option<AggregateSummary> {
        if !self.drain_expected.load(Ordering::SeqCst) {
            return None;
        }

        let mut rx = self.drained.subscribe();
        let summary = match rx.wait_for(Option::is_some).await {
            Ok(summary) => summary.clone(),
            Err(_) => None,
        };
        summary
    }

    /// Apply the failure policy to a poller's fetch error
    pub fn report_fetch_failure(&self, container_id: &str, error: &SourceError) -> FailureAction {
        self.logger
            .log_fetch_failure(container_id, &error.to_string(), self.policy);

        match self.policy {
            FetchFailurePolicy::Fatal => {
                self.signal(ShutdownReason::FetchFailed {
                    container_id: container_id.to_string(),
                });
                FailureAction::ShutdownPipeline
            }
            FetchFailurePolicy::Isolate => {
                self.isolated_failures.fetch_add(1, Ordering::SeqCst);
                FailureAction::StopPoller
            }
        }
    }
}
