//! Concurrent metrics collection
//!
//! One [`Poller`] task per container feeds a rendezvous [`queue`] drained by
//! a single [`Aggregator`]. Pollers are launched on a [`SpawnSchedule`] so
//! their first requests are spread across one poll interval.

mod aggregator;
mod poller;
pub mod queue;
mod schedule;

#[cfg(test)]
mod tests;

pub use aggregator::{
    is_progress_point, AggregateSummary, Aggregator, AggregatorState, DrainConfig,
    DEFAULT_PROGRESS_EVERY,
};
pub use poller::{Poller, PollerExit, DEFAULT_POLL_INTERVAL};
pub use queue::{rendezvous, QueueClosed, SampleReceiver, SampleSender};
pub use schedule::SpawnSchedule;

use crate::models::ContainerTarget;
use crate::source::MetricsSource;
use std::sync::Arc;

/// A container to poll together with the agent that serves its metrics
#[derive(Clone)]
pub struct PollTarget {
    pub target: ContainerTarget,
    pub source: Arc<dyn MetricsSource>,
}

impl PollTarget {
    pub fn new(target: ContainerTarget, source: Arc<dyn MetricsSource>) -> Self {
        Self { target, source }
    }
}

impl std::fmt::Debug for PollTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollTarget")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
