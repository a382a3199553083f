//! Rate-limited poller launch schedule
//!
//! Pollers are started one per tick with a spacing of
//! `poll_interval / scale`, so the first requests of all pollers are spread
//! across one poll interval instead of hitting the agents together.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnSchedule {
    spacing: Duration,
}

impl SpawnSchedule {
    /// Spread launches over one poll interval; a scale of 0 counts as 1
    pub fn spread(poll_interval: Duration, scale: u32) -> Self {
        Self {
            spacing: poll_interval / scale.max(1),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Launch offset of each of the first `count` items
    pub fn offsets(&self, count: usize) -> Vec<Duration> {
        (0..count as u32).map(|i| self.spacing * i).collect()
    }

    /// Launch each item on its own tick, stopping early on cancellation.
    ///
    /// Returns the number of items launched.
    pub async fn launch<T, F>(&self, items: Vec<T>, token: &CancellationToken, mut spawn: F) -> usize
    where
        F: FnMut(T),
    {
        if self.spacing.is_zero() {
            let mut launched = 0;
            for item in items {
                if token.is_cancelled() {
                    break;
                }
                spawn(item);
                launched += 1;
            }
            return launched;
        }

        let mut ticker = interval(self.spacing);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut launched = 0;
        for item in items {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            spawn(item);
            launched += 1;
        }
        launched
    }
}
