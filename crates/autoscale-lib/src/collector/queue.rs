//! Fan-in metrics queue
//!
//! A rendezvous hand-off between the pollers and the aggregator: a send
//! completes only after the aggregator has taken the sample. Each sample
//! travels with a one-shot acknowledgement that the receiver fires on
//! receipt. When the receiver is dropped, pending and future sends fail
//! instead of blocking.

use crate::models::MetricSample;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// The aggregator is gone; the sample was not delivered
#[derive(Debug, Error, PartialEq, Eq)]
#[error("metrics queue closed")]
pub struct QueueClosed;

/// Non-blocking receive outcome
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryRecvError {
    #[error("metrics queue empty")]
    Empty,
    #[error("all metrics senders dropped")]
    Disconnected,
}

struct Handoff {
    sample: MetricSample,
    ack: oneshot::Sender<()>,
}

/// Create a connected sender/receiver pair
pub fn rendezvous() -> (SampleSender, SampleReceiver) {
    // Capacity 1 holds the hand-off until the receiver acknowledges it
    let (tx, rx) = mpsc::channel(1);
    (SampleSender { tx }, SampleReceiver { rx })
}

/// Poller side of the queue
#[derive(Clone)]
pub struct SampleSender {
    tx: mpsc::Sender<Handoff>,
}

impl SampleSender {
    /// Hand a sample to the aggregator, waiting until it has been received
    pub async fn send(&self, sample: MetricSample) -> Result<(), QueueClosed> {
        let (ack, acked) = oneshot::channel();
        self.tx
            .send(Handoff { sample, ack })
            .await
            .map_err(|_| QueueClosed)?;
        acked.await.map_err(|_| QueueClosed)
    }
}

/// Aggregator side of the queue
pub struct SampleReceiver {
    rx: mpsc::Receiver<Handoff>,
}

impl SampleReceiver {
    /// Wait for the next sample; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<MetricSample> {
        self.rx.recv().await.map(Self::accept)
    }

    pub fn try_recv(&mut self) -> Result<MetricSample, TryRecvError> {
        match self.rx.try_recv() {
            Ok(handoff) => Ok(Self::accept(handoff)),
            Err(mpsc::error::TryRecvError::Empty) => Err(TryRecvError::Empty),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TryRecvError::Disconnected),
        }
    }

    fn accept(handoff: Handoff) -> MetricSample {
        // The sender may have given up waiting; the sample still counts
        let _ = handoff.ack.send(());
        handoff.sample
    }
}
