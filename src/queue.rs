//! The bounded buffer between the HTTP intake and the persistence writer.
//!
//! Producers never block: when the queue is full the *new* record is
//! dropped and counted. Older records are never evicted. This keeps `/data`
//! fast under overload at the cost of losing the tail of the stream.

use crate::record::SensorRecord;
use crate::stats::PipelineStats;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::warn;
use std::{sync::Arc, time::Duration};

/// Log every this many drops, plus the very first one.
const DROP_LOG_EVERY: u64 = 1000;

/// What happened to a record handed to [IngestQueue::enqueue].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The record is waiting for the writer.
    Enqueued,
    /// The queue was full (or the writer is gone); the record is lost.
    Dropped,
}

/// Producer side of the queue. Cheap to clone, one per handler is fine.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    tx: Sender<SensorRecord>,
    capacity: usize,
    stats: Arc<PipelineStats>,
}

/// Consumer side of the queue, owned by the writer.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: Receiver<SensorRecord>,
}

/// Creates a queue holding at most `capacity` records.
pub fn bounded(capacity: usize, stats: Arc<PipelineStats>) -> (IngestQueue, QueueReceiver) {
    let (tx, rx) = channel::bounded(capacity);
    (
        IngestQueue {
            tx,
            capacity,
            stats,
        },
        QueueReceiver { rx },
    )
}

impl IngestQueue {
    /// Hands a record to the writer without ever blocking.
    pub fn enqueue(&self, record: SensorRecord) -> EnqueueOutcome {
        match self.tx.try_send(record) {
            Ok(()) => {
                self.stats.record_enqueued();
                EnqueueOutcome::Enqueued
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.record_dropped();
                if dropped == 1 || dropped % DROP_LOG_EVERY == 0 {
                    warn!(
                        "Ingestion queue full ({} records), dropping sensor sample ({dropped} dropped so far)",
                        self.capacity
                    );
                }
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.record_dropped();
                warn!("Persistence writer is gone, dropping sensor sample");
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Records currently waiting.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// True if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// The fixed capacity the queue was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Why [QueueReceiver::recv_batch] came back empty handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchError {
    /// Nothing arrived within the timeout.
    Timeout,
    /// Every producer is gone and the queue is drained.
    Disconnected,
}

impl QueueReceiver {
    /// Waits up to `timeout` for one record, then greedily takes whatever
    /// else is already queued, up to `max` records in total.
    pub fn recv_batch(&self, timeout: Duration, max: usize) -> Result<Vec<SensorRecord>, BatchError> {
        let first = self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => BatchError::Timeout,
            RecvTimeoutError::Disconnected => BatchError::Disconnected,
        })?;

        let mut batch = Vec::with_capacity(max.min(self.rx.len() + 1));
        batch.push(first);
        batch.extend(self.rx.try_iter().take(max.saturating_sub(1)));
        Ok(batch)
    }

    /// Records currently waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
