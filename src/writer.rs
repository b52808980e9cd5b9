//! The persistence writer: drains the ingestion queue into SQLite.
//!
//! Every iteration waits up to `poll` for a record, greedily takes up to
//! `batch_size` more, groups them by subject and writes each group in one
//! transaction. A failed group is logged, rolled back and lost; it is never
//! re-queued. The loop keeps going until the shutdown signal is raised.

use crate::queue::{BatchError, QueueReceiver};
use crate::record::SensorRecord;
use crate::shutdown::Shutdown;
use crate::stats::PipelineStats;
use crate::store::SensorStore;
use crate::subject::SubjectId;
use log::{debug, error, info};
use std::{
    collections::BTreeMap,
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

/// Records written per transaction batch, at most.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// How long one iteration waits for the first record.
pub const DEFAULT_POLL: Duration = Duration::from_secs(1);

/// The persistence worker. Owns its own database connection.
pub struct BatchWriter {
    store: SensorStore,
    queue: QueueReceiver,
    shutdown: Shutdown,
    stats: Arc<PipelineStats>,
    batch_size: usize,
    poll: Duration,
}

impl BatchWriter {
    /// A writer with the default batch size and poll interval.
    pub fn new(
        store: SensorStore,
        queue: QueueReceiver,
        shutdown: Shutdown,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            store,
            queue,
            shutdown,
            stats,
            batch_size: DEFAULT_BATCH_SIZE,
            poll: DEFAULT_POLL,
        }
    }

    /// Overrides the maximum records drained per iteration.
    pub fn batch_size(self, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..self
        }
    }

    /// Overrides how long an idle iteration blocks.
    pub fn poll(self, poll: Duration) -> Self {
        Self { poll, ..self }
    }

    /// Runs until the shutdown signal is raised or every producer is gone.
    /// Records still queued at that point are not written.
    pub fn run(mut self) {
        info!("DB writer started (batch {}, poll {:?})", self.batch_size, self.poll);
        while !self.shutdown.is_triggered() {
            let batch = match self.queue.recv_batch(self.poll, self.batch_size) {
                Ok(batch) => batch,
                Err(BatchError::Timeout) => continue,
                Err(BatchError::Disconnected) => {
                    info!("Ingestion queue closed");
                    break;
                }
            };
            self.write_batch(batch);
        }

        let left = self.queue.len();
        if left > 0 {
            info!("DB writer stopping with {left} records still queued");
        }
        info!("DB writer thread stopped.");
    }

    /// Writes one drained batch, one transaction per subject. Returns the
    /// number of rows that made it to disk.
    pub fn write_batch(&mut self, batch: Vec<SensorRecord>) -> usize {
        let total = batch.len();
        let mut written = 0;

        for (subject, records) in group_by_subject(batch) {
            match self.store.insert_records(subject, &records) {
                Ok(n) => {
                    self.stats.record_written(n);
                    written += n;
                }
                Err(e) => {
                    error!(
                        "DB writer error, dropping {} rows for subject {subject}: {e}",
                        records.len()
                    );
                    self.stats.record_lost(records.len());
                    // The table may have gone away under us; check again next time.
                    self.store.forget(subject);
                }
            }
        }

        debug!("DB writer: inserted {written} of {total} rows.");
        written
    }
}

/// Splits a batch per destination table, keeping queue order within each.
fn group_by_subject(batch: Vec<SensorRecord>) -> BTreeMap<SubjectId, Vec<SensorRecord>> {
    let mut groups: BTreeMap<SubjectId, Vec<SensorRecord>> = BTreeMap::new();
    for record in batch {
        groups.entry(record.subject_id).or_default().push(record);
    }
    groups
}

/// Runs `writer` on its own named thread.
pub fn spawn_writer(writer: BatchWriter) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("db-writer".to_string())
        .spawn(move || writer.run())
}
