//! The `/data` hot path: resolve the device, normalize the payload,
//! throttle per subject and hand the survivors to the writer.
//!
//! Nothing in here touches the database. The only shared state written is
//! the throttle and the queue, both of which are non-blocking.

use crate::payload::{normalize, NormalizeError};
use crate::queue::{EnqueueOutcome, IngestQueue};
use crate::record::SensorRecord;
use crate::registry::DeviceRegistry;
use crate::stats::PipelineStats;
use crate::subject::SubjectId;
use crate::throttle::SampleThrottle;
use log::debug;
use serde_json::Value;
use std::{fmt, sync::Arc};

/// Client errors from [Intake::ingest]. None of them change any state.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeError {
    /// No dynamic or static mapping exists for this device.
    DeviceNotMapped(String),
    /// The device's subject has no complete configuration yet.
    SubjectNotConfigured(SubjectId),
    /// The payload could not be normalized.
    Malformed(NormalizeError),
}

impl fmt::Display for IntakeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IntakeError::DeviceNotMapped(device) => {
                write!(f, "Device {device} not mapped. POST /map_subject first.")
            }
            IntakeError::SubjectNotConfigured(subject) => write!(
                f,
                "No config for subject {subject}. POST /configure or /map_subject."
            ),
            IntakeError::Malformed(error) => write!(f, "malformed payload: {error}"),
        }
    }
}

impl std::error::Error for IntakeError {}

impl From<NormalizeError> for IntakeError {
    fn from(value: NormalizeError) -> Self {
        Self::Malformed(value)
    }
}

/// Where the readings of one request went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Subject the device resolved to.
    pub subject: Option<SubjectId>,
    /// Elements in the request payload.
    pub received: usize,
    /// Readings dropped for carrying no channel.
    pub heartbeats: usize,
    /// Readings rejected by the sample-rate gate.
    pub throttled: usize,
    /// Readings handed to the writer.
    pub enqueued: usize,
    /// Readings lost to a full queue.
    pub dropped: usize,
}

/// Everything `/data` needs, shared across handler invocations.
pub struct Intake {
    registry: Arc<DeviceRegistry>,
    throttle: SampleThrottle,
    queue: IngestQueue,
    stats: Arc<PipelineStats>,
}

impl Intake {
    /// Wires the intake to its collaborators.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        throttle: SampleThrottle,
        queue: IngestQueue,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            registry,
            throttle,
            queue,
            stats,
        }
    }

    /// The device registry, for the configuration endpoints.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// The producer side of the ingestion queue.
    pub fn queue(&self) -> &IngestQueue {
        &self.queue
    }

    /// Processes one `/data` request body.
    pub fn ingest(&self, device_id: &str, payload: &[Value]) -> Result<IngestSummary, IntakeError> {
        let subject = self
            .registry
            .resolve(device_id)
            .ok_or_else(|| IntakeError::DeviceNotMapped(device_id.to_lowercase()))?;
        let config = self
            .registry
            .subject_config(subject)
            .ok_or(IntakeError::SubjectNotConfigured(subject))?;

        let normalized = normalize(payload)?;
        self.stats.record_empty_skipped(normalized.heartbeats);

        let mut summary = IngestSummary {
            subject: Some(subject),
            received: payload.len(),
            heartbeats: normalized.heartbeats,
            ..IngestSummary::default()
        };

        for reading in normalized.readings {
            if !self.throttle.admit(subject, reading.timestamp) {
                self.stats.record_throttled();
                summary.throttled += 1;
                continue;
            }
            match self.queue.enqueue(SensorRecord::new(reading, &config)) {
                EnqueueOutcome::Enqueued => summary.enqueued += 1,
                EnqueueOutcome::Dropped => summary.dropped += 1,
            }
        }

        debug!(
            "Device {device_id} -> subject {subject}: {:?} payload, {summary:?}",
            normalized.style
        );
        Ok(summary)
    }
}
