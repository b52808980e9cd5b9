//! The rows that end up in storage.

use crate::payload::{Channels, NormalizedReading};
use crate::subject::{Activity, Placement, SubjectConfig, SubjectId};
use chrono::{DateTime, Utc};

/// A normalized reading bound to its subject; one row of a subject table.
///
/// At least one channel is always present, since empty readings are
/// dropped during normalization.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct SensorRecord {
    pub timestamp: DateTime<Utc>,
    pub subject_id: SubjectId,
    pub channels: Channels,
    pub placement: Placement,
    pub activity: Activity,
}

impl SensorRecord {
    /// Tags a reading with the subject's current activity and placement.
    pub fn new(reading: NormalizedReading, config: &SubjectConfig) -> Self {
        Self {
            timestamp: reading.timestamp,
            subject_id: config.subject_id,
            channels: reading.channels,
            placement: config.placement,
            activity: config.activity,
        }
    }
}

/// One row of the frame-metadata table. `frame_number` is the 1-based
/// position of the frame within `filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct FrameRecord {
    pub filename: String,
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
}
