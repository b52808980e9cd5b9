//! Per-subject sample-rate gate.
//!
//! Phones happily stream at 100 Hz or more; the dataset only wants
//! `sample_rate_hz` readings per second per subject. A reading is admitted
//! if it is at least one interval after the last *admitted* reading for the
//! same subject. Arrival order is not corrected for, so a backdated reading
//! is simply rejected and a burst of out-of-order readings can distort the
//! effective rate.

use crate::subject::SubjectId;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};

type Cell = Arc<Mutex<Option<DateTime<Utc>>>>;

/// Remembers the last admitted timestamp of every subject.
#[derive(Debug)]
pub struct SampleThrottle {
    interval: TimeDelta,
    // Outer lock is only written when a subject is seen for the first time;
    // the per-subject cell serializes admissions for that subject alone.
    last_admitted: RwLock<HashMap<SubjectId, Cell>>,
}

impl SampleThrottle {
    /// A throttle admitting at most `sample_rate_hz` readings per second per
    /// subject. The rate must be positive and finite.
    pub fn new(sample_rate_hz: f64) -> Self {
        debug_assert!(sample_rate_hz.is_finite() && sample_rate_hz > 0.0);
        let nanos = (1e9 / sample_rate_hz).round() as i64;
        Self {
            interval: TimeDelta::nanoseconds(nanos),
            last_admitted: RwLock::new(HashMap::new()),
        }
    }

    /// The minimum spacing between admitted readings.
    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    /// Decides whether a reading stamped `timestamp` for `subject` gets
    /// through, and records it as the latest admission if so.
    pub fn admit(&self, subject: SubjectId, timestamp: DateTime<Utc>) -> bool {
        let cell = self.cell(subject);
        let mut last = cell.lock();
        match *last {
            Some(prev) if timestamp - prev < self.interval => false,
            _ => {
                *last = Some(timestamp);
                true
            }
        }
    }

    /// Forgets every subject's history.
    pub fn reset(&self) {
        self.last_admitted.write().clear();
    }

    fn cell(&self, subject: SubjectId) -> Cell {
        if let Some(cell) = self.last_admitted.read().get(&subject) {
            return Arc::clone(cell);
        }
        Arc::clone(self.last_admitted.write().entry(subject).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn at(secs: f64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis((secs * 1000.0).round() as i64).unwrap()
    }

    fn subject(id: u32) -> SubjectId {
        SubjectId::new(id).unwrap()
    }

    #[test]
    fn rejects_inside_interval() {
        let throttle = SampleThrottle::new(10.0);
        assert!(throttle.admit(subject(1), at(0.00)));
        assert!(!throttle.admit(subject(1), at(0.05)));
    }

    #[test]
    fn admits_after_interval() {
        let throttle = SampleThrottle::new(10.0);
        assert!(throttle.admit(subject(1), at(0.00)));
        assert!(throttle.admit(subject(1), at(0.15)));
    }

    #[test]
    fn exactly_one_interval_is_admitted() {
        let throttle = SampleThrottle::new(10.0);
        assert!(throttle.admit(subject(1), at(1.0)));
        assert!(throttle.admit(subject(1), at(1.1)));
    }

    #[test]
    fn rejected_readings_do_not_move_the_gate() {
        let throttle = SampleThrottle::new(10.0);
        assert!(throttle.admit(subject(1), at(0.00)));
        assert!(!throttle.admit(subject(1), at(0.06)));
        assert!(!throttle.admit(subject(1), at(0.09)));
        assert!(throttle.admit(subject(1), at(0.10)));
    }

    #[test]
    fn subjects_are_independent() {
        let throttle = SampleThrottle::new(10.0);
        assert!(throttle.admit(subject(1), at(0.00)));
        assert!(throttle.admit(subject(2), at(0.01)));
        assert!(!throttle.admit(subject(1), at(0.02)));
        assert!(!throttle.admit(subject(2), at(0.03)));
    }

    #[test]
    fn backdated_readings_are_rejected() {
        let throttle = SampleThrottle::new(10.0);
        assert!(throttle.admit(subject(1), at(5.0)));
        assert!(!throttle.admit(subject(1), at(1.0)));
        throttle.reset();
        assert!(throttle.admit(subject(1), at(1.0)));
    }

    #[test]
    fn concurrent_admissions_for_one_subject_are_serialized() {
        let throttle = Arc::new(SampleThrottle::new(10.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                thread::spawn(move || throttle.admit(subject(4), at(2.0)))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&a| a)
            .count();
        assert_eq!(admitted, 1);
    }
}
