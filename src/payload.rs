//! Turns whatever the phones POST to `/data` into canonical readings.
//!
//! Two payload shapes show up in practice:
//!
//! - **per-reading**: every element already carries all of its sensors,
//!   e.g. `{"timestamp": 1700000000.0, "accelerometer": {"x": 1, "y": 2, "z": 3}}`
//! - **by sensor name**: every element is a single sensor sample tagged by
//!   `name`, e.g. `{"name": "gyroscope", "time": 1700000000123, "values": {...}}`.
//!   Samples that share a timestamp are merged into one reading.
//!
//! Vectors come in three coordinate conventions, `{x,y,z}`, `{pitch,roll,yaw}`
//! and `{alpha,beta,gamma}`; each is flattened into a three element array in
//! that declared order. Anything else is passed through untouched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{collections::HashMap, fmt};

/// Keys tried, in order, for a reading's timestamp. A key whose value is
/// null, zero, false or empty is skipped.
const TIMESTAMP_KEYS: [&str; 3] = ["timestamp", "time", "ts"];

const NANOS_THRESHOLD: f64 = 1e15;
const MILLIS_THRESHOLD: f64 = 1e12;

/// One of the four vector-valued sensor types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Channel {
    Accelerometer,
    Gyroscope,
    Orientation,
    Gravity,
}

impl Channel {
    /// Every channel, in column order.
    pub const ALL: [Channel; 4] = [
        Channel::Accelerometer,
        Channel::Gyroscope,
        Channel::Orientation,
        Channel::Gravity,
    ];

    /// The field name used in payloads and as the column name.
    pub fn name(self) -> &'static str {
        match self {
            Channel::Accelerometer => "accelerometer",
            Channel::Gyroscope => "gyroscope",
            Channel::Orientation => "orientation",
            Channel::Gravity => "gravity",
        }
    }

    /// Case-insensitive lookup of a sensor name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// The value stored for one channel of one reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChannelValue {
    /// A vector recognised in one of the coordinate conventions.
    Vector([f64; 3]),
    /// A shape we do not recognise, kept verbatim.
    Raw(Value),
}

/// The four channels of a reading; absent channels are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(missing_docs)]
pub struct Channels {
    pub accelerometer: Option<ChannelValue>,
    pub gyroscope: Option<ChannelValue>,
    pub orientation: Option<ChannelValue>,
    pub gravity: Option<ChannelValue>,
}

impl Channels {
    /// Mutable access to a single channel slot.
    pub fn slot(&mut self, channel: Channel) -> &mut Option<ChannelValue> {
        match channel {
            Channel::Accelerometer => &mut self.accelerometer,
            Channel::Gyroscope => &mut self.gyroscope,
            Channel::Orientation => &mut self.orientation,
            Channel::Gravity => &mut self.gravity,
        }
    }

    /// True when not a single channel carries data, which is what a
    /// heartbeat-only reading looks like.
    pub fn is_empty(&self) -> bool {
        self.accelerometer.is_none()
            && self.gyroscope.is_none()
            && self.orientation.is_none()
            && self.gravity.is_none()
    }
}

/// A reading after normalization, not yet bound to a subject.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    /// UTC instant derived from the raw numeric timestamp.
    pub timestamp: DateTime<Utc>,
    /// The channel values present in the reading.
    pub channels: Channels,
}

/// The two payload shapes the intake understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStyle {
    /// Every element is a complete reading with named sensor fields.
    PerReading,
    /// Every element is one sensor sample tagged with a `name`.
    BySensorName,
}

impl PayloadStyle {
    /// The whole payload is treated as [PayloadStyle::BySensorName] iff its
    /// first element is an object with a `name` key.
    pub fn classify(payload: &[Value]) -> Self {
        match payload.first() {
            Some(Value::Object(first)) if first.contains_key("name") => Self::BySensorName,
            _ => Self::PerReading,
        }
    }
}

/// The coordinate naming conventions a vector may arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateConvention {
    /// `{x, y, z}`
    Cartesian,
    /// `{pitch, roll, yaw}`
    PitchRollYaw,
    /// `{alpha, beta, gamma}`
    AlphaBetaGamma,
}

impl CoordinateConvention {
    const ALL: [CoordinateConvention; 3] = [
        CoordinateConvention::Cartesian,
        CoordinateConvention::PitchRollYaw,
        CoordinateConvention::AlphaBetaGamma,
    ];

    /// The three keys of the convention, in output order.
    pub fn keys(self) -> [&'static str; 3] {
        match self {
            Self::Cartesian => ["x", "y", "z"],
            Self::PitchRollYaw => ["pitch", "roll", "yaw"],
            Self::AlphaBetaGamma => ["alpha", "beta", "gamma"],
        }
    }

    /// The first convention whose keys are all present in `map`.
    pub fn detect(map: &Map<String, Value>) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.keys().iter().all(|k| map.contains_key(*k)))
    }

    /// Pulls the three components out in declared order. Fails if any of
    /// them is not a number.
    pub fn extract(self, map: &Map<String, Value>) -> Option<[f64; 3]> {
        let [a, b, c] = self.keys();
        Some([
            map.get(a)?.as_f64()?,
            map.get(b)?.as_f64()?,
            map.get(c)?.as_f64()?,
        ])
    }
}

/// Things that make a payload impossible to normalize.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeError {
    /// Element `index` is not a JSON object.
    NotAnObject {
        /// Position of the element in the payload.
        index: usize,
    },
    /// Element `index` has none of the timestamp keys.
    MissingTimestamp {
        /// Position of the element in the payload.
        index: usize,
    },
    /// Element `index` has a timestamp that is not a usable number.
    InvalidTimestamp {
        /// Position of the element in the payload.
        index: usize,
        /// The offending value, as JSON.
        raw: String,
    },
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NormalizeError::NotAnObject { index } => {
                write!(f, "payload[{index}] is not an object")
            }
            NormalizeError::MissingTimestamp { index } => {
                write!(f, "payload[{index}] has no timestamp, time or ts field")
            }
            NormalizeError::InvalidTimestamp { index, raw } => {
                write!(f, "payload[{index}] has an unusable timestamp {raw}")
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

/// The outcome of normalizing one request body.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPayload {
    /// How the payload was interpreted.
    pub style: PayloadStyle,
    /// Readings with at least one channel, in payload order.
    pub readings: Vec<NormalizedReading>,
    /// Readings dropped because they carried no channel at all.
    pub heartbeats: usize,
}

/// Normalizes a whole payload, dropping readings that carry no channel at
/// all. A single malformed element rejects the entire payload.
pub fn normalize(payload: &[Value]) -> Result<NormalizedPayload, NormalizeError> {
    let style = PayloadStyle::classify(payload);
    let all = match style {
        PayloadStyle::PerReading => normalize_per_reading(payload)?,
        PayloadStyle::BySensorName => normalize_by_sensor_name(payload)?,
    };

    let total = all.len();
    let readings: Vec<NormalizedReading> = all
        .into_iter()
        .filter(|r| !r.channels.is_empty())
        .collect();

    Ok(NormalizedPayload {
        style,
        heartbeats: total - readings.len(),
        readings,
    })
}

fn normalize_per_reading(payload: &[Value]) -> Result<Vec<NormalizedReading>, NormalizeError> {
    payload
        .iter()
        .enumerate()
        .map(|(index, element)| {
            let reading = as_object(element, index)?;
            let timestamp = reading_timestamp(reading, index)?;

            let mut channels = Channels::default();
            for channel in Channel::ALL {
                *channels.slot(channel) = reading.get(channel.name()).and_then(extract_vector);
            }

            Ok(NormalizedReading {
                timestamp,
                channels,
            })
        })
        .collect()
}

fn normalize_by_sensor_name(payload: &[Value]) -> Result<Vec<NormalizedReading>, NormalizeError> {
    // Grouped by derived instant, kept in first-seen order.
    let mut readings: Vec<NormalizedReading> = Vec::new();
    let mut by_instant: HashMap<DateTime<Utc>, usize> = HashMap::new();

    for (index, element) in payload.iter().enumerate() {
        let sample = as_object(element, index)?;
        let timestamp = reading_timestamp(sample, index)?;

        let slot = *by_instant.entry(timestamp).or_insert_with(|| {
            readings.push(NormalizedReading {
                timestamp,
                channels: Channels::default(),
            });
            readings.len() - 1
        });

        let channel = sample
            .get("name")
            .and_then(Value::as_str)
            .and_then(Channel::from_name);
        let Some(channel) = channel else {
            continue;
        };

        let values = ["values", "value"]
            .iter()
            .filter_map(|k| sample.get(*k))
            .find(|v| !is_unset(v))
            .unwrap_or(element);

        *readings[slot].channels.slot(channel) = extract_vector(values);
    }

    Ok(readings)
}

fn as_object(element: &Value, index: usize) -> Result<&Map<String, Value>, NormalizeError> {
    element
        .as_object()
        .ok_or(NormalizeError::NotAnObject { index })
}

fn reading_timestamp(
    reading: &Map<String, Value>,
    index: usize,
) -> Result<DateTime<Utc>, NormalizeError> {
    let raw = TIMESTAMP_KEYS
        .iter()
        .filter_map(|k| reading.get(*k))
        .find(|v| !is_unset(v))
        .ok_or(NormalizeError::MissingTimestamp { index })?;

    infer_timestamp(raw).ok_or_else(|| NormalizeError::InvalidTimestamp {
        index,
        raw: raw.to_string(),
    })
}

/// Converts a raw timestamp into a UTC instant, inferring its unit from its
/// magnitude: above 1e15 it is nanoseconds, above 1e12 milliseconds, and
/// seconds otherwise. Numeric strings are accepted.
pub fn infer_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => match n.as_i64() {
            Some(i) => from_integer(i),
            None => from_float(n.as_f64()?),
        },
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => from_integer(i),
                Err(_) => from_float(s.parse::<f64>().ok()?),
            }
        }
        _ => None,
    }
}

// Integers are converted exactly; going through f64 would merge distinct
// nanosecond timestamps when grouping.
fn from_integer(raw: i64) -> Option<DateTime<Utc>> {
    if raw as f64 > NANOS_THRESHOLD {
        DateTime::from_timestamp(
            raw.div_euclid(1_000_000_000),
            raw.rem_euclid(1_000_000_000) as u32,
        )
    } else if raw as f64 > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    }
}

fn from_float(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() {
        return None;
    }
    let secs = if raw > NANOS_THRESHOLD {
        raw / 1e9
    } else if raw > MILLIS_THRESHOLD {
        raw / 1e3
    } else {
        raw
    };

    // Fractional seconds are kept to the microsecond; finer digits of an
    // f64 epoch value are noise.
    let mut whole = secs.floor();
    let mut micros = ((secs - whole) * 1e6).round();
    if micros >= 1e6 {
        whole += 1.0;
        micros = 0.0;
    }
    if whole.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp(whole as i64, micros as u32 * 1_000)
}

/// Flattens a vector value into `[f64; 3]` when it matches one of the
/// coordinate conventions. Unrecognised shapes are passed through as
/// [ChannelValue::Raw]; null and empty values count as absent.
pub fn extract_vector(value: &Value) -> Option<ChannelValue> {
    if is_blank(value) {
        return None;
    }
    if let Value::Object(map) = value {
        if let Some(v) = CoordinateConvention::detect(map).and_then(|c| c.extract(map)) {
            return Some(ChannelValue::Vector(v));
        }
    }
    Some(ChannelValue::Raw(value.clone()))
}

// A field lookup treats zero like a missing value as well.
fn is_unset(value: &Value) -> bool {
    is_blank(value) || value.as_f64() == Some(0.0)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Vec<Value> {
        match v {
            Value::Array(a) => a,
            _ => panic!("test payload must be an array"),
        }
    }

    #[test]
    fn classifies_on_first_element() {
        assert_eq!(
            PayloadStyle::classify(&payload(json!([{"name": "gravity", "time": 1}]))),
            PayloadStyle::BySensorName
        );
        assert_eq!(
            PayloadStyle::classify(&payload(json!([{"timestamp": 1}, {"name": "gravity"}]))),
            PayloadStyle::PerReading
        );
        assert_eq!(PayloadStyle::classify(&[]), PayloadStyle::PerReading);
    }

    #[test]
    fn per_reading_with_all_conventions() {
        let readings = normalize(&payload(json!([{
            "timestamp": 1700000000.0,
            "accelerometer": {"x": 1, "y": 2, "z": 3},
            "orientation": {"yaw": 0.3, "roll": 0.2, "pitch": 0.1},
            "gravity": {"gamma": 9.0, "alpha": 7.0, "beta": 8.0},
        }])))
        .unwrap()
        .readings;

        assert_eq!(readings.len(), 1);
        let r = &readings[0];
        assert_eq!(r.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(r.channels.accelerometer, Some(ChannelValue::Vector([1.0, 2.0, 3.0])));
        assert_eq!(r.channels.gyroscope, None);
        assert_eq!(r.channels.orientation, Some(ChannelValue::Vector([0.1, 0.2, 0.3])));
        assert_eq!(r.channels.gravity, Some(ChannelValue::Vector([7.0, 8.0, 9.0])));
    }

    #[test]
    fn unrecognised_shapes_pass_through() {
        let readings = normalize(&payload(json!([{
            "ts": 10,
            "gyroscope": [0.5, 0.25, 0.125],
            "gravity": {"qx": 1, "qy": 2},
        }])))
        .unwrap()
        .readings;

        assert_eq!(
            readings[0].channels.gyroscope,
            Some(ChannelValue::Raw(json!([0.5, 0.25, 0.125])))
        );
        assert_eq!(
            readings[0].channels.gravity,
            Some(ChannelValue::Raw(json!({"qx": 1, "qy": 2})))
        );
    }

    #[test]
    fn drops_readings_without_channels() {
        let normalized = normalize(&payload(json!([
            {"timestamp": 1.0},
            {"timestamp": 2.0, "accelerometer": null, "gyroscope": {}},
            {"timestamp": 3.0, "gravity": {"x": 0, "y": 0, "z": -9.8}},
        ])))
        .unwrap();

        assert_eq!(normalized.heartbeats, 2);
        assert_eq!(normalized.readings.len(), 1);
        assert_eq!(normalized.readings[0].timestamp.timestamp(), 3);
    }

    #[test]
    fn by_sensor_name_groups_by_derived_instant() {
        // 1700000000123 ms and 1700000000.123 s are the same instant.
        let readings = normalize(&payload(json!([
            {"name": "Accelerometer", "time": 1700000000123i64, "values": {"x": 1, "y": 2, "z": 3}},
            {"name": "gyroscope", "time": "1700000000.123", "values": {"x": 4, "y": 5, "z": 6}},
            {"name": "orientation", "time": 1700000000223000000i64, "pitch": 1, "roll": 2, "yaw": 3},
            {"name": "battery", "time": 1700000000323i64, "values": {"level": 0.5}},
        ])))
        .unwrap()
        .readings;

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].timestamp.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(
            readings[0].channels.accelerometer,
            Some(ChannelValue::Vector([1.0, 2.0, 3.0]))
        );
        assert_eq!(
            readings[0].channels.gyroscope,
            Some(ChannelValue::Vector([4.0, 5.0, 6.0]))
        );
        assert_eq!(readings[1].timestamp.timestamp_millis(), 1_700_000_000_223);
        assert_eq!(
            readings[1].channels.orientation,
            Some(ChannelValue::Vector([1.0, 2.0, 3.0]))
        );
    }

    #[test]
    fn unit_inference() {
        let secs = infer_timestamp(&json!(1700000000.5)).unwrap();
        let millis = infer_timestamp(&json!(1700000000500i64)).unwrap();
        let nanos = infer_timestamp(&json!(1700000000500000000i64)).unwrap();
        assert_eq!(secs, millis);
        assert_eq!(millis, nanos);

        let exact = infer_timestamp(&json!(1700000000000000001i64)).unwrap();
        assert_eq!(exact.timestamp_subsec_nanos(), 1);

        assert!(infer_timestamp(&json!("soon")).is_none());
        assert!(infer_timestamp(&json!(true)).is_none());
    }

    #[test]
    fn malformed_elements_reject_the_payload() {
        assert_eq!(
            normalize(&payload(json!([{"accelerometer": {"x": 1, "y": 2, "z": 3}}]))),
            Err(NormalizeError::MissingTimestamp { index: 0 })
        );
        assert_eq!(
            normalize(&payload(json!([{"timestamp": 1}, 5]))),
            Err(NormalizeError::NotAnObject { index: 1 })
        );
        assert!(matches!(
            normalize(&payload(json!([{"timestamp": "later"}]))),
            Err(NormalizeError::InvalidTimestamp { index: 0, .. })
        ));
    }

    #[test]
    fn unset_timestamp_keys_fall_through() {
        let readings = normalize(&payload(json!([
            {"timestamp": 0, "time": 1700000000, "gravity": {"x": 0, "y": 0, "z": 1}},
            {"timestamp": "", "time": null, "ts": 1700000001.5, "gravity": {"x": 0, "y": 0, "z": 1}},
        ])))
        .unwrap()
        .readings;
        assert_eq!(readings[0].timestamp.timestamp(), 1_700_000_000);
        assert_eq!(readings[1].timestamp.timestamp_millis(), 1_700_000_001_500);

        assert_eq!(
            normalize(&payload(json!([{"timestamp": 0, "ts": false, "gravity": {"x": 1}}]))),
            Err(NormalizeError::MissingTimestamp { index: 0 })
        );
    }

    #[test]
    fn by_sensor_name_reads_single_value_key() {
        let readings = normalize(&payload(json!([
            {"name": "gravity", "time": 1700000000000i64, "values": null, "value": {"x": 0, "y": 0, "z": 9.8}},
            {"name": "accelerometer", "time": 1700000000000i64, "value": {"x": 1, "y": 2, "z": 3}},
        ])))
        .unwrap()
        .readings;

        assert_eq!(readings.len(), 1);
        assert_eq!(
            readings[0].channels.gravity,
            Some(ChannelValue::Vector([0.0, 0.0, 9.8]))
        );
        assert_eq!(
            readings[0].channels.accelerometer,
            Some(ChannelValue::Vector([1.0, 2.0, 3.0]))
        );
    }
}
