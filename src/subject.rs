//! Experiment subjects and the metadata recorded alongside every sensor
//! sample: what the subject is doing, and where on the body the phone sits.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A small positive integer identifying a human participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SubjectId(u32);

impl SubjectId {
    /// Returns `None` for zero, which is never a valid subject.
    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    /// The raw integer value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// The launcher sends integers, but hand-written requests sometimes quote
// them, so both `7` and `"7"` are accepted.
impl<'de> Deserialize<'de> for SubjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Text(String),
        }

        let raw = match Raw::deserialize(deserializer)? {
            Raw::Int(n) => n,
            Raw::Text(s) => s.trim().parse::<u64>().map_err(|_| {
                serde::de::Error::custom(format!("subject_id {s:?} is not a positive integer"))
            })?,
        };

        u32::try_from(raw)
            .ok()
            .and_then(SubjectId::new)
            .ok_or_else(|| {
                serde::de::Error::custom(format!("subject_id {raw} is not a positive integer"))
            })
    }
}

/// The activity a subject performs for the duration of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Activity {
    SlowWalk,
    NormalWalk,
    FastWalk,
    Idle,
}

/// Where the phone is worn or carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Placement {
    LeftWrist,
    LeftFrontPocket,
    LeftBackPocket,
    LeftHand,
    LeftArm,
    RightWrist,
    RightFrontPocket,
    RightBackPocket,
    RightHand,
    RightArm,
    Back,
}

impl Activity {
    /// The tag written to the `activity` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Activity::SlowWalk => "slow_walk",
            Activity::NormalWalk => "normal_walk",
            Activity::FastWalk => "fast_walk",
            Activity::Idle => "idle",
        }
    }
}

impl Placement {
    /// The tag written to the `phone_placement` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Placement::LeftWrist => "left_wrist",
            Placement::LeftFrontPocket => "left_front_pocket",
            Placement::LeftBackPocket => "left_back_pocket",
            Placement::LeftHand => "left_hand",
            Placement::LeftArm => "left_arm",
            Placement::RightWrist => "right_wrist",
            Placement::RightFrontPocket => "right_front_pocket",
            Placement::RightBackPocket => "right_back_pocket",
            Placement::RightHand => "right_hand",
            Placement::RightArm => "right_arm",
            Placement::Back => "back",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully configured subject, as posted to `/configure` or passed on the
/// command line at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct SubjectConfig {
    pub subject_id: SubjectId,
    pub activity: Activity,
    pub placement: Placement,
}

/// What the registry knows about a subject so far. `/map_subject` may set
/// only one of the two fields, so either can be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct SubjectProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

impl SubjectProfile {
    /// Overwrites whichever fields are given; last write wins per field.
    pub fn merge(&mut self, activity: Option<Activity>, placement: Option<Placement>) {
        if let Some(activity) = activity {
            self.activity = Some(activity);
        }
        if let Some(placement) = placement {
            self.placement = Some(placement);
        }
    }

    /// The complete configuration, if both fields have been set.
    pub fn complete(&self, subject_id: SubjectId) -> Option<SubjectConfig> {
        Some(SubjectConfig {
            subject_id,
            activity: self.activity?,
            placement: self.placement?,
        })
    }
}
