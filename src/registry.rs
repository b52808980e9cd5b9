//! Which phone belongs to which subject, and what each subject is doing.
//!
//! Device ids are resolved against the mappings set through `/map_subject`
//! first, then against the static table loaded at startup. Both maps, and
//! the subject profiles, are read on every `/data` request and written only
//! by the configuration endpoints.

use crate::store::{SensorStore, StoreError};
use crate::subject::{Activity, Placement, SubjectConfig, SubjectId, SubjectProfile};
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

/// One row of the static fallback table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[allow(missing_docs)]
pub struct StaticDevice {
    pub device_id: String,
    pub subject_id: SubjectId,
}

/// Failures of the configuration calls.
#[derive(Debug)]
pub enum RegistryError {
    /// The device id was empty.
    MissingDeviceId,
    /// Ensuring a subject table failed.
    Store(StoreError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistryError::MissingDeviceId => write!(f, "deviceId required"),
            RegistryError::Store(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<StoreError> for RegistryError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Normalizes a transport-level device id for lookups.
pub fn device_key(device_id: &str) -> String {
    device_id.trim().to_lowercase()
}

/// The device mapping registry and the subject configuration map.
pub struct DeviceRegistry {
    static_devices: Vec<(String, SubjectId)>,
    dynamic: RwLock<HashMap<String, SubjectId>>,
    profiles: RwLock<HashMap<SubjectId, SubjectProfile>>,
    // Only touched by the configuration calls, never by `/data`.
    tables: Mutex<SensorStore>,
}

impl DeviceRegistry {
    /// Builds a registry whose static fallback table is `static_devices`.
    /// `tables` is used to create subject tables as subjects appear.
    pub fn new(static_devices: &[StaticDevice], tables: SensorStore) -> Self {
        let mut static_devices: Vec<(String, SubjectId)> = static_devices
            .iter()
            .map(|d| (device_key(&d.device_id), d.subject_id))
            .collect();
        // Launch slots follow the static subject order.
        static_devices.sort_by_key(|(_, subject)| *subject);

        Self {
            static_devices,
            dynamic: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            tables: Mutex::new(tables),
        }
    }

    /// The subject a device currently reports for, if any.
    pub fn resolve(&self, device_id: &str) -> Option<SubjectId> {
        let key = device_key(device_id);
        if let Some(subject) = self.dynamic.read().get(&key) {
            return Some(*subject);
        }
        self.static_devices
            .iter()
            .find(|(device, _)| *device == key)
            .map(|(_, subject)| *subject)
    }

    /// The complete configuration of `subject`, if both its activity and
    /// placement are known.
    pub fn subject_config(&self, subject: SubjectId) -> Option<SubjectConfig> {
        self.profiles.read().get(&subject)?.complete(subject)
    }

    /// Snapshot of every subject profile.
    pub fn profiles(&self) -> BTreeMap<SubjectId, SubjectProfile> {
        self.profiles
            .read()
            .iter()
            .map(|(id, profile)| (*id, *profile))
            .collect()
    }

    /// Upserts every configuration and makes sure each subject has a table.
    /// Idempotent. Tables are created before any profile changes, so a
    /// storage failure leaves the registry untouched.
    pub fn configure(
        &self,
        configs: &[SubjectConfig],
    ) -> Result<BTreeMap<SubjectId, SubjectProfile>, RegistryError> {
        {
            let mut tables = self.tables.lock();
            for config in configs {
                tables.ensure_subject_table(config.subject_id)?;
            }
        }

        {
            let mut profiles = self.profiles.write();
            for config in configs {
                profiles.insert(
                    config.subject_id,
                    SubjectProfile {
                        activity: Some(config.activity),
                        placement: Some(config.placement),
                    },
                );
            }
        }

        Ok(self.profiles())
    }

    /// Points `device_id` at `subject`, merging whichever of `activity` and
    /// `placement` are given into the subject's profile.
    pub fn map(
        &self,
        device_id: &str,
        subject: SubjectId,
        activity: Option<Activity>,
        placement: Option<Placement>,
    ) -> Result<String, RegistryError> {
        let key = device_key(device_id);
        if key.is_empty() {
            return Err(RegistryError::MissingDeviceId);
        }

        self.tables.lock().ensure_subject_table(subject)?;

        if activity.is_some() || placement.is_some() {
            self.profiles
                .write()
                .entry(subject)
                .or_default()
                .merge(activity, placement);
        }
        if let Some(previous) = self.dynamic.write().insert(key.clone(), subject) {
            if previous != subject {
                info!("Device {key} moved from subject {previous} to subject {subject}");
            }
        }
        Ok(key)
    }

    /// Applies the launch configuration: every subject is configured, and
    /// the i-th subject is mapped to the i-th static device (ordered by its
    /// static subject id). Returns the device assignments made.
    pub fn seed_launch_subjects(
        &self,
        configs: &[SubjectConfig],
    ) -> Result<Vec<(String, SubjectId)>, RegistryError> {
        self.configure(configs)?;

        if configs.len() > self.static_devices.len() {
            warn!(
                "{} subjects given but only {} static devices known; the rest need /map_subject",
                configs.len(),
                self.static_devices.len()
            );
        }

        let assignments: Vec<(String, SubjectId)> = self
            .static_devices
            .iter()
            .zip(configs)
            .map(|((device, _), config)| (device.clone(), config.subject_id))
            .collect();

        let mut dynamic = self.dynamic.write();
        for (device, subject) in &assignments {
            info!("Slot device {device} records subject {subject}");
            dynamic.insert(device.clone(), *subject);
        }
        Ok(assignments)
    }
}
