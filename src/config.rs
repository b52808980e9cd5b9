//! Session configuration, read from an optional RON file.
//!
//! Every field has a default, so an empty file (or no file) is a working
//! configuration. Command line flags are applied on top by the binary.

use crate::registry::StaticDevice;
use crate::video::source::{CameraSource, SourceParseError};
use serde::Deserialize;
use std::{collections::HashSet, fmt, fs, io, path::Path, path::PathBuf, time::Duration};

/// Why a configuration could not be used.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(io::Error),
    /// The file is not valid RON for [SessionConfig].
    Ron(ron::error::SpannedError),
    /// The values parsed but make no sense together.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {e}"),
            ConfigError::Ron(e) => write!(f, "cannot parse config: {e}"),
            ConfigError::Invalid(why) => write!(f, "invalid config: {why}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ron::error::SpannedError> for ConfigError {
    fn from(value: ron::error::SpannedError) -> Self {
        Self::Ron(value)
    }
}

impl From<SourceParseError> for ConfigError {
    fn from(value: SourceParseError) -> Self {
        Self::Invalid(value.to_string())
    }
}

/// Everything one recording session needs to know.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Address the HTTP intake listens on.
    pub bind: String,
    /// SQLite database file.
    pub database: PathBuf,
    /// Per-subject admission rate.
    pub sample_rate_hz: f64,
    /// Ingestion queue capacity, in records.
    pub queue_capacity: usize,
    /// Records per writer transaction batch, at most.
    pub batch_size: usize,
    /// How long the writer blocks waiting for records.
    pub writer_poll_ms: u64,
    /// Camera source, see [CameraSource].
    pub camera: String,
    /// Where video files are written.
    pub video_dir: PathBuf,
    /// Width every stored frame is resized to.
    pub frame_width: u32,
    /// Height every stored frame is resized to.
    pub frame_height: u32,
    /// Frame rate used when the camera does not report one.
    pub default_fps: f64,
    /// Static device table, the fallback for unmapped devices.
    pub devices: Vec<StaticDevice>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            database: PathBuf::from("sensor_data.sqlite3"),
            sample_rate_hz: 10.0,
            queue_capacity: 5000,
            batch_size: 500,
            writer_poll_ms: 1000,
            camera: "synthetic".to_string(),
            video_dir: PathBuf::from("recordings"),
            frame_width: 1280,
            frame_height: 720,
            default_fps: 20.0,
            devices: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Reads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Parses and validates RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values that deserialization alone cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |why: &str| Err(ConfigError::Invalid(why.to_string()));

        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return invalid("sample_rate_hz must be positive");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be positive");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.writer_poll_ms == 0 {
            return invalid("writer_poll_ms must be positive");
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return invalid("frame size must be positive");
        }
        if !(self.default_fps.is_finite() && self.default_fps > 0.0) {
            return invalid("default_fps must be positive");
        }
        self.camera_source()?;

        let mut seen = HashSet::new();
        for device in &self.devices {
            let key = crate::registry::device_key(&device.device_id);
            if key.is_empty() {
                return invalid("static device with empty device_id");
            }
            if !seen.insert(key) {
                return Err(ConfigError::Invalid(format!(
                    "static device {} listed twice",
                    device.device_id
                )));
            }
        }
        Ok(())
    }

    /// The parsed camera source.
    pub fn camera_source(&self) -> Result<CameraSource, SourceParseError> {
        self.camera.parse()
    }

    /// The writer's poll interval.
    pub fn writer_poll(&self) -> Duration {
        Duration::from_millis(self.writer_poll_ms)
    }
}
