//! Command line arguments for the recorder, parsed with clap.

use crate::config::SessionConfig;
use crate::subject::SubjectConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
/// Record phone motion sensors and a camera stream for one session
pub struct RecorderArgs {
    /// JSON array of {subject_id, activity, placement}, one per recorded
    /// subject, e.g. '[{"subject_id":1,"activity":"idle","placement":"back"}]'
    pub subjects: String,

    /// Session configuration file (RON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Address for the HTTP intake, e.g. 0.0.0.0:8000
    #[arg(short = 'b', long = "bind")]
    pub bind: Option<String>,

    /// SQLite database file
    #[arg(short = 'd', long = "database")]
    pub database: Option<PathBuf>,

    /// Camera source: synthetic[:WxH[@FPS]] or a stream URL
    #[arg(long = "camera")]
    pub camera: Option<String>,

    /// Directory for recorded video files
    #[arg(long = "video-dir")]
    pub video_dir: Option<PathBuf>,

    /// Per-subject sample rate, in samples per second
    #[arg(short = 's', long = "sample-rate")]
    pub sample_rate: Option<f64>,

    /// Show the terminal session monitor; press q to stop recording
    #[arg(long = "tui")]
    pub tui: bool,
}

impl RecorderArgs {
    /// Parses the launch subjects.
    pub fn launch_subjects(&self) -> Result<Vec<SubjectConfig>, serde_json::Error> {
        serde_json::from_str(&self.subjects)
    }

    /// Lays the flags that were given over `config`.
    pub fn apply(&self, config: &mut SessionConfig) {
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        if let Some(camera) = &self.camera {
            config.camera = camera.clone();
        }
        if let Some(video_dir) = &self.video_dir {
            config.video_dir = video_dir.clone();
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate_hz = rate;
        }
    }
}
