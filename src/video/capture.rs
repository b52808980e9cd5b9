//! The capture loop.
//!
//! ```text
//! Idle -> Opening -> Capturing -> Stopped
//!            |                      ^
//!            +----------------------+   (any open failure)
//! ```
//!
//! Every frame that reaches the video file is rotated 180 degrees and
//! resized to the target size by the backend, in the backend's own frame
//! representation, and gets exactly one metadata row whose
//! `frame_number` is its 1-based position in the file. A failure to open
//! anything, a failed read or the end of the stream is fatal: it raises the
//! shutdown signal so the rest of the session winds down with the camera.

use super::source::{CameraBackend, CameraSource, FrameSource, VideoSink};
use super::VideoError;
use crate::record::FrameRecord;
use crate::shutdown::Shutdown;
use crate::stats::PipelineStats;
use crate::store::FrameLogger;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::{
    fmt, fs, io,
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
};

/// Where the pipeline is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CaptureState {
    Idle,
    Opening,
    Capturing,
    Stopped,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Opening => "opening",
            CaptureState::Capturing => "capturing",
            CaptureState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What to capture and how to store it.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// The camera.
    pub source: CameraSource,
    /// Directory the video file is created in.
    pub video_dir: PathBuf,
    /// Stored frame width.
    pub width: u32,
    /// Stored frame height.
    pub height: u32,
    /// Rate used when the stream reports none.
    pub default_fps: f64,
}

/// How a capture session ended.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    /// The video file, if one was created.
    pub video_path: Option<PathBuf>,
    /// Frames written to the video file.
    pub frames: u64,
    /// Set when the session ended because of a failure rather than a
    /// shutdown request.
    pub fatal: Option<String>,
}

struct OpenSession<B: CameraBackend> {
    camera: B::Source,
    sink: B::Sink,
    filename: String,
    path: PathBuf,
}

/// Name of a video file started at `started`. Frame rows are stamped in
/// UTC, and so is the file name.
pub fn video_filename(started: DateTime<Utc>, extension: &str) -> String {
    format!("capture_{}.{extension}", started.format("%Y%m%d_%H%M%S"))
}

/// The capture worker. Owns its camera, its video file and its own
/// storage connection.
pub struct CapturePipeline<B: CameraBackend> {
    backend: B,
    frames_log: Box<dyn FrameLogger + Send>,
    settings: CaptureSettings,
    shutdown: Shutdown,
    stats: Arc<PipelineStats>,
    state: CaptureState,
}

impl<B: CameraBackend> CapturePipeline<B> {
    /// A pipeline in the [CaptureState::Idle] state.
    pub fn new(
        backend: B,
        frames_log: Box<dyn FrameLogger + Send>,
        settings: CaptureSettings,
        shutdown: Shutdown,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            backend,
            frames_log,
            settings,
            shutdown,
            stats,
            state: CaptureState::Idle,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> CaptureState {
        self.state
    }

    fn enter(&mut self, state: CaptureState) {
        info!("Capture: {} -> {state}", self.state);
        self.state = state;
    }

    /// Runs the whole lifecycle on the calling thread.
    pub fn run(mut self) -> CaptureReport {
        self.enter(CaptureState::Opening);
        let mut session = match self.open() {
            Ok(session) => session,
            Err(e) => {
                let why = format!("cannot start capture: {e}");
                error!("{why}");
                self.enter(CaptureState::Stopped);
                self.shutdown.trigger(why.clone());
                return CaptureReport {
                    video_path: None,
                    frames: 0,
                    fatal: Some(why),
                };
            }
        };

        self.enter(CaptureState::Capturing);
        info!("Recording video to {}", session.path.display());
        let (frames, fatal) = self.capture(&mut session);

        self.enter(CaptureState::Stopped);
        if let Err(e) = session.sink.finish() {
            error!("Cannot finalize {}: {e}", session.path.display());
        }
        if let Some(why) = &fatal {
            self.shutdown.trigger(why.clone());
        }
        info!("Video saved: {} ({frames} frames)", session.path.display());

        CaptureReport {
            video_path: Some(session.path),
            frames,
            fatal,
        }
    }

    fn open(&mut self) -> Result<OpenSession<B>, VideoError> {
        let settings = &self.settings;
        fs::create_dir_all(&settings.video_dir)?;
        self.frames_log.ensure_table()?;

        let camera = self.backend.open_source(&settings.source)?;
        let fps = camera
            .fps()
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(settings.default_fps);

        let filename = video_filename(Utc::now(), self.backend.extension());
        let path = settings.video_dir.join(&filename);
        let sink = self
            .backend
            .open_sink(&path, settings.width, settings.height, fps)?;
        info!(
            "Camera {} open, {}x{} at {fps} fps",
            settings.source, settings.width, settings.height
        );

        Ok(OpenSession {
            camera,
            sink,
            filename,
            path,
        })
    }

    /// The capturing state. Returns the frame count and, if it stopped on
    /// its own, why.
    fn capture(&mut self, session: &mut OpenSession<B>) -> (u64, Option<String>) {
        let mut frame_number = 0u64;

        while !self.shutdown.is_triggered() {
            let frame = match session.camera.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return (frame_number, Some("camera stream ended".to_string())),
                Err(e) => return (frame_number, Some(format!("camera read failed: {e}"))),
            };
            let timestamp = Utc::now();

            let (width, height) = (self.settings.width, self.settings.height);
            let frame = match self.backend.upright(frame, width, height) {
                Ok(frame) => frame,
                Err(e) => return (frame_number, Some(format!("frame transform failed: {e}"))),
            };
            if let Err(e) = session.sink.write_frame(&frame) {
                return (frame_number, Some(format!("video write failed: {e}")));
            }

            frame_number += 1;
            self.stats.record_frame();
            let record = FrameRecord {
                filename: session.filename.clone(),
                frame_number,
                timestamp,
            };
            if let Err(e) = self.frames_log.log_frame(&record) {
                self.stats.record_frame_log_failure();
                warn!("Frame {frame_number} metadata not logged: {e}");
            }
            if frame_number % 1000 == 0 {
                debug!("Captured {frame_number} frames");
            }
        }

        (frame_number, None)
    }
}

/// Runs `pipeline` on its own named thread.
pub fn spawn_capture<B>(pipeline: CapturePipeline<B>) -> io::Result<JoinHandle<CaptureReport>>
where
    B: CameraBackend + 'static,
{
    thread::Builder::new()
        .name("video-capture".to_string())
        .spawn(move || pipeline.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FrameLog, StoreError};
    use crate::video::frame::{solid, Frame};
    use crate::video::frame_file::{FrameFile, FrameFileWriter};
    use crate::video::source::{BuiltinBackend, SyntheticSpec};
    use image::Rgb;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, source: CameraSource) -> CaptureSettings {
        CaptureSettings {
            source,
            video_dir: dir.path().join("videos"),
            width: 8,
            height: 4,
            default_fps: 20.0,
        }
    }

    fn synthetic(limit: Option<u64>) -> CameraSource {
        CameraSource::Synthetic(SyntheticSpec {
            width: 16,
            height: 8,
            fps: 500.0,
            frame_limit: limit,
        })
    }

    fn frame_log(dir: &TempDir) -> FrameLog {
        FrameLog::open(dir.path().join("db.sqlite3")).unwrap()
    }

    #[test]
    fn every_stored_frame_gets_one_row() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(PipelineStats::new());
        let shutdown = Shutdown::new();
        let pipeline = CapturePipeline::new(
            BuiltinBackend,
            Box::new(frame_log(&dir)),
            settings(&dir, synthetic(Some(5))),
            shutdown.clone(),
            stats.clone(),
        );
        assert_eq!(pipeline.state(), CaptureState::Idle);

        let report = pipeline.run();
        assert_eq!(report.frames, 5);
        assert_eq!(report.fatal.as_deref(), Some("camera stream ended"));
        assert!(shutdown.is_triggered());
        assert_eq!(stats.snapshot().frames_captured, 5);

        let path = report.video_path.unwrap();
        let filename = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(filename.starts_with("capture_") && filename.ends_with(".rvf"));
        let named = chrono::NaiveDateTime::parse_from_str(&filename, "capture_%Y%m%d_%H%M%S.rvf")
            .unwrap()
            .and_utc();
        assert!((Utc::now() - named).num_seconds().abs() < 60);

        let video = FrameFile::from_path(&path).unwrap();
        assert_eq!(video.frames.len(), 5);
        assert_eq!(video.header.fps, 500.0);
        assert!(video.frames.iter().all(|f| f.width() == 8 && f.height() == 4));

        let rows = frame_log(&dir).frames(&filename).unwrap();
        let numbers: Vec<u64> = rows.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert!(rows.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn stops_cleanly_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(PipelineStats::new());
        let shutdown = Shutdown::new();
        let pipeline = CapturePipeline::new(
            BuiltinBackend,
            Box::new(frame_log(&dir)),
            settings(&dir, synthetic(None)),
            shutdown.clone(),
            stats.clone(),
        );
        let handle = spawn_capture(pipeline).unwrap();

        while stats.snapshot().frames_captured < 3 {
            thread::sleep(std::time::Duration::from_millis(2));
        }
        shutdown.trigger("operator stop");
        let report = handle.join().unwrap();

        assert_eq!(report.fatal, None);
        assert_eq!(shutdown.reason().as_deref(), Some("operator stop"));
        let video = FrameFile::from_path(report.video_path.unwrap()).unwrap();
        assert_eq!(video.frames.len() as u64, report.frames);
    }

    #[test]
    fn unopenable_camera_triggers_shutdown() {
        let dir = TempDir::new().unwrap();
        let shutdown = Shutdown::new();
        let pipeline = CapturePipeline::new(
            BuiltinBackend,
            Box::new(frame_log(&dir)),
            settings(&dir, CameraSource::Stream("rtsp://nowhere".to_string())),
            shutdown.clone(),
            Arc::new(PipelineStats::new()),
        );

        let report = pipeline.run();
        assert_eq!(report.video_path, None);
        assert_eq!(report.frames, 0);
        assert!(report.fatal.is_some());
        assert!(shutdown.is_triggered());
    }

    struct FlakyLog {
        calls: u64,
    }

    impl FrameLogger for FlakyLog {
        fn ensure_table(&mut self) -> Result<(), StoreError> {
            Ok(())
        }

        fn log_frame(&mut self, _frame: &FrameRecord) -> Result<(), StoreError> {
            self.calls += 1;
            if self.calls == 2 {
                return Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery));
            }
            Ok(())
        }
    }

    #[test]
    fn metadata_failure_does_not_stop_capture() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(PipelineStats::new());
        let pipeline = CapturePipeline::new(
            BuiltinBackend,
            Box::new(FlakyLog { calls: 0 }),
            settings(&dir, synthetic(Some(4))),
            Shutdown::new(),
            stats.clone(),
        );

        let report = pipeline.run();
        assert_eq!(report.frames, 4);
        assert_eq!(stats.snapshot().frame_log_failures, 1);
    }

    #[test]
    fn stored_frames_are_upright() {
        struct OneFrame(Option<Frame>);
        impl FrameSource for OneFrame {
            type Frame = Frame;

            fn fps(&self) -> Option<f64> {
                None
            }
            fn read_frame(&mut self) -> Result<Option<Frame>, VideoError> {
                Ok(self.0.take())
            }
        }
        struct OneFrameBackend;
        impl CameraBackend for OneFrameBackend {
            type Frame = Frame;
            type Source = OneFrame;
            type Sink = FrameFileWriter;

            fn extension(&self) -> &'static str {
                "rvf"
            }
            fn open_source(&self, _: &CameraSource) -> Result<OneFrame, VideoError> {
                let mut frame = solid(8, 4, [0, 0, 0]);
                frame.put_pixel(0, 0, Rgb([255, 0, 0]));
                Ok(OneFrame(Some(frame)))
            }
            fn open_sink(
                &self,
                path: &std::path::Path,
                width: u32,
                height: u32,
                fps: f64,
            ) -> Result<FrameFileWriter, VideoError> {
                BuiltinBackend.open_sink(path, width, height, fps)
            }
            fn upright(&self, frame: Frame, width: u32, height: u32) -> Result<Frame, VideoError> {
                BuiltinBackend.upright(frame, width, height)
            }
        }

        let dir = TempDir::new().unwrap();
        let report = CapturePipeline::new(
            OneFrameBackend,
            Box::new(frame_log(&dir)),
            settings(&dir, synthetic(None)),
            Shutdown::new(),
            Arc::new(PipelineStats::new()),
        )
        .run();

        let video = FrameFile::from_path(report.video_path.unwrap()).unwrap();
        assert_eq!(video.header.fps, 20.0);
        assert_eq!(video.frames[0].get_pixel(7, 3), &Rgb([255, 0, 0]));
        assert_eq!(video.frames[0].get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn video_names_use_utc() {
        let started = DateTime::parse_from_rfc3339("2024-03-09T23:59:58-05:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(video_filename(started, "avi"), "capture_20240310_045958.avi");
    }
}
