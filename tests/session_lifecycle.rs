use gaitrec::{
    queue,
    shutdown::Shutdown,
    stats::PipelineStats,
    store::{FrameLog, SensorStore},
    video::{
        capture::{spawn_capture, CapturePipeline, CaptureSettings},
        frame_file::FrameFile,
        source::{BuiltinBackend, CameraSource, SyntheticSpec},
    },
    writer::{spawn_writer, BatchWriter},
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tempfile::TempDir;

const WRITER_POLL: Duration = Duration::from_millis(100);

fn settings(dir: &TempDir, source: CameraSource) -> CaptureSettings {
    CaptureSettings {
        source,
        video_dir: dir.path().join("recordings"),
        width: 32,
        height: 18,
        default_fps: 20.0,
    }
}

#[test]
fn camera_failure_winds_down_the_writer() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("session.sqlite3");
    let shutdown = Shutdown::new();
    let stats = Arc::new(PipelineStats::new());

    let (_tx, rx) = queue::bounded(10, stats.clone());
    let writer = BatchWriter::new(SensorStore::open(&db).unwrap(), rx, shutdown.clone(), stats.clone())
        .poll(WRITER_POLL);
    let writer = spawn_writer(writer).unwrap();

    let capture = CapturePipeline::new(
        BuiltinBackend,
        Box::new(FrameLog::open(&db).unwrap()),
        settings(&dir, CameraSource::Stream("rtsp://10.255.255.1/stream".to_string())),
        shutdown.clone(),
        stats.clone(),
    );
    let report = spawn_capture(capture).unwrap().join().unwrap();
    assert!(report.fatal.is_some());
    assert!(shutdown.is_triggered());

    let raised = Instant::now();
    writer.join().unwrap();
    assert!(raised.elapsed() < WRITER_POLL * 10);
}

#[test]
fn synthetic_session_logs_every_frame() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("session.sqlite3");
    let shutdown = Shutdown::new();
    let stats = Arc::new(PipelineStats::new());

    let (_tx, rx) = queue::bounded(10, stats.clone());
    let writer = BatchWriter::new(SensorStore::open(&db).unwrap(), rx, shutdown.clone(), stats.clone())
        .poll(WRITER_POLL);
    let writer = spawn_writer(writer).unwrap();

    let source = CameraSource::Synthetic(SyntheticSpec {
        width: 64,
        height: 36,
        fps: 200.0,
        frame_limit: Some(12),
    });
    let capture = CapturePipeline::new(
        BuiltinBackend,
        Box::new(FrameLog::open(&db).unwrap()),
        settings(&dir, source),
        shutdown.clone(),
        stats.clone(),
    );
    let report = spawn_capture(capture).unwrap().join().unwrap();
    writer.join().unwrap();

    assert_eq!(report.frames, 12);
    let path = report.video_path.unwrap();
    assert!(path.starts_with(dir.path().join("recordings")));

    let video = FrameFile::from_path(&path).unwrap();
    assert_eq!(video.frames.len(), 12);
    assert_eq!(video.header.width, 32);
    assert_eq!(video.header.fps, 200.0);

    let filename = path.file_name().unwrap().to_str().unwrap();
    let rows = FrameLog::open(&db).unwrap().frames(filename).unwrap();
    let numbers: Vec<u64> = rows.iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, (1..=12).collect::<Vec<u64>>());
    assert_eq!(stats.snapshot().frames_captured, 12);
}
