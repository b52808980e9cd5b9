//! Runs one recording session.
//!
//! ```text
//! gaitrec --config session.ron \
//!     '[{"subject_id":1,"activity":"normal_walk","placement":"left_front_pocket"}]'
//! ```
//!
//! Stops on ctrl-c / SIGTERM, on `q` in the `--tui` monitor, or when the
//! camera fails. Exits with 1 in the last case.

use clap::Parser;
use env_logger::Env;
use gaitrec::{
    args::RecorderArgs,
    config::SessionConfig,
    gui::{session_monitor, MonitorView},
    intake::Intake,
    queue,
    registry::DeviceRegistry,
    server::{serve, AppState},
    shutdown::{listen_for_signals, Shutdown},
    stats::PipelineStats,
    store::{FrameLog, SensorStore},
    throttle::SampleThrottle,
    video::{
        capture::{spawn_capture, CapturePipeline, CaptureSettings},
        source::DefaultBackend,
    },
    writer::{spawn_writer, BatchWriter},
};
use log::{error, info, warn};
use std::{error::Error, process::ExitCode, sync::Arc, time::Duration};
use tokio::net::TcpListener;

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = RecorderArgs::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: RecorderArgs) -> Result<ExitCode, Box<dyn Error>> {
    let subjects = args
        .launch_subjects()
        .map_err(|e| format!("invalid subjects argument: {e}"))?;

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    let camera = config.camera_source()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let listener = runtime.block_on(TcpListener::bind(&config.bind))?;

    let shutdown = Shutdown::new();
    let stats = Arc::new(PipelineStats::new());

    let registry = Arc::new(DeviceRegistry::new(
        &config.devices,
        SensorStore::open(&config.database)?,
    ));
    registry.seed_launch_subjects(&subjects)?;
    info!(
        "Session with {} subjects, database {}",
        subjects.len(),
        config.database.display()
    );

    let (ingest_queue, receiver) = queue::bounded(config.queue_capacity, stats.clone());
    let writer = BatchWriter::new(
        SensorStore::open(&config.database)?,
        receiver,
        shutdown.clone(),
        stats.clone(),
    )
    .batch_size(config.batch_size)
    .poll(config.writer_poll());
    let writer_handle = spawn_writer(writer)?;

    let capture = CapturePipeline::new(
        DefaultBackend::default(),
        Box::new(FrameLog::open(&config.database)?),
        CaptureSettings {
            source: camera,
            video_dir: config.video_dir.clone(),
            width: config.frame_width,
            height: config.frame_height,
            default_fps: config.default_fps,
        },
        shutdown.clone(),
        stats.clone(),
    );
    let capture_handle = match spawn_capture(capture) {
        Ok(handle) => handle,
        Err(e) => {
            shutdown.trigger("cannot start capture thread");
            let _ = writer_handle.join();
            return Err(e.into());
        }
    };

    let intake = Intake::new(
        registry,
        SampleThrottle::new(config.sample_rate_hz),
        ingest_queue,
        stats.clone(),
    );
    let state = Arc::new(AppState::new(intake, stats, shutdown.clone()));

    let server = {
        let (state, shutdown) = (state.clone(), shutdown.clone());
        runtime.spawn(async move {
            if let Err(e) = serve(listener, state, shutdown.clone()).await {
                error!("HTTP intake failed: {e}");
                shutdown.trigger("HTTP intake failed");
            }
        })
    };
    runtime.spawn(listen_for_signals(shutdown.clone()));

    if args.tui {
        let monitored = session_monitor(&shutdown, |elapsed| {
            let status = state.status();
            MonitorView {
                elapsed,
                queue_depth: status.queue_depth,
                queue_capacity: status.queue_capacity,
                stats: status.stats,
            }
        });
        if let Err(e) = monitored {
            warn!("Session monitor closed: {e}; recording continues until interrupted");
        }
    }
    shutdown.wait();

    if let Err(e) = runtime.block_on(server) {
        error!("HTTP intake task: {e}");
    }
    if writer_handle.join().is_err() {
        error!("DB writer thread panicked");
    }
    let report = match capture_handle.join() {
        Ok(report) => report,
        Err(_) => {
            error!("Capture thread panicked");
            return Ok(ExitCode::FAILURE);
        }
    };
    runtime.shutdown_timeout(Duration::from_secs(1));

    let final_stats = state.status();
    info!(
        "Session over: {} rows written, {} lost, {} dropped, {} frames",
        final_stats.stats.rows_written,
        final_stats.stats.rows_lost,
        final_stats.stats.dropped,
        report.frames
    );

    Ok(match report.fatal {
        Some(why) => {
            error!("Recording stopped early: {why}");
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    })
}
