//! The HTTP intake.
//!
//! | route          | body                                        |
//! |----------------|---------------------------------------------|
//! | `/configure`   | `[{subject_id, activity, placement}, ...]`  |
//! | `/map_subject` | `{deviceId, subject_id, activity?, placement?}` |
//! | `/data`        | `{deviceId, payload: [...]}`                |
//! | `/status`      | none (GET)                                  |
//!
//! Bodies are parsed as JSON whatever their content type, since the phone
//! apps are not consistent about sending one. Every error answer is a JSON
//! object with a single `error` string.

use crate::intake::{Intake, IntakeError};
use crate::registry::RegistryError;
use crate::shutdown::Shutdown;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::subject::{Activity, Placement, SubjectConfig, SubjectId};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{io, sync::Arc, time::Instant};
use tokio::net::TcpListener;

type Reply = (StatusCode, Json<Value>);

/// Everything the handlers share.
pub struct AppState {
    intake: Intake,
    stats: Arc<PipelineStats>,
    shutdown: Shutdown,
    started: Instant,
}

impl AppState {
    #[allow(missing_docs)]
    pub fn new(intake: Intake, stats: Arc<PipelineStats>, shutdown: Shutdown) -> Self {
        Self {
            intake,
            stats,
            shutdown,
            started: Instant::now(),
        }
    }

    /// The `/status` document.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            uptime_secs: self.started.elapsed().as_secs(),
            queue_depth: self.intake.queue().len(),
            queue_capacity: self.intake.queue().capacity(),
            stats: self.stats.snapshot(),
            shutting_down: self.shutdown.is_triggered(),
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize)]
#[allow(missing_docs)]
pub struct SessionStatus {
    pub uptime_secs: u64,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub shutting_down: bool,
}

#[derive(Debug, Deserialize)]
struct MapRequest {
    #[serde(rename = "deviceId", default)]
    device_id: Option<String>,
    subject_id: Option<SubjectId>,
    #[serde(default)]
    activity: Option<Activity>,
    #[serde(default)]
    placement: Option<Placement>,
}

#[derive(Debug, Deserialize)]
struct DataRequest {
    #[serde(rename = "deviceId", default)]
    device_id: Option<String>,
    #[serde(default)]
    payload: Vec<Value>,
}

fn fail(status: StatusCode, message: impl ToString) -> Reply {
    (status, Json(json!({ "error": message.to_string() })))
}

fn parse<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T, Reply> {
    serde_json::from_slice(body).map_err(|e| fail(StatusCode::BAD_REQUEST, e))
}

fn registry_failure(e: RegistryError) -> Reply {
    match e {
        RegistryError::MissingDeviceId => fail(StatusCode::BAD_REQUEST, e),
        RegistryError::Store(_) => {
            error!("Registry update failed: {e}");
            fail(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn configure(State(state): State<Arc<AppState>>, body: Bytes) -> Reply {
    let configs: Vec<SubjectConfig> = match parse(&body) {
        Ok(configs) => configs,
        Err(reply) => return reply,
    };

    let registry = state.intake.registry().clone();
    let result = tokio::task::spawn_blocking(move || registry.configure(&configs)).await;
    match result {
        Ok(Ok(subjects)) => {
            info!("Configured subjects {:?}", subjects.keys().collect::<Vec<_>>());
            (
                StatusCode::OK,
                Json(json!({ "status": "ok", "subjects": subjects })),
            )
        }
        Ok(Err(e)) => registry_failure(e),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn map_subject(State(state): State<Arc<AppState>>, body: Bytes) -> Reply {
    let request: MapRequest = match parse(&body) {
        Ok(request) => request,
        Err(reply) => return reply,
    };
    let device = request.device_id.unwrap_or_default();
    if device.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, RegistryError::MissingDeviceId);
    }
    let Some(subject) = request.subject_id else {
        return fail(StatusCode::BAD_REQUEST, "subject_id required");
    };

    let registry = state.intake.registry().clone();
    let result = tokio::task::spawn_blocking(move || {
        registry.map(&device, subject, request.activity, request.placement)
    })
    .await;
    match result {
        Ok(Ok(device)) => {
            info!("Mapped device {device} to subject {subject}");
            (
                StatusCode::OK,
                Json(json!({ "status": "ok", "device": device, "subject": subject })),
            )
        }
        Ok(Err(e)) => registry_failure(e),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn data(State(state): State<Arc<AppState>>, body: Bytes) -> Reply {
    let request: DataRequest = match parse(&body) {
        Ok(request) => request,
        Err(reply) => return reply,
    };
    let device = request.device_id.unwrap_or_default();

    match state.intake.ingest(&device, &request.payload) {
        Ok(summary) => {
            debug!("/data from {device}: {summary:?}");
            (
                StatusCode::OK,
                Json(json!({ "status": "queued", "records": request.payload.len() })),
            )
        }
        Err(e) => {
            if let IntakeError::Malformed(_) = e {
                warn!("Rejected payload from {device}: {e}");
            }
            fail(StatusCode::BAD_REQUEST, e)
        }
    }
}

async fn status(State(state): State<Arc<AppState>>) -> (StatusCode, Json<SessionStatus>) {
    (StatusCode::OK, Json(state.status()))
}

/// The intake routes over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/configure", post(configure))
        .route("/map_subject", post(map_subject))
        .route("/data", post(data))
        .route("/status", get(status))
        .with_state(state)
}

/// Serves the intake on `listener` until `shutdown` is raised, then lets
/// in-flight requests finish.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, shutdown: Shutdown) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP intake listening on {addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await?;
    info!("HTTP intake stopped");
    Ok(())
}
