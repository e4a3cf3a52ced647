use std::{
    convert::Infallible,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{info, warn};

use crate::{
    config::ComSettings,
    engine::Pose,
    error::{ComError, SessionError},
    mesh::Mesh,
    scene::{ObjectId, Scene, SceneSnapshot},
    scene_file::{SceneFile, SceneLoader},
    scheduler::TokioTimer,
    session::ComSession,
};

pub struct WebServerConfig {
    pub scene: SceneFile,
    pub host: String,
    pub port: u16,
    /// Where to write the scene back on shutdown, if anywhere.
    pub save_to: Option<PathBuf>,
}

pub struct AppState {
    session: Mutex<ComSession<TokioTimer>>,
}

impl AppState {
    pub fn new(session: ComSession<TokioTimer>) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

#[derive(Serialize)]
pub struct StateEnvelope {
    pub scene: SceneSnapshot,
    pub settings: ComSettings,
    pub running: bool,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub interval_ms: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct Selection {
    pub objects: Vec<String>,
}

#[derive(Deserialize)]
pub struct MassValues {
    pub objects: Vec<String>,
    #[serde(default)]
    pub density: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct MassOpResponse {
    pub op: String,
    pub affected: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Conflict(String),
    NotFound(String),
    Unprocessable(String),
}

impl From<ComError> for ApiError {
    fn from(err: ComError) -> Self {
        match err {
            ComError::UnknownObject(_) | ComError::UnknownGroup(_) => {
                ApiError::NotFound(err.to_string())
            }
            _ => ApiError::Unprocessable(err.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Com(err) => err.into(),
            SessionError::Scheduler(err) => ApiError::Conflict(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/state", get(latest_state))
        .route("/api/update", post(update))
        .route("/api/timer/start", post(start_timer))
        .route("/api/timer/stop", post(stop_timer))
        .route("/api/settings", get(settings).post(replace_settings))
        .route("/api/mass", put(set_mass_values))
        .route("/api/mass/:op", post(mass_op))
        .route("/api/events", get(stream_events))
        .with_state(state)
}

pub async fn run(config: WebServerConfig) -> Result<()> {
    let WebServerConfig {
        scene,
        host,
        port,
        save_to,
    } = config;

    let settings = scene.settings.clone();
    let shared = Arc::new(Mutex::new(scene.build_scene()));
    let timer = TokioTimer::current()?;
    let state = Arc::new(AppState::new(ComSession::new(shared.clone(), settings, timer)));

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, scene = %scene.name, "center of mass panel listening");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let settings = {
        let mut session = state.session.lock();
        session.stop_continuous();
        session.settings().clone()
    };
    if let Some(path) = save_to {
        let file = SceneFile::capture(&shared.lock(), &settings);
        let written = SceneLoader::new(".").save(&path, &file)?;
        info!(path = %written.display(), "scene saved");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to listen for ctrl-c");
    }
    info!("shutting down center of mass panel");
}

async fn latest_state(State(state): State<Arc<AppState>>) -> Json<StateEnvelope> {
    let session = state.session.lock();
    let stats = session.stats();
    let scene = session.scene().lock().snapshot();
    Json(StateEnvelope {
        scene,
        settings: session.settings().clone(),
        running: session.is_running(),
        ticks: stats.ticks,
        failed_ticks: stats.failures,
        interval_ms: stats.interval.map(|d| d.as_millis() as u64),
        started_at: stats.started_at,
    })
}

async fn update(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Pose>, ApiError> {
    let pose = state.session.lock().update_now()?;
    Ok(Json(pose))
}

async fn start_timer(
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.session.lock().start_continuous()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_timer(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.lock().stop_continuous();
    StatusCode::NO_CONTENT
}

async fn settings(State(state): State<Arc<AppState>>) -> Json<ComSettings> {
    Json(state.session.lock().settings().clone())
}

async fn replace_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<ComSettings>,
) -> Result<Json<ComSettings>, ApiError> {
    settings
        .validate()
        .map_err(|err| ApiError::Unprocessable(err.to_string()))?;
    state
        .session
        .lock()
        .set_settings(settings.clone())
        .map_err(|err| ApiError::Conflict(err.to_string()))?;
    info!(?settings, "settings replaced");
    Ok(Json(settings))
}

async fn set_mass_values(
    State(state): State<Arc<AppState>>,
    Json(values): Json<MassValues>,
) -> Result<Json<MassOpResponse>, ApiError> {
    let session = state.session.lock();
    let mut scene = session.scene().lock();
    let ids = resolve_selection(&scene, &values.objects)?;
    let affected = scene.set_mass_values(&ids, values.density, values.volume)?;
    Ok(Json(MassOpResponse {
        op: "set".to_string(),
        affected,
    }))
}

async fn mass_op(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    Json(selection): Json<Selection>,
) -> Result<Json<MassOpResponse>, ApiError> {
    let session = state.session.lock();
    let mut scene = session.scene().lock();
    let ids = resolve_selection(&scene, &selection.objects)?;
    let affected = apply_mass_op(&mut scene, &op, &ids)
        .ok_or_else(|| ApiError::NotFound(format!("unknown mass operation '{op}'")))?;
    Ok(Json(MassOpResponse { op, affected }))
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.session.lock().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        let pose = msg.ok()?;
        let payload = serde_json::to_string(&pose).ok()?;
        Some(Ok(Event::default().event("pose").data(payload)))
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(2))
            .text("keep-alive"),
    )
}

fn resolve_selection(scene: &Scene, names: &[String]) -> Result<Vec<ObjectId>, ApiError> {
    names
        .iter()
        .map(|name| {
            scene
                .find(name)
                .ok_or_else(|| ComError::UnknownObject(name.clone()).into())
        })
        .collect()
}

/// Applies a named mass operation to `ids`. `None` for an unknown name.
pub fn apply_mass_op(scene: &mut Scene, op: &str, ids: &[ObjectId]) -> Option<usize> {
    let affected = match op {
        "add" => scene.add_mass_properties(ids),
        "remove" => scene.remove_mass_properties(ids),
        "activate" => scene.set_active_all(ids, true),
        "deactivate" => scene.set_active_all(ids, false),
        "toggle" => scene.toggle_active(ids),
        "volume" => scene.recalculate_volume(ids, Mesh::volume),
        _ => return None,
    };
    Some(affected)
}
