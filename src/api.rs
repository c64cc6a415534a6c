use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::{Interval, RawInterval};
use crate::engine::Monitor;
use crate::error::ApiError;
use crate::models::{Dashboard, ProviderSnapshot, RoundSummary, TestMode};
use crate::notify::ProbeEvent;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct UpdateMessage {
    pub event: ProbeEvent,
    pub snapshot: ProviderSnapshot,
}

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub events: broadcast::Sender<UpdateMessage>,
    pub default_interval: Interval,
    pub default_mode: TestMode,
}

impl AppState {
    pub fn new(monitor: Arc<Monitor>, default_interval: Interval, default_mode: TestMode) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self { monitor, events, default_interval, default_mode }
    }

    /// Makes the SSE fan-out the monitor's update listener.
    pub fn forward_updates(&self) {
        let events = self.events.clone();
        self.monitor.updates().subscribe(move |event, snapshot| {
            // No connected renderer is not an error.
            let _ = events.send(UpdateMessage { event, snapshot: snapshot.clone() });
            Ok(())
        });
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub interval: Option<RawInterval>,
    pub mode: Option<String>,
}

pub async fn get_stats(State(state): State<AppState>) -> Json<Dashboard> {
    Json(state.monitor.dashboard().await)
}

pub async fn get_providers(State(state): State<AppState>) -> Json<Vec<ProviderSnapshot>> {
    Json(state.monitor.get_stats().await)
}

/// Both fields are optional, and so is the body itself.
pub async fn start(State(state): State<AppState>, body: Bytes) -> Result<Json<serde_json::Value>, ApiError> {
    let request: StartRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidInput(e.to_string()))?
    };
    let interval = match request.interval {
        Some(raw) => Interval::try_from(raw)?,
        None => state.default_interval,
    };
    let mode = match request.mode {
        Some(mode) => mode.parse::<TestMode>()?,
        None => state.default_mode,
    };
    let started = state.monitor.start(interval, mode).await.is_some();
    Ok(Json(serde_json::json!({ "started": started })))
}

pub async fn stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stopped = state.monitor.stop().await;
    Json(serde_json::json!({ "stopped": stopped }))
}

pub async fn run_round(State(state): State<AppState>) -> Json<RoundSummary> {
    Json(state.monitor.run_tests().await)
}

pub async fn clear(State(state): State<AppState>) -> StatusCode {
    state.monitor.clear_stats().await;
    StatusCode::NO_CONTENT
}

pub async fn test_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let online = state.monitor.test_provider(&id).await?;
    Ok(Json(serde_json::json!({ "id": id, "online": online })))
}

pub async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|message| {
        let message = message.ok()?;
        Event::default()
            .event(message.event.as_str())
            .json_data(&message.snapshot)
            .ok()
            .map(Ok)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/providers", get(get_providers))
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .route("/api/run", post(run_round))
        .route("/api/clear", post(clear))
        .route("/api/providers/{id}/test", post(test_one))
        .route("/api/events", get(events))
        .fallback_service(ServeDir::new("public"))
        .with_state(state)
}

pub async fn start_server(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Dashboard: http://localhost:{}", addr.port());
    axum::serve(listener, app).await?;
    Ok(())
}
