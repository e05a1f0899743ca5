//! HTTP API handlers

use crate::adapters::mqtt::{MqttAdapter, MqttStatus};
use crate::bus::SharedBus;
use crate::config::ControllerConfig;
use crate::coordinator::{CoordinatorError, EntityCoordinator};
use crate::entity::{CommandOutcome, EntityCommand, MediaPlayerView};
use crate::media::{validate_media_url, BrowseMedia};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: EntityCoordinator,
    pub mqtt: Arc<MqttAdapter>,
    pub controller: Arc<ControllerConfig>,
    pub bus: SharedBus,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        coordinator: EntityCoordinator,
        mqtt: Arc<MqttAdapter>,
        controller: ControllerConfig,
        bus: SharedBus,
    ) -> Self {
        Self {
            coordinator,
            mqtt,
            controller: Arc::new(controller),
            bus,
            started_at: Utc::now(),
        }
    }
}

/// Build the HTTP router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/entities", get(entities_handler))
        .route("/entities/{entity_id}", get(entity_handler))
        .route("/entities/{entity_id}/command", post(command_handler))
        .route("/entities/{entity_id}/browse", get(browse_handler))
        // Event stream (SSE)
        .route("/events", get(events_handler))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoordinatorError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            CoordinatorError::UnknownEntity(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Snapshot(_) => StatusCode::BAD_GATEWAY,
        };
        error_response(status, self)
    }
}

/// Controller labels reported by `/status`
#[derive(Serialize)]
pub struct ControllerStatus {
    pub base_url: String,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub firmware: Option<String>,
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub ready: bool,
    pub controller: ControllerStatus,
    pub entities: usize,
    pub entities_available: usize,
    pub mqtt: MqttStatus,
    pub bus_subscribers: usize,
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let (entities, entities_available) = match state.coordinator.registry() {
        Some(registry) => {
            let views = registry.views().await;
            let available = views.iter().filter(|v| v.available).count();
            (views.len(), available)
        }
        None => (0, 0),
    };

    Json(StatusResponse {
        service: "amplipi-control",
        version: env!("AMPLIPI_CONTROL_VERSION"),
        git_sha: env!("AMPLIPI_CONTROL_GIT_SHA"),
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds().max(0) as u64,
        ready: state.coordinator.registry().is_some(),
        controller: ControllerStatus {
            base_url: state.coordinator.base_url().to_string(),
            name: state.controller.name.clone(),
            vendor: state.controller.vendor.clone(),
            version: state.controller.version.clone(),
            firmware: state.coordinator.firmware_version().await,
        },
        entities,
        entities_available,
        mqtt: state.mqtt.get_status().await,
        bus_subscribers: state.bus.subscriber_count(),
    })
}

// =============================================================================
// Entity handlers
// =============================================================================

/// GET /entities - All entity views, sources then zones then groups
pub async fn entities_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<MediaPlayerView>>, CoordinatorError> {
    let registry = state
        .coordinator
        .registry()
        .ok_or(CoordinatorError::NotReady)?;
    Ok(Json(registry.views().await))
}

/// GET /entities/{entity_id}
pub async fn entity_handler(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Json<MediaPlayerView>, CoordinatorError> {
    Ok(Json(state.coordinator.view(&entity_id).await?))
}

/// Parse and pre-validate a command body.
fn parse_command(body: serde_json::Value) -> Result<EntityCommand, String> {
    let command: EntityCommand =
        serde_json::from_value(body).map_err(|e| format!("invalid command: {}", e))?;
    if let EntityCommand::Announce { media, .. } = &command {
        validate_media_url(media).map_err(|e| e.to_string())?;
    }
    Ok(command)
}

/// POST /entities/{entity_id}/command
///
/// Unresolvable commands answer 200 with an `ignored` outcome; controller
/// failures answer 502 with the `failed` outcome as the body.
pub async fn command_handler(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let command = match parse_command(body) {
        Ok(command) => command,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match state.coordinator.command(&entity_id, command).await {
        Ok(outcome @ CommandOutcome::Failed { .. }) => {
            (StatusCode::BAD_GATEWAY, Json(outcome)).into_response()
        }
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /entities/{entity_id}/browse - Streams playable on this entity
pub async fn browse_handler(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Json<BrowseMedia>, CoordinatorError> {
    Ok(Json(state.coordinator.browse(&entity_id).await?))
}

// =============================================================================
// SSE Events
// =============================================================================

/// GET /events - Server-Sent Events stream
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
            Err(_) => None,
        },
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
