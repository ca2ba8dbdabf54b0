//! HTTP administrative surface.
//!
//! Thin 1:1 mapping onto registry and room operations: room creation and
//! deletion, read-only getters, settings updates, and service statistics.
//! Room IDs are minted here; the registry only validates them.

pub mod error;

pub use error::{AppError, AppResult};

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use partysync_core::gateway::Gateway;
use partysync_core::health::HealthMonitor;
use partysync_core::models::{PlaybackStatus, RoomId, RoomSettings, RoomSnapshot, SenderId, Track};
use partysync_core::registry::RoomRegistry;
use partysync_core::room::Room;
use partysync_core::Config;

/// Shared state for HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub gateway: Arc<Gateway>,
    pub health: HealthMonitor,
    pub config: Arc<Config>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(get_stats))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/:room_id", get(get_room).delete(delete_room))
        .route("/api/rooms/:room_id/playlist", get(get_playlist))
        .route("/api/rooms/:room_id/playback", get(get_playback))
        .route("/api/rooms/:room_id/settings", patch(update_settings))
        .route(
            "/api/rooms/:room_id/tracks/:track_index/duration",
            patch(update_track_duration),
        )
        .route("/ws", get(crate::ws::websocket_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    host_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomResponse {
    room_id: RoomId,
    host_id: SenderId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallerQuery {
    caller_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSettingsRequest {
    caller_id: String,
    allow_guests_add_tracks: Option<bool>,
    allow_guests_control: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateDurationRequest {
    duration_ms: i64,
}

fn lookup(state: &AppState, room_id: &str) -> AppResult<Arc<Room>> {
    state
        .registry
        .get(&RoomId::from(room_id))
        .ok_or_else(|| AppError::not_found(format!("room {room_id} not found")))
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": state.registry.stats(),
        "health": state.health.health_stats(),
    }))
}

async fn create_room(
    State(state): State<AppState>,
    Json(request): Json<CreateRoomRequest>,
) -> AppResult<impl IntoResponse> {
    let room_id = RoomId::new();
    let host_id = SenderId::from_string(request.host_id);
    let room = state.registry.create(room_id, host_id)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room_id: room.id().clone(),
            host_id: room.host_id().clone(),
        }),
    ))
}

async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomSnapshot>> {
    Ok(Json(lookup(&state, &room_id)?.snapshot()))
}

async fn delete_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<CallerQuery>,
) -> AppResult<StatusCode> {
    state
        .registry
        .delete(&RoomId::from(room_id), &query.caller_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_playlist(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Vec<Track>>> {
    Ok(Json(lookup(&state, &room_id)?.snapshot().playlist))
}

async fn get_playback(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<PlaybackStatus>> {
    Ok(Json(lookup(&state, &room_id)?.playback_status()))
}

async fn update_settings(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<UpdateSettingsRequest>,
) -> AppResult<Json<RoomSettings>> {
    let room = lookup(&state, &room_id)?;
    room.update_settings(
        &SenderId::from_string(request.caller_id),
        request.allow_guests_control,
        request.allow_guests_add_tracks,
    )?;
    Ok(Json(room.settings()))
}

async fn update_track_duration(
    State(state): State<AppState>,
    Path((room_id, track_index)): Path<(String, usize)>,
    Json(request): Json<UpdateDurationRequest>,
) -> AppResult<StatusCode> {
    lookup(&state, &room_id)?.update_track_duration(track_index, request.duration_ms)?;
    Ok(StatusCode::NO_CONTENT)
}
