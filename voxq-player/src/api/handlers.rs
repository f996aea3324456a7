//! HTTP request handlers
//!
//! Thin adapters: parse the room and body, call the [`Player`], and map
//! the outcome to JSON. Every command is logged and counted.
//!
//! [`Player`]: crate::orchestrator::Player

use crate::api::server::AppContext;
use crate::error::Error;
use crate::orchestrator::{NowPlaying, PlayOutcome, PlayRequest, PlaylistEntry, PlaylistOutcome, SkipOutcome};
use crate::queue::{Direction, QueueItem, Requester, TrackSource};
use crate::room::SessionSnapshot;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};
use voxq_common::{MediaKind, RoomId, UserId};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    active_rooms: usize,
    commands_total: u64,
    uptime_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RoomsResponse {
    rooms: Vec<RoomId>,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    room_id: RoomId,
    session: SessionSnapshot,
    now_playing: Option<NowPlaying>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    room_id: RoomId,
    items: Vec<QueueItem>,
}

/// Body of `POST /rooms/:room_id/play`
///
/// Exactly one of `track_id` (resolved remotely) and `attachment` (a local
/// file already on disk) must be given.
#[derive(Debug, Deserialize)]
pub struct PlayBody {
    pub user_id: i64,
    #[serde(default)]
    pub display_name: String,
    pub title: String,
    #[serde(default)]
    pub duration_label: String,
    pub track_id: Option<String>,
    pub attachment: Option<PathBuf>,
    #[serde(default)]
    pub kind: MediaKind,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistBody {
    pub user_id: i64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub kind: MediaKind,
    pub tracks: Vec<PlaylistEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SeekBody {
    /// Positive seeks forward, negative rewinds
    pub seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeekResponse {
    pub position: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoopBody {
    pub count: u32,
}

#[derive(Debug, Deserialize)]
pub struct AutoendBody {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantBody {
    pub user_id: i64,
    pub joined: bool,
}

#[derive(Debug, Serialize)]
pub struct ParticipantResponse {
    tracked: bool,
}

// ============================================================================
// Error mapping
// ============================================================================

impl Error {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoActiveSession(_) | Error::SessionNotFound(_) | Error::QueueEmpty(_) => {
                StatusCode::NOT_FOUND
            }
            Error::NoGroupCall(_)
            | Error::AlreadyJoining(_)
            | Error::AlreadyActive(_)
            | Error::Cancelled(_)
            | Error::Superseded(_) => StatusCode::CONFLICT,
            Error::InvalidInput(_)
            | Error::InvalidLoopCount { .. }
            | Error::SeekOutOfRange { .. } => StatusCode::BAD_REQUEST,
            Error::DownloadFailed(_)
            | Error::HandshakeRejected(_)
            | Error::EngineUnavailable(_)
            | Error::Platform(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::EngineJoinFailed(inner) => match inner.status_code() {
                StatusCode::GATEWAY_TIMEOUT => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            Error::Database(_) | Error::Io(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        let body = ErrorResponse {
            error: self.to_string(),
            message: self.user_message(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, Error>;

fn ok() -> ApiResult<StatusResponse> {
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

// ============================================================================
// Health and queries
// ============================================================================

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "voxq-player".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_rooms: ctx.player.active_rooms().len(),
        commands_total: ctx.state.commands_total(),
        uptime_seconds: ctx.state.uptime_seconds(),
    })
}

/// GET /rooms - rooms with a live session
pub async fn list_rooms(State(ctx): State<AppContext>) -> Json<RoomsResponse> {
    Json(RoomsResponse {
        rooms: ctx.player.active_rooms(),
    })
}

/// GET /rooms/:room_id - session snapshot and current track
pub async fn get_room(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
) -> ApiResult<RoomResponse> {
    let room = RoomId::new(room_id);
    let session = ctx
        .player
        .registry()
        .snapshot(room)
        .await
        .ok_or(Error::NoActiveSession(room))?;
    let now_playing = ctx.player.now_playing(room).await;

    Ok(Json(RoomResponse {
        room_id: room,
        session,
        now_playing,
    }))
}

/// GET /rooms/:room_id/queue
pub async fn get_queue(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
) -> Json<QueueResponse> {
    let room = RoomId::new(room_id);
    Json(QueueResponse {
        room_id: room,
        items: ctx.player.queue_snapshot(room).await,
    })
}

// ============================================================================
// Enqueue
// ============================================================================

/// POST /rooms/:room_id/play
pub async fn play(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
    Json(body): Json<PlayBody>,
) -> ApiResult<PlayOutcome> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();

    let source = match (body.track_id, body.attachment) {
        (Some(track_id), None) if !track_id.trim().is_empty() => TrackSource::Remote(track_id),
        (None, Some(path)) => TrackSource::Attachment(path),
        _ => {
            return Err(Error::InvalidInput(
                "exactly one of track_id and attachment is required".to_string(),
            ))
        }
    };
    if body.title.trim().is_empty() {
        return Err(Error::InvalidInput("title is required".to_string()));
    }

    info!(room = %room, title = %body.title, force = body.force, "Play requested");
    let request = PlayRequest {
        requested_by: Requester {
            user_id: UserId(body.user_id),
            display_name: body.display_name,
        },
        title: body.title,
        duration_label: body.duration_label,
        source,
        kind: body.kind,
        force: body.force,
    };

    let outcome = ctx.player.play(room, request).await?;
    Ok(Json(outcome))
}

/// POST /rooms/:room_id/playlist
pub async fn play_playlist(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
    Json(body): Json<PlaylistBody>,
) -> ApiResult<PlaylistOutcome> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();
    info!(room = %room, tracks = body.tracks.len(), "Playlist requested");

    let requester = Requester {
        user_id: UserId(body.user_id),
        display_name: body.display_name,
    };
    let outcome = ctx
        .player
        .play_playlist(room, requester, body.kind, body.tracks)
        .await?;
    Ok(Json(outcome))
}

// ============================================================================
// Playback control
// ============================================================================

/// POST /rooms/:room_id/skip
pub async fn skip(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
) -> ApiResult<SkipOutcome> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();
    info!(room = %room, "Skip requested");
    Ok(Json(ctx.player.skip(room).await?))
}

/// POST /rooms/:room_id/replay
pub async fn replay(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
) -> ApiResult<StatusResponse> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();
    info!(room = %room, "Replay requested");
    ctx.player.replay(room).await?;
    ok()
}

/// POST /rooms/:room_id/seek
pub async fn seek(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
    Json(body): Json<SeekBody>,
) -> ApiResult<SeekResponse> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();

    let direction = if body.seconds < 0 {
        Direction::Rewind
    } else {
        Direction::Forward
    };
    info!(room = %room, seconds = body.seconds, "Seek requested");
    let position = ctx
        .player
        .seek(room, body.seconds.unsigned_abs(), direction)
        .await?;
    Ok(Json(SeekResponse { position }))
}

/// POST /rooms/:room_id/pause
pub async fn pause(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
) -> ApiResult<StatusResponse> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();
    info!(room = %room, "Pause requested");
    ctx.player.pause(room).await?;
    ok()
}

/// POST /rooms/:room_id/resume
pub async fn resume(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
) -> ApiResult<StatusResponse> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();
    info!(room = %room, "Resume requested");
    ctx.player.resume(room).await?;
    ok()
}

/// POST /rooms/:room_id/mute
pub async fn mute(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
) -> ApiResult<StatusResponse> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();
    info!(room = %room, "Mute requested");
    ctx.player.mute(room).await?;
    ok()
}

/// POST /rooms/:room_id/unmute
pub async fn unmute(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
) -> ApiResult<StatusResponse> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();
    info!(room = %room, "Unmute requested");
    ctx.player.unmute(room).await?;
    ok()
}

/// POST /rooms/:room_id/stop
pub async fn stop(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
) -> ApiResult<StatusResponse> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();
    info!(room = %room, "Stop requested");
    ctx.player.stop(room).await?;
    ok()
}

/// POST /rooms/:room_id/loop
pub async fn set_loop(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
    Json(body): Json<LoopBody>,
) -> ApiResult<LoopBody> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();
    info!(room = %room, count = body.count, "Loop requested");
    let count = ctx.player.set_loop(room, body.count).await?;
    Ok(Json(LoopBody {
        count: u32::from(count),
    }))
}

// ============================================================================
// Room settings and platform callbacks
// ============================================================================

/// POST /rooms/:room_id/autoend
pub async fn set_autoend(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
    Json(body): Json<AutoendBody>,
) -> ApiResult<StatusResponse> {
    let room = RoomId::new(room_id);
    ctx.state.record_command();
    ctx.player.set_autoend(room, body.enabled).await?;
    ok()
}

/// POST /rooms/:room_id/participants - listener joined or left the call
pub async fn participants(
    State(ctx): State<AppContext>,
    Path(room_id): Path<i64>,
    Json(body): Json<ParticipantBody>,
) -> Json<ParticipantResponse> {
    let room = RoomId::new(room_id);
    let tracked = ctx
        .player
        .on_participants_changed(room, UserId(body.user_id), body.joined)
        .await;
    Json(ParticipantResponse { tracked })
}
