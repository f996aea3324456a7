//! HTTP server setup and routing

use crate::error::{Error, Result};
use crate::orchestrator::Player;
use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
    pub player: Arc<Player>,
}

/// Build the router with every control route attached
pub fn build_router(ctx: AppContext) -> Router {
    use super::handlers;

    Router::new()
        .route("/health", get(handlers::health))

        // Session queries
        .route("/rooms", get(handlers::list_rooms))
        .route("/rooms/:room_id", get(handlers::get_room))
        .route("/rooms/:room_id/queue", get(handlers::get_queue))

        // Enqueue
        .route("/rooms/:room_id/play", post(handlers::play))
        .route("/rooms/:room_id/playlist", post(handlers::play_playlist))

        // Playback control
        .route("/rooms/:room_id/skip", post(handlers::skip))
        .route("/rooms/:room_id/replay", post(handlers::replay))
        .route("/rooms/:room_id/seek", post(handlers::seek))
        .route("/rooms/:room_id/pause", post(handlers::pause))
        .route("/rooms/:room_id/resume", post(handlers::resume))
        .route("/rooms/:room_id/mute", post(handlers::mute))
        .route("/rooms/:room_id/unmute", post(handlers::unmute))
        .route("/rooms/:room_id/stop", post(handlers::stop))
        .route("/rooms/:room_id/loop", post(handlers::set_loop))

        // Room settings and platform callbacks
        .route("/rooms/:room_id/autoend", post(handlers::set_autoend))
        .route("/rooms/:room_id/participants", post(handlers::participants))

        .route("/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the control API until `shutdown` resolves
pub async fn run(
    port: u16,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}
