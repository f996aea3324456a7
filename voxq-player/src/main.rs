//! VoxQ Player (voxq-player) - Main entry point
//!
//! Wires the development collaborators (loopback engine, logging chat
//! platform, local resolver) to the player and serves the control API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voxq_player::api::{self, AppContext};
use voxq_player::collab::{LocalResolver, LogPlatform, NoThumbnails};
use voxq_player::config::{Args, Config};
use voxq_player::db::init::init_database;
use voxq_player::db::SqliteStore;
use voxq_player::engine::{event_channel, EngineEventHandler, EventBridge, LoopbackEngine};
use voxq_player::{sweeper, Player, PlayerDeps, SharedState};

const DEFAULT_LOG_FILTER: &str = "voxq_player=debug,voxq_common=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args).context("Failed to load configuration")?;

    // RUST_LOG wins, then the TOML level, then the built-in filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.log_level.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting VoxQ player on port {}", config.port);
    info!("Data folder: {}", config.data_dir.display());
    info!("Media folder: {}", config.media_dir.display());

    let pool = init_database(&config.db_path)
        .await
        .context("Failed to initialize database")?;
    let store = Arc::new(SqliteStore::new(pool));

    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.download_dir.display()))?;

    let (events_tx, events_rx) = event_channel();
    let mut engine = LoopbackEngine::new(events_tx);
    if let Some(seconds) = args.loopback_track_seconds {
        engine = engine.with_track_length(Duration::from_secs(seconds));
    }

    let state = Arc::new(SharedState::new());
    let player = Arc::new(Player::new(PlayerDeps {
        engine: Arc::new(engine),
        platform: Arc::new(LogPlatform::new()),
        resolver: Arc::new(LocalResolver::new(&config.media_dir, &config.download_dir)),
        thumbnailer: Arc::new(NoThumbnails),
        store,
        state: state.clone(),
        settings: config.runtime.clone(),
    }));

    match player.notify_interrupted().await {
        Ok(0) => {}
        Ok(count) => info!("Notified {} rooms interrupted by the last shutdown", count),
        Err(e) => warn!("Failed to read ActiveVC markers: {}", e),
    }

    let cancel = CancellationToken::new();
    let handler: Arc<dyn EngineEventHandler> = player.clone();
    let bridge = EventBridge::spawn(events_rx, handler, cancel.clone());
    let timers = sweeper::spawn(player.clone(), cancel.clone());

    let ctx = AppContext {
        state,
        player: player.clone(),
    };
    api::run(config.port, ctx, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    cancel.cancel();
    for task in timers {
        let _ = task.await;
    }
    let _ = bridge.await;
    player.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
