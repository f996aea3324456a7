//! Background timers
//!
//! Two periodic tasks per process: played-seconds accrual for the head of
//! every unpaused session, and the inactivity sweep that ends empty rooms.
//! Both stop when the shared cancellation token fires.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::orchestrator::Player;

/// Spawn the accrual and inactivity tasks
pub fn spawn(player: Arc<Player>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let accrual = player.settings().accrual_interval();
    let sweep = player.settings().sweep_interval();
    vec![
        tokio::spawn(accrual_loop(player.clone(), accrual, cancel.clone())),
        tokio::spawn(inactivity_loop(player, sweep, cancel)),
    ]
}

async fn accrual_loop(player: Arc<Player>, period: Duration, cancel: CancellationToken) {
    info!("Played-seconds accrual started ({:?})", period);
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        let now = Instant::now();
        let elapsed_ms = u64::try_from(now.duration_since(last).as_millis()).unwrap_or(u64::MAX);
        last = now;
        player.accrue_played(elapsed_ms).await;
    }

    info!("Played-seconds accrual stopped");
}

async fn inactivity_loop(player: Arc<Player>, period: Duration, cancel: CancellationToken) {
    info!(
        "Inactivity sweep started (every {:?}, timeout {:?})",
        period,
        player.settings().inactivity_timeout()
    );
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        let ended = player.sweep_inactive(Instant::now()).await;
        if !ended.is_empty() {
            debug!("Inactivity sweep ended {} rooms", ended.len());
        }
        player.reap_vacant_rooms();
    }

    info!("Inactivity sweep stopped");
}
