//! Engine event bridge
//!
//! Takes the engine's single event stream and fans it out to one dispatcher
//! task per room. Events of a room are handled strictly one at a time and in
//! arrival order; a slow handler in one room never delays another room.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use voxq_common::RoomId;

use super::{ConnectionInfo, EngineEvent, EngineEventReceiver};

/// How long a room dispatcher waits for an event before it exits
pub const DISPATCHER_IDLE: Duration = Duration::from_secs(60);

/// Receiver side of engine notifications
#[async_trait]
pub trait EngineEventHandler: Send + Sync + 'static {
    async fn on_stream_ended(&self, room: RoomId);
    async fn on_connection_changed(&self, room: RoomId, info: ConnectionInfo);
}

/// Per-room fan-out of engine events
pub struct EventBridge;

impl EventBridge {
    /// Spawn the intake task
    ///
    /// Runs until the engine side of the channel closes or `cancel` fires.
    pub fn spawn(
        events: EngineEventReceiver,
        handler: Arc<dyn EngineEventHandler>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        Self::spawn_with_idle(events, handler, cancel, DISPATCHER_IDLE)
    }

    /// Like [`EventBridge::spawn`], with a custom dispatcher idle timeout
    pub fn spawn_with_idle(
        events: EngineEventReceiver,
        handler: Arc<dyn EngineEventHandler>,
        cancel: CancellationToken,
        idle: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(run_intake(events, handler, cancel, idle))
    }
}

struct Dispatcher {
    tx: mpsc::UnboundedSender<EngineEvent>,
    task: JoinHandle<()>,
}

impl Dispatcher {
    fn is_gone(&self) -> bool {
        self.tx.is_closed() && self.task.is_finished()
    }
}

async fn run_intake(
    mut events: EngineEventReceiver,
    handler: Arc<dyn EngineEventHandler>,
    cancel: CancellationToken,
    idle: Duration,
) {
    let mut dispatchers: HashMap<RoomId, Dispatcher> = HashMap::new();
    let mut prune = tokio::time::interval(idle);
    prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = prune.tick() => {
                dispatchers.retain(|_, d| !d.is_gone());
                continue;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let room = event.room_id();
        trace!(room = %room, ?event, "Engine event received");

        let (event, previous) = match dispatchers.remove(&room) {
            Some(dispatcher) => match dispatcher.tx.send(event) {
                Ok(()) => {
                    dispatchers.insert(room, dispatcher);
                    continue;
                }
                // Dispatcher went idle; its successor waits for it to drain
                Err(mpsc::error::SendError(event)) => (event, Some(dispatcher.task)),
            },
            None => (event, None),
        };

        let dispatcher = spawn_dispatcher(room, handler.clone(), cancel.clone(), idle, previous);
        // A fresh dispatcher cannot have dropped its receiver yet
        let _ = dispatcher.tx.send(event);
        dispatchers.insert(room, dispatcher);
    }

    info!("Engine event bridge stopped ({} room dispatchers)", dispatchers.len());
}

fn spawn_dispatcher(
    room: RoomId,
    handler: Arc<dyn EngineEventHandler>,
    cancel: CancellationToken,
    idle: Duration,
    previous: Option<JoinHandle<()>>,
) -> Dispatcher {
    let (tx, mut rx) = mpsc::unbounded_channel::<EngineEvent>();
    debug!(room = %room, "Starting room event dispatcher");

    let task = tokio::spawn(async move {
        if let Some(previous) = previous {
            let _ = previous.await;
        }
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = tokio::time::timeout(idle, rx.recv()) => received,
            };
            let event = match received {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    // Refuse new events, then handle what already arrived
                    rx.close();
                    while let Ok(event) = rx.try_recv() {
                        dispatch(handler.as_ref(), event).await;
                    }
                    break;
                }
            };
            dispatch(handler.as_ref(), event).await;
        }
        debug!(room = %room, "Room event dispatcher stopped");
    });

    Dispatcher { tx, task }
}

async fn dispatch(handler: &dyn EngineEventHandler, event: EngineEvent) {
    match event {
        EngineEvent::StreamEnded(room) => handler.on_stream_ended(room).await,
        EngineEvent::ConnectionChanged(room, info) => handler.on_connection_changed(room, info).await,
    }
}
