//! Event types for the VoxQ event system
//!
//! Provides the shared event definitions and the broadcast EventBus used by
//! the player to notify observers (SSE clients, stats collectors, tests).
//! Events are informational only: nothing in the player waits on a
//! subscriber, and emitting with no subscribers is not an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::room::{MediaKind, RoomId};

/// Why a room's session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Explicit stop command
    Stopped,
    /// Preempted by a force play
    Replaced,
    /// Queue played to exhaustion
    QueueExhausted,
    /// Inactivity sweeper ended the room
    Inactivity,
    /// Engine reported a terminal connection state
    ConnectionLost,
    /// Track switch on a live call failed
    PlaybackFailed,
    /// Process shutdown
    Shutdown,
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionEndReason::Stopped => "stopped",
            SessionEndReason::Replaced => "replaced",
            SessionEndReason::QueueExhausted => "queue_exhausted",
            SessionEndReason::Inactivity => "inactivity",
            SessionEndReason::ConnectionLost => "connection_lost",
            SessionEndReason::PlaybackFailed => "playback_failed",
            SessionEndReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Why a room's queue changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum QueueChangeTrigger {
    UserEnqueue,
    ForcePlay,
    TrackCompletion,
    UserSkip,
    Cleared,
}

/// VoxQ event types
///
/// Serialized with an internal `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VoxqEvent {
    /// A call was joined and a session registered for the room
    SessionStarted {
        room_id: RoomId,
        media_kind: MediaKind,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The room's session was torn down
    SessionEnded {
        room_id: RoomId,
        reason: SessionEndReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track became the live media of the room's call
    TrackStarted {
        room_id: RoomId,
        title: String,
        duration_label: String,
        requested_by: String,
        /// True for loop replays and explicit replays
        replay: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track was queued behind the current head
    TrackQueued {
        room_id: RoomId,
        title: String,
        /// 1-based distance from the head
        position: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents changed
    QueueChanged {
        room_id: RoomId,
        length: usize,
        trigger: QueueChangeTrigger,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pause/mute flags of the live session changed
    PlaybackStateChanged {
        room_id: RoomId,
        paused: bool,
        muted: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Remaining automatic replays of the head changed
    LoopChanged {
        room_id: RoomId,
        remaining: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Starting playback failed and the room was rolled back
    JoinFailed {
        room_id: RoomId,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl VoxqEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            VoxqEvent::SessionStarted { .. } => "SessionStarted",
            VoxqEvent::SessionEnded { .. } => "SessionEnded",
            VoxqEvent::TrackStarted { .. } => "TrackStarted",
            VoxqEvent::TrackQueued { .. } => "TrackQueued",
            VoxqEvent::QueueChanged { .. } => "QueueChanged",
            VoxqEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            VoxqEvent::LoopChanged { .. } => "LoopChanged",
            VoxqEvent::JoinFailed { .. } => "JoinFailed",
        }
    }

    /// Room the event belongs to
    pub fn room_id(&self) -> RoomId {
        match self {
            VoxqEvent::SessionStarted { room_id, .. }
            | VoxqEvent::SessionEnded { room_id, .. }
            | VoxqEvent::TrackStarted { room_id, .. }
            | VoxqEvent::TrackQueued { room_id, .. }
            | VoxqEvent::QueueChanged { room_id, .. }
            | VoxqEvent::PlaybackStateChanged { room_id, .. }
            | VoxqEvent::LoopChanged { room_id, .. }
            | VoxqEvent::JoinFailed { room_id, .. } => *room_id,
        }
    }
}

/// Broadcast bus for [`VoxqEvent`]s
///
/// Slow subscribers lag and lose old events rather than applying
/// backpressure to the player.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VoxqEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<VoxqEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit(&self, event: VoxqEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
