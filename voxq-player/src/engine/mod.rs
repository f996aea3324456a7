//! Real-time call engine adapter
//!
//! The engine is an opaque transport that streams media into a call. The
//! player drives it through [`CallEngine`] and receives its asynchronous
//! notifications as [`EngineEvent`]s on an unbounded channel, so delivery
//! never blocks the engine's internals.

pub mod bridge;
pub mod loopback;

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;
use voxq_common::{MediaKind, RoomId};

use crate::error::Result;

pub use bridge::{EngineEventHandler, EventBridge};
pub use loopback::LoopbackEngine;

/// Media to bind to a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Local file
    File(PathBuf),
}

/// Everything the engine needs to start streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSpec {
    pub source: MediaSource,
    pub video: bool,
    /// Offset into the media, in seconds
    pub start_at: u64,
}

impl MediaSpec {
    pub fn file(path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self {
            source: MediaSource::File(path.into()),
            video: kind.is_video(),
            start_at: 0,
        }
    }

    pub fn starting_at(mut self, seconds: u64) -> Self {
        self.start_at = seconds;
        self
    }
}

/// Connection state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Failed,
    TimedOut,
    Closed,
}

impl ConnectionState {
    /// The call is gone and will not recover
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Failed | ConnectionState::TimedOut | ConnectionState::Closed
        )
    }
}

/// Payload of a connection change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
}

/// Asynchronous engine notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StreamEnded(RoomId),
    ConnectionChanged(RoomId, ConnectionInfo),
}

impl EngineEvent {
    pub fn room_id(&self) -> RoomId {
        match self {
            EngineEvent::StreamEnded(room) | EngineEvent::ConnectionChanged(room, _) => *room,
        }
    }
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Channel an engine implementation publishes its events on
pub fn event_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}

/// Capability set of the call engine
///
/// Implementations hold no business logic. Errors use the player taxonomy:
/// `EngineUnavailable` from `create_offer`, `HandshakeRejected` from
/// `connect`, `SessionNotFound` for any per-call operation on a room with no
/// engine-side call.
#[async_trait]
pub trait CallEngine: Send + Sync {
    /// Allocate a call and return the local offer blob
    async fn create_offer(&self, room: RoomId) -> Result<String>;

    /// Complete the handshake with the platform's answer
    async fn connect(&self, room: RoomId, answer: &str, peer_to_peer: bool) -> Result<()>;

    /// Bind (or re-bind) the streamed media
    async fn set_media_source(&self, room: RoomId, media: MediaSpec) -> Result<()>;

    async fn pause(&self, room: RoomId) -> Result<()>;
    async fn resume(&self, room: RoomId) -> Result<()>;
    async fn mute(&self, room: RoomId) -> Result<()>;
    async fn unmute(&self, room: RoomId) -> Result<()>;

    /// Drop the room's call; a no-op when there is none
    async fn disconnect(&self, room: RoomId) -> Result<()>;
}
