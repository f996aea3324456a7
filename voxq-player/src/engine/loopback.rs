//! In-process call engine for development
//!
//! Keeps call bookkeeping in memory and produces the same events a real
//! engine would: `ConnectionChanged(Connected)` after `connect`, and
//! `StreamEnded` either on demand or after a configured track length.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use voxq_common::RoomId;

use super::{
    CallEngine, ConnectionInfo, ConnectionState, EngineEvent, EngineEventSender, MediaSpec,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct LoopbackCall {
    connected: bool,
    media: Option<MediaSpec>,
    paused: bool,
    muted: bool,
    /// Bumped on every media bind so stale end timers are ignored
    generation: u64,
}

/// Development engine that streams nothing
pub struct LoopbackEngine {
    calls: Arc<DashMap<RoomId, LoopbackCall>>,
    events: EngineEventSender,
    track_length: Option<Duration>,
}

impl LoopbackEngine {
    pub fn new(events: EngineEventSender) -> Self {
        Self {
            calls: Arc::new(DashMap::new()),
            events,
            track_length: None,
        }
    }

    /// End every bound stream automatically after `length`
    pub fn with_track_length(mut self, length: Duration) -> Self {
        self.track_length = Some(length);
        self
    }

    /// Emit `StreamEnded` for a room with a live call
    pub fn end_stream(&self, room: RoomId) -> Result<()> {
        if !self.calls.contains_key(&room) {
            return Err(Error::SessionNotFound(room));
        }
        let _ = self.events.send(EngineEvent::StreamEnded(room));
        Ok(())
    }

    pub fn has_call(&self, room: RoomId) -> bool {
        self.calls.contains_key(&room)
    }

    fn with_call<T>(&self, room: RoomId, f: impl FnOnce(&mut LoopbackCall) -> T) -> Result<T> {
        let mut call = self.calls.get_mut(&room).ok_or(Error::SessionNotFound(room))?;
        Ok(f(call.value_mut()))
    }

    fn schedule_end(&self, room: RoomId, generation: u64) {
        let Some(length) = self.track_length else {
            return;
        };
        let calls = self.calls.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(length).await;
            let still_current = calls
                .get(&room)
                .map(|call| call.generation == generation)
                .unwrap_or(false);
            if still_current {
                debug!(room = %room, "Loopback track finished");
                let _ = events.send(EngineEvent::StreamEnded(room));
            }
        });
    }
}

#[async_trait]
impl CallEngine for LoopbackEngine {
    async fn create_offer(&self, room: RoomId) -> Result<String> {
        self.calls.insert(
            room,
            LoopbackCall {
                connected: false,
                media: None,
                paused: false,
                muted: false,
                generation: 0,
            },
        );
        Ok(format!("{{\"room\":{},\"offer\":\"loopback\"}}", room))
    }

    async fn connect(&self, room: RoomId, answer: &str, peer_to_peer: bool) -> Result<()> {
        if answer.trim().is_empty() {
            return Err(Error::HandshakeRejected("empty answer".to_string()));
        }
        self.with_call(room, |call| call.connected = true)
            .map_err(|_| Error::HandshakeRejected(format!("no offer for room {}", room)))?;
        info!(room = %room, peer_to_peer, "Loopback call connected");
        let _ = self.events.send(EngineEvent::ConnectionChanged(
            room,
            ConnectionInfo {
                state: ConnectionState::Connected,
            },
        ));
        Ok(())
    }

    async fn set_media_source(&self, room: RoomId, media: MediaSpec) -> Result<()> {
        debug!(room = %room, ?media, "Loopback media bound");
        let generation = self.with_call(room, |call| {
            call.media = Some(media);
            call.generation += 1;
            call.generation
        })?;
        self.schedule_end(room, generation);
        Ok(())
    }

    async fn pause(&self, room: RoomId) -> Result<()> {
        self.with_call(room, |call| call.paused = true)
    }

    async fn resume(&self, room: RoomId) -> Result<()> {
        self.with_call(room, |call| call.paused = false)
    }

    async fn mute(&self, room: RoomId) -> Result<()> {
        self.with_call(room, |call| call.muted = true)
    }

    async fn unmute(&self, room: RoomId) -> Result<()> {
        self.with_call(room, |call| call.muted = false)
    }

    async fn disconnect(&self, room: RoomId) -> Result<()> {
        if let Some((_, call)) = self.calls.remove(&room) {
            info!(
                room = %room,
                connected = call.connected,
                paused = call.paused,
                muted = call.muted,
                media = ?call.media.map(|m| m.source),
                "Loopback call dropped"
            );
        }
        Ok(())
    }
}
