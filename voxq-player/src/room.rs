//! Room state arena
//!
//! One entry per room, each holding the room's session phase, queue and loop
//! counter behind a single mutex, so invariants spanning the three are
//! enforced under one lock. The lock is only ever held for in-memory
//! mutation; engine and platform calls happen with it released.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Notify};
use voxq_common::{MediaKind, RoomId, UserId};

use crate::collab::GroupCall;
use crate::engine::ConnectionState;
use crate::queue::RoomQueue;

/// How the call is connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Group,
    PeerToPeer,
}

/// Live call bound to a room
#[derive(Debug, Clone)]
pub struct Session {
    pub room_id: RoomId,
    pub media_path: PathBuf,
    pub kind: MediaKind,
    pub started_at: DateTime<Utc>,
    pub connection_mode: ConnectionMode,
    pub connection_state: ConnectionState,
    pub group_call: GroupCall,
    pub muted: bool,
    pub paused: bool,
    pub participants: HashSet<UserId>,
    /// Set while nobody but the player is in the call
    pub empty_since: Option<Instant>,
}

impl Session {
    pub fn new(room_id: RoomId, media_path: PathBuf, kind: MediaKind, group_call: GroupCall) -> Self {
        Self {
            room_id,
            media_path,
            kind,
            started_at: Utc::now(),
            connection_mode: ConnectionMode::Group,
            connection_state: ConnectionState::Connecting,
            group_call,
            muted: false,
            paused: false,
            participants: HashSet::new(),
            empty_since: Some(Instant::now()),
        }
    }

    /// Record a listener joining or leaving
    pub fn update_participant(&mut self, user: UserId, joined: bool) {
        if joined {
            self.participants.insert(user);
            self.empty_since = None;
        } else {
            self.participants.remove(&user);
            if self.participants.is_empty() && self.empty_since.is_none() {
                self.empty_since = Some(Instant::now());
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            room_id: self.room_id,
            media_path: self.media_path.clone(),
            kind: self.kind,
            started_at: self.started_at,
            connection_mode: self.connection_mode,
            connection_state: self.connection_state,
            muted: self.muted,
            paused: self.paused,
            participants: self.participants.len(),
        }
    }
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub room_id: RoomId,
    pub media_path: PathBuf,
    pub kind: MediaKind,
    pub started_at: DateTime<Utc>,
    pub connection_mode: ConnectionMode,
    pub connection_state: ConnectionState,
    pub muted: bool,
    pub paused: bool,
    pub participants: usize,
}

/// Session lifecycle of a room
#[derive(Debug)]
pub enum Phase {
    Idle,
    /// A join handshake is in flight; `leave_requested` makes the joiner
    /// roll back instead of committing
    Joining { leave_requested: bool },
    Active(Session),
    /// Engine disconnect in flight
    Leaving,
}

/// Everything the player keeps for one room
#[derive(Debug)]
pub struct RoomState {
    pub room_id: RoomId,
    pub phase: Phase,
    pub queue: RoomQueue,
    /// Remaining automatic replays of the head
    pub loop_count: u8,
    /// Signalled whenever the phase returns to `Idle`
    idle: Arc<Notify>,
    /// Held across a media bind so binds of one room never interleave
    bind: Arc<Mutex<()>>,
}

impl RoomState {
    fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            phase: Phase::Idle,
            queue: RoomQueue::new(),
            loop_count: 0,
            idle: Arc::new(Notify::new()),
            bind: Arc::new(Mutex::new(())),
        }
    }

    /// Return to `Idle` and wake joins waiting for the previous session
    pub(crate) fn set_idle(&mut self) {
        self.phase = Phase::Idle;
        self.idle.notify_waiters();
    }

    /// Handle to wait on for the next `set_idle`
    pub(crate) fn idle_signal(&self) -> Arc<Notify> {
        self.idle.clone()
    }

    pub(crate) fn bind_lock(&self) -> Arc<Mutex<()>> {
        self.bind.clone()
    }

    /// Nothing worth keeping: no session, no queue, no pending loop
    fn is_vacant(&self) -> bool {
        matches!(self.phase, Phase::Idle) && self.queue.is_empty() && self.loop_count == 0
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Active(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.phase {
            Phase::Active(session) => Some(session),
            _ => None,
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        match &mut self.phase {
            Phase::Active(session) => Some(session),
            _ => None,
        }
    }
}

pub type RoomHandle = Arc<Mutex<RoomState>>;

/// Sharded map of room states plus an index of rooms with a live session
#[derive(Debug, Default)]
pub struct RoomArena {
    rooms: DashMap<RoomId, RoomHandle>,
    active: DashSet<RoomId>,
}

impl RoomArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the room's entry, creating an idle one on first use
    pub fn room(&self, room_id: RoomId) -> RoomHandle {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(RoomState::new(room_id))))
            .value()
            .clone()
    }

    /// Get the room's entry if it was ever used
    pub fn get(&self, room_id: RoomId) -> Option<RoomHandle> {
        self.rooms.get(&room_id).map(|entry| entry.value().clone())
    }

    /// Non-blocking check for a live session
    pub fn is_active(&self, room_id: RoomId) -> bool {
        self.active.contains(&room_id)
    }

    /// Rooms with a live session, sorted
    pub fn active_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.active.iter().map(|r| *r).collect();
        rooms.sort();
        rooms
    }

    /// Drop entries of vacant rooms nobody else holds; returns how many
    pub fn reap_vacant(&self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, handle| {
            // Entries are only cloned under the shard lock held here, so a
            // count of one means no caller can observe the removal
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                Ok(state) => !state.is_vacant(),
                Err(_) => true,
            }
        });
        before.saturating_sub(self.rooms.len())
    }

    /// Keep the active index in step with a phase change; call with the
    /// room lock held
    pub(crate) fn set_active(&self, room_id: RoomId, active: bool) {
        if active {
            self.active.insert(room_id);
        } else {
            self.active.remove(&room_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(room: RoomId) -> Session {
        Session::new(
            room,
            PathBuf::from("/tmp/a.mp3"),
            MediaKind::Voice,
            GroupCall {
                id: "call-1".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_room_entry_is_shared() {
        let arena = RoomArena::new();
        let room = RoomId::new(9);

        let first = arena.room(room);
        first.lock().await.loop_count = 3;

        let second = arena.room(room);
        assert_eq!(second.lock().await.loop_count, 3);
        assert!(arena.get(RoomId::new(10)).is_none());
    }

    #[test]
    fn test_active_index() {
        let arena = RoomArena::new();
        arena.set_active(RoomId::new(2), true);
        arena.set_active(RoomId::new(1), true);
        assert_eq!(arena.active_rooms(), vec![RoomId::new(1), RoomId::new(2)]);

        arena.set_active(RoomId::new(2), false);
        assert!(!arena.is_active(RoomId::new(2)));
        assert!(arena.is_active(RoomId::new(1)));
    }

    #[tokio::test]
    async fn test_reap_keeps_busy_and_held_rooms() {
        let arena = RoomArena::new();
        arena.room(RoomId::new(1));
        arena.room(RoomId::new(2)).lock().await.loop_count = 2;
        let held = arena.room(RoomId::new(3));

        assert_eq!(arena.reap_vacant(), 1);
        assert!(arena.get(RoomId::new(1)).is_none());
        assert!(arena.get(RoomId::new(2)).is_some());
        assert!(arena.get(RoomId::new(3)).is_some());

        drop(held);
        assert_eq!(arena.reap_vacant(), 1);
        assert!(arena.get(RoomId::new(3)).is_none());
    }

    #[tokio::test]
    async fn test_set_idle_wakes_waiters() {
        let arena = RoomArena::new();
        let handle = arena.room(RoomId::new(4));
        let signal = {
            let mut state = handle.lock().await;
            state.phase = Phase::Leaving;
            state.idle_signal()
        };
        let notified = signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        handle.lock().await.set_idle();
        tokio::time::timeout(std::time::Duration::from_secs(1), notified)
            .await
            .unwrap();
        assert!(matches!(handle.lock().await.phase, Phase::Idle));
    }

    #[test]
    fn test_participants_track_empty_since() {
        let mut session = test_session(RoomId::new(1));
        assert!(session.empty_since.is_some());

        session.update_participant(UserId(1), true);
        session.update_participant(UserId(2), true);
        assert!(session.empty_since.is_none());

        session.update_participant(UserId(1), false);
        assert!(session.empty_since.is_none());

        session.update_participant(UserId(2), false);
        assert!(session.empty_since.is_some());
        assert_eq!(session.snapshot().participants, 0);
    }

    #[test]
    fn test_session_accessors_follow_phase() {
        let mut state = RoomState::new(RoomId::new(1));
        assert!(state.session().is_none());

        state.phase = Phase::Active(test_session(RoomId::new(1)));
        assert!(state.is_active());
        state.session_mut().unwrap().paused = true;
        assert!(state.session().unwrap().paused);
    }
}
