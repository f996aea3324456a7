//! Per-room playback queue
//!
//! [`RoomQueue`] is plain data-structure logic: it never talks to the engine,
//! the chat platform or the session registry, so it can be tested without
//! any of them. [`QueueEngine`] is the room-keyed facade over the state arena
//! that command handlers use.

use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use voxq_common::time::parse_duration_label;
use voxq_common::{MediaKind, RoomId, UserId};

use crate::room::RoomArena;

/// Where a track came from, used to fetch it again for a replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TrackSource {
    /// Raw file attached to the command, already local
    Attachment(PathBuf),
    /// External track identifier handed to the media resolver
    Remote(String),
}

impl TrackSource {
    pub fn is_remote(&self) -> bool {
        matches!(self, TrackSource::Remote(_))
    }
}

/// User who asked for a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requester {
    pub user_id: UserId,
    pub display_name: String,
}

/// Direction of a played-seconds adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Rewind,
}

/// One queued track
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub room_id: RoomId,
    pub requested_by: Requester,
    pub title: String,
    /// Display label as reported by the resolver ("3:45", "live", ...)
    pub duration_label: String,
    /// Local file bound to the call while this item is the head
    pub media_path: PathBuf,
    pub source: TrackSource,
    pub kind: MediaKind,
    /// Seconds of the head already streamed; meaningless for non-head items
    pub played_seconds: u64,

    /// Sub-second remainder carried between accrual ticks
    #[serde(skip)]
    accrued_ms: u64,
}

impl QueueItem {
    pub fn new(
        room_id: RoomId,
        requested_by: Requester,
        title: impl Into<String>,
        duration_label: impl Into<String>,
        media_path: PathBuf,
        source: TrackSource,
        kind: MediaKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            requested_by,
            title: title.into(),
            duration_label: duration_label.into(),
            media_path,
            source,
            kind,
            played_seconds: 0,
            accrued_ms: 0,
        }
    }

    /// Track length in seconds, when the label describes one
    pub fn duration_seconds(&self) -> Option<u64> {
        parse_duration_label(&self.duration_label)
    }

    /// Reset playback bookkeeping for a replay from the start
    pub fn rewind_to_start(&mut self) {
        self.played_seconds = 0;
        self.accrued_ms = 0;
    }
}

/// Ordered queue of one room; `current` is the head bound to the session
#[derive(Debug, Default)]
pub struct RoomQueue {
    current: Option<QueueItem>,
    queued: VecDeque<QueueItem>,
}

impl RoomQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item; returns 0 if it became the head, else its 1-based
    /// distance from the head
    ///
    /// With `force_to_front` the item becomes the head and the previous head
    /// moves to index 1; the remainder keeps its order.
    pub fn enqueue(&mut self, item: QueueItem, force_to_front: bool) -> usize {
        if force_to_front {
            if let Some(previous) = self.current.take() {
                self.queued.push_front(previous);
            }
            self.current = Some(item);
            return 0;
        }

        if self.current.is_none() {
            self.current = Some(item);
            0
        } else {
            self.queued.push_back(item);
            self.queued.len()
        }
    }

    pub fn head(&self) -> Option<&QueueItem> {
        self.current.as_ref()
    }

    pub fn head_mut(&mut self) -> Option<&mut QueueItem> {
        self.current.as_mut()
    }

    /// Remove and return the head, promoting the next item
    pub fn pop_head(&mut self) -> Option<QueueItem> {
        let popped = self.current.take();
        self.current = self.queued.pop_front();
        popped
    }

    /// Remove one item wherever it sits; removing the head promotes the next
    pub fn remove(&mut self, id: Uuid) -> Option<QueueItem> {
        if self.current.as_ref().is_some_and(|head| head.id == id) {
            return self.pop_head();
        }
        let index = self.queued.iter().position(|item| item.id == id)?;
        self.queued.remove(index)
    }

    /// Empty the queue, returning what was removed in order
    pub fn clear(&mut self) -> Vec<QueueItem> {
        let mut removed = Vec::with_capacity(self.len());
        removed.extend(self.current.take());
        removed.extend(self.queued.drain(..));
        removed
    }

    /// Move the head's played position; returns the new position
    ///
    /// Rewinding past the start clamps to zero.
    pub fn adjust_played(&mut self, delta_seconds: u64, direction: Direction) -> Option<u64> {
        let head = self.current.as_mut()?;
        head.played_seconds = match direction {
            Direction::Forward => head.played_seconds.saturating_add(delta_seconds),
            Direction::Rewind => head.played_seconds.saturating_sub(delta_seconds),
        };
        head.accrued_ms = 0;
        Some(head.played_seconds)
    }

    /// Accrue streamed time onto the head
    pub fn accrue(&mut self, elapsed_ms: u64) {
        if let Some(head) = self.current.as_mut() {
            let total = head.accrued_ms + elapsed_ms;
            head.played_seconds = head.played_seconds.saturating_add(total / 1000);
            head.accrued_ms = total % 1000;
        }
    }

    pub fn len(&self) -> usize {
        usize::from(self.current.is_some()) + self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// True if any item still in the queue streams from `path`
    pub fn references(&self, path: &Path) -> bool {
        self.current
            .iter()
            .chain(self.queued.iter())
            .any(|item| item.media_path == path)
    }

    /// Ordered copy, head first
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.current.iter().chain(self.queued.iter()).cloned().collect()
    }
}

/// Room-keyed queue operations over the state arena
///
/// Each call takes the room's lock only for the in-memory mutation.
#[derive(Clone)]
pub struct QueueEngine {
    arena: Arc<RoomArena>,
}

impl QueueEngine {
    pub fn new(arena: Arc<RoomArena>) -> Self {
        Self { arena }
    }

    pub async fn enqueue(&self, item: QueueItem, force_to_front: bool) -> usize {
        let room = self.arena.room(item.room_id);
        let mut state = room.lock().await;
        state.queue.enqueue(item, force_to_front)
    }

    pub async fn peek_head(&self, room_id: RoomId) -> Option<QueueItem> {
        let room = self.arena.get(room_id)?;
        let state = room.lock().await;
        state.queue.head().cloned()
    }

    pub async fn pop_head(&self, room_id: RoomId) -> Option<QueueItem> {
        let room = self.arena.get(room_id)?;
        let mut state = room.lock().await;
        state.queue.pop_head()
    }

    pub async fn clear(&self, room_id: RoomId) -> Vec<QueueItem> {
        match self.arena.get(room_id) {
            Some(room) => room.lock().await.queue.clear(),
            None => Vec::new(),
        }
    }

    pub async fn adjust_played(
        &self,
        room_id: RoomId,
        delta_seconds: u64,
        direction: Direction,
    ) -> Option<u64> {
        let room = self.arena.get(room_id)?;
        let mut state = room.lock().await;
        state.queue.adjust_played(delta_seconds, direction)
    }

    pub async fn len(&self, room_id: RoomId) -> usize {
        match self.arena.get(room_id) {
            Some(room) => room.lock().await.queue.len(),
            None => 0,
        }
    }

    pub async fn snapshot(&self, room_id: RoomId) -> Vec<QueueItem> {
        match self.arena.get(room_id) {
            Some(room) => room.lock().await.queue.snapshot(),
            None => Vec::new(),
        }
    }
}
