//! Player orchestrator
//!
//! The only component that sequences the queue, the session registry and
//! media resolution together. Command handlers call into [`Player`]; the
//! engine event bridge calls its [`EngineEventHandler`] implementation.
//!
//! Decisions that span queue and session (advance, loop replay, exhaustion
//! teardown) are taken under the room lock in one step; the resulting engine
//! or platform work runs after the lock is released.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;
use voxq_common::config::RuntimeSettings;
use voxq_common::events::{QueueChangeTrigger, SessionEndReason, VoxqEvent};
use voxq_common::time::format_duration_label;
use voxq_common::{MediaKind, RoomId, UserId};

use crate::collab::{ChatPlatform, MediaResolver, MessageId, Thumbnailer};
use crate::db::StateStore;
use crate::engine::{CallEngine, ConnectionInfo, EngineEventHandler};
use crate::error::{Error, Result};
use crate::queue::{Direction, QueueEngine, QueueItem, Requester, TrackSource};
use crate::room::{RoomArena, RoomState, Session};
use crate::session::{bounded, SessionRegistry, StartMode};
use crate::state::SharedState;

/// A request to play one track
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub requested_by: Requester,
    pub title: String,
    pub duration_label: String,
    pub source: TrackSource,
    pub kind: MediaKind,
    /// Preempt whatever is playing instead of queuing behind it
    pub force: bool,
}

/// One entry of a playlist request
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistEntry {
    pub title: String,
    #[serde(default)]
    pub duration_label: String,
    pub track_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlayOutcome {
    /// The track became the head and is now streaming
    Started { item_id: Uuid },
    /// The track was queued at this 1-based distance from the head
    Queued { position: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct SkipOutcome {
    /// A pending loop was cancelled by the skip
    pub loop_cancelled: bool,
    pub skipped: Option<String>,
    /// Title now streaming, `None` if the queue ran out and the call ended
    pub now_playing: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaylistOutcome {
    pub added: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub item: QueueItem,
    pub played_seconds: u64,
    /// `played_seconds` as "M:SS"
    pub position_label: String,
    pub paused: bool,
    pub muted: bool,
    pub loop_remaining: u8,
}

/// Whether a start counts as a new play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartKind {
    Fresh,
    Replay,
}

/// Outcome of a queue decision taken under the room lock
enum Step {
    /// Start this (new) head
    Next(QueueItem),
    /// Replay the head; carries the loop count left afterwards
    Replay(QueueItem, u8),
    /// Queue is empty; the session taken for teardown, if any
    Exhausted(Option<Session>),
}

/// Collaborators the player is built from
pub struct PlayerDeps {
    pub engine: Arc<dyn CallEngine>,
    pub platform: Arc<dyn ChatPlatform>,
    pub resolver: Arc<dyn MediaResolver>,
    pub thumbnailer: Arc<dyn Thumbnailer>,
    pub store: Arc<dyn StateStore>,
    pub state: Arc<SharedState>,
    pub settings: RuntimeSettings,
}

pub struct Player {
    arena: Arc<RoomArena>,
    queue: QueueEngine,
    registry: SessionRegistry,
    platform: Arc<dyn ChatPlatform>,
    resolver: Arc<dyn MediaResolver>,
    thumbnailer: Arc<dyn Thumbnailer>,
    store: Arc<dyn StateStore>,
    state: Arc<SharedState>,
    settings: RuntimeSettings,
}

impl Player {
    pub fn new(deps: PlayerDeps) -> Self {
        let arena = Arc::new(RoomArena::new());
        let registry = SessionRegistry::new(
            arena.clone(),
            deps.engine,
            deps.platform.clone(),
            deps.store.clone(),
            deps.state.clone(),
            &deps.settings,
        );
        Self {
            queue: QueueEngine::new(arena.clone()),
            arena,
            registry,
            platform: deps.platform,
            resolver: deps.resolver,
            thumbnailer: deps.thumbnailer,
            store: deps.store,
            state: deps.state,
            settings: deps.settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &QueueEngine {
        &self.queue
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn is_active(&self, room: RoomId) -> bool {
        self.registry.is_active(room)
    }

    pub fn active_rooms(&self) -> Vec<RoomId> {
        self.registry.active_rooms()
    }

    // === Commands ===

    /// Resolve, enqueue and (if the room was idle) start a track
    pub async fn play(&self, room: RoomId, request: PlayRequest) -> Result<PlayOutcome> {
        if request.force {
            info!(room = %room, "Force play, clearing the room first");
            self.teardown(room, SessionEndReason::Replaced).await;
        }

        let requested_by = self.resolve_requester(request.requested_by).await;
        let status = self
            .notify(room, &format!("Processing {}...", request.title))
            .await;

        let media_path = match self.fetch(&request.source, request.kind).await {
            Ok(path) => path,
            Err(err) => {
                warn!(room = %room, title = %request.title, error = %err, "Media resolution failed");
                self.replace_status(room, status, &err.user_message()).await;
                return Err(err);
            }
        };

        let item = QueueItem::new(
            room,
            requested_by,
            request.title,
            request.duration_label,
            media_path,
            request.source,
            request.kind,
        );
        let mut position = self.queue.enqueue(item.clone(), request.force).await;
        let trigger = if request.force {
            QueueChangeTrigger::ForcePlay
        } else {
            QueueChangeTrigger::UserEnqueue
        };
        self.emit_queue_changed(room, trigger).await;

        if position == 0 {
            match self
                .start_playback(room, item.clone(), status, StartKind::Fresh)
                .await
            {
                Ok(()) => return Ok(PlayOutcome::Started { item_id: item.id }),
                // Another caller's start owns the room; the track stays queued
                Err(Error::AlreadyJoining(_) | Error::Superseded(_)) => {
                    position = self
                        .queue
                        .snapshot(room)
                        .await
                        .iter()
                        .position(|queued| queued.id == item.id)
                        .unwrap_or(0);
                }
                Err(err) => return Err(err),
            }
        }

        info!(room = %room, title = %item.title, position, "Track queued");
        self.state.broadcast_event(VoxqEvent::TrackQueued {
            room_id: room,
            title: item.title.clone(),
            position,
            timestamp: chrono::Utc::now(),
        });
        self.replace_status(
            room,
            status,
            &format!("Queued {} at position #{}", item.title, position),
        )
        .await;
        Ok(PlayOutcome::Queued { position })
    }

    /// Queue several tracks; the first resolvable one starts if idle
    pub async fn play_playlist(
        &self,
        room: RoomId,
        requested_by: Requester,
        kind: MediaKind,
        entries: Vec<PlaylistEntry>,
    ) -> Result<PlaylistOutcome> {
        if entries.is_empty() {
            return Err(Error::InvalidInput("playlist is empty".to_string()));
        }

        let requested_by = self.resolve_requester(requested_by).await;
        let status = self
            .notify(room, &format!("Adding {} tracks...", entries.len()))
            .await;
        let mut outcome = PlaylistOutcome { added: 0, failed: 0 };

        for entry in entries {
            let source = TrackSource::Remote(entry.track_id);
            let media_path = match self.fetch(&source, kind).await {
                Ok(path) => path,
                Err(err) => {
                    warn!(room = %room, title = %entry.title, error = %err, "Playlist track skipped");
                    outcome.failed += 1;
                    continue;
                }
            };

            let item = QueueItem::new(
                room,
                requested_by.clone(),
                entry.title,
                entry.duration_label,
                media_path,
                source,
                kind,
            );
            if self.queue.enqueue(item.clone(), false).await == 0 {
                match self.start_playback(room, item, None, StartKind::Fresh).await {
                    Ok(()) | Err(Error::AlreadyJoining(_) | Error::Superseded(_)) => {}
                    Err(err) => {
                        self.delete_status(room, status).await;
                        return Err(err);
                    }
                }
            }
            outcome.added += 1;
        }

        self.emit_queue_changed(room, QueueChangeTrigger::UserEnqueue).await;
        let mut text = format!("Added {} tracks to the queue", outcome.added);
        if outcome.failed > 0 {
            text.push_str(&format!(" ({} could not be downloaded)", outcome.failed));
        }
        self.replace_status(room, status, &text).await;
        Ok(outcome)
    }

    /// Advance to the next track, cancelling any pending loop
    pub async fn skip(&self, room: RoomId) -> Result<SkipOutcome> {
        let handle = self.arena.get(room).ok_or(Error::NoActiveSession(room))?;
        let (step, loop_cancelled, skipped) = {
            let mut state = handle.lock().await;
            if !state.is_active() {
                return Err(Error::NoActiveSession(room));
            }
            let loop_cancelled = state.loop_count != 0;
            state.loop_count = 0;
            let popped = state.queue.pop_head();
            let discard = popped.as_ref().and_then(|item| orphaned_temp_file(&state, item));
            let skipped = popped.map(|item| item.title);
            (self.advance_locked(&mut state), loop_cancelled, (skipped, discard))
        };
        let (skipped, discard) = skipped;
        if let Some(path) = discard {
            remove_temp_file(&path).await;
        }

        if loop_cancelled {
            info!(room = %room, "Skip cancelled pending loop");
            self.state.broadcast_event(VoxqEvent::LoopChanged {
                room_id: room,
                remaining: 0,
                timestamp: chrono::Utc::now(),
            });
            self.notify(room, "Loop disabled").await;
        }

        let now_playing = match &step {
            Step::Next(item) => Some(item.title.clone()),
            _ => None,
        };
        self.run_step(room, step, QueueChangeTrigger::UserSkip)
            .await?;

        Ok(SkipOutcome {
            loop_cancelled,
            skipped,
            now_playing,
        })
    }

    /// Restart the head from the beginning, re-fetching it if needed
    pub async fn replay(&self, room: RoomId) -> Result<()> {
        let item = {
            let handle = self.arena.get(room).ok_or(Error::NoActiveSession(room))?;
            let state = handle.lock().await;
            if !state.is_active() {
                return Err(Error::NoActiveSession(room));
            }
            state.queue.head().cloned().ok_or(Error::QueueEmpty(room))?
        };

        let cached = tokio::fs::try_exists(&item.media_path).await.unwrap_or(false);
        let media_path = if cached {
            item.media_path.clone()
        } else {
            info!(room = %room, title = %item.title, "Media gone, fetching again for replay");
            self.fetch(&item.source, item.kind).await?
        };

        let item = {
            let handle = self.arena.room(room);
            let mut state = handle.lock().await;
            match state.queue.head_mut() {
                Some(head) if head.id == item.id => {
                    head.media_path = media_path;
                    head.rewind_to_start();
                    head.clone()
                }
                // Head moved on while fetching; nothing to replay
                _ => return Err(Error::QueueEmpty(room)),
            }
        };

        self.start_playback(room, item, None, StartKind::Replay).await
    }

    /// Move the playback position of the head
    ///
    /// The engine is re-bound at the new offset, then the bookkeeping is
    /// adjusted. Returns the new position in seconds.
    pub async fn seek(&self, room: RoomId, seconds: u64, direction: Direction) -> Result<u64> {
        let _bind = self.bind_guard(room).await;
        let (item, target) = {
            let handle = self.arena.get(room).ok_or(Error::NoActiveSession(room))?;
            let state = handle.lock().await;
            if !state.is_active() {
                return Err(Error::NoActiveSession(room));
            }
            let head = state.queue.head().ok_or(Error::QueueEmpty(room))?;
            let target = match direction {
                Direction::Forward => head.played_seconds.saturating_add(seconds),
                Direction::Rewind => head.played_seconds.saturating_sub(seconds),
            };
            if let Some(duration) = head.duration_seconds() {
                if direction == Direction::Forward && target >= duration {
                    return Err(Error::SeekOutOfRange {
                        target: i64::try_from(target).unwrap_or(i64::MAX),
                        duration,
                    });
                }
            }
            (head.clone(), target)
        };

        self.registry
            .change_media(room, &item.media_path, item.kind, target)
            .await
            .map_err(Error::into_control_failure)?;

        let handle = self.arena.room(room);
        let mut state = handle.lock().await;
        if state.queue.head().map(|h| h.id) != Some(item.id) {
            return Err(Error::QueueEmpty(room));
        }
        let position = state
            .queue
            .adjust_played(seconds, direction)
            .unwrap_or(target);
        debug!(room = %room, position, "Seek applied");
        Ok(position)
    }

    pub async fn pause(&self, room: RoomId) -> Result<()> {
        self.registry
            .pause(room)
            .await
            .map_err(Error::into_control_failure)
    }

    pub async fn resume(&self, room: RoomId) -> Result<()> {
        self.registry
            .resume(room)
            .await
            .map_err(Error::into_control_failure)
    }

    pub async fn mute(&self, room: RoomId) -> Result<()> {
        self.registry
            .mute(room)
            .await
            .map_err(Error::into_control_failure)
    }

    pub async fn unmute(&self, room: RoomId) -> Result<()> {
        self.registry
            .unmute(room)
            .await
            .map_err(Error::into_control_failure)
    }

    /// Set the number of automatic replays of the head (0 disables)
    pub async fn set_loop(&self, room: RoomId, count: u32) -> Result<u8> {
        let max = self.settings.max_loop;
        let count = u8::try_from(count)
            .ok()
            .filter(|c| *c <= max)
            .ok_or(Error::InvalidLoopCount { got: count, max })?;

        {
            let handle = self.arena.get(room).ok_or(Error::NoActiveSession(room))?;
            let mut state = handle.lock().await;
            if !state.is_active() {
                return Err(Error::NoActiveSession(room));
            }
            state.loop_count = count;
        }

        info!(room = %room, count, "Loop count set");
        self.state.broadcast_event(VoxqEvent::LoopChanged {
            room_id: room,
            remaining: count,
            timestamp: chrono::Utc::now(),
        });
        Ok(count)
    }

    /// End the session and clear the queue
    pub async fn stop(&self, room: RoomId) -> Result<()> {
        let queued = self.queue.len(room).await;
        if !self.is_active(room) && queued == 0 {
            return Err(Error::NoActiveSession(room));
        }
        self.teardown(room, SessionEndReason::Stopped).await;
        self.notify(room, "Stopped playback").await;
        Ok(())
    }

    pub async fn set_autoend(&self, room: RoomId, enabled: bool) -> Result<()> {
        self.store.set_autoend(room, enabled).await?;
        info!(room = %room, enabled, "Autoend toggled");
        Ok(())
    }

    // === Queries ===

    pub async fn queue_snapshot(&self, room: RoomId) -> Vec<QueueItem> {
        self.queue.snapshot(room).await
    }

    pub async fn now_playing(&self, room: RoomId) -> Option<NowPlaying> {
        let handle = self.arena.get(room)?;
        let state = handle.lock().await;
        let session = state.session()?;
        let head = state.queue.head()?;
        Some(NowPlaying {
            item: head.clone(),
            played_seconds: head.played_seconds,
            position_label: format_duration_label(head.played_seconds),
            paused: session.paused,
            muted: session.muted,
            loop_remaining: state.loop_count,
        })
    }

    // === Engine and platform notifications ===

    /// Stream of the head finished: loop, advance or leave
    pub async fn handle_stream_ended(&self, room: RoomId) {
        let Some(handle) = self.arena.get(room) else {
            return;
        };
        let (step, discard) = {
            let mut state = handle.lock().await;
            if !state.is_active() {
                debug!(room = %room, "Stream end for inactive room ignored");
                return;
            }

            if state.loop_count > 0 {
                state.loop_count -= 1;
                let remaining = state.loop_count;
                let step = match state.queue.head_mut() {
                    Some(head) => {
                        head.rewind_to_start();
                        Step::Replay(head.clone(), remaining)
                    }
                    None => Step::Exhausted(self.registry.take_session(&mut state)),
                };
                (step, None)
            } else {
                let popped = state.queue.pop_head();
                let discard = popped.as_ref().and_then(|item| orphaned_temp_file(&state, item));
                (self.advance_locked(&mut state), discard)
            }
        };

        if let Some(path) = discard {
            remove_temp_file(&path).await;
        }
        if let Err(e) = self
            .run_step(room, step, QueueChangeTrigger::TrackCompletion)
            .await
        {
            warn!(room = %room, "Advancing after stream end failed: {}", e);
        }
    }

    /// Engine connection changed; a terminal state ends the room
    pub async fn handle_connection_changed(&self, room: RoomId, info: ConnectionInfo) {
        if !info.state.is_terminal() {
            self.registry.set_connection_state(room, info.state).await;
            return;
        }
        if !self.is_active(room) {
            return;
        }

        warn!(room = %room, state = ?info.state, "Call connection lost");
        if self.teardown(room, SessionEndReason::ConnectionLost).await {
            self.notify(room, "Voice chat connection lost, playback stopped")
                .await;
        }
    }

    /// A listener joined or left the room's call
    pub async fn on_participants_changed(&self, room: RoomId, user: UserId, joined: bool) -> bool {
        self.registry.update_participant(room, user, joined).await
    }

    // === Background work ===

    /// Add streamed time to the head of every unpaused session
    pub async fn accrue_played(&self, elapsed_ms: u64) {
        for room in self.arena.active_rooms() {
            let Some(handle) = self.arena.get(room) else {
                continue;
            };
            let mut state = handle.lock().await;
            let playing = state.session().map(|s| !s.paused).unwrap_or(false);
            if playing {
                state.queue.accrue(elapsed_ms);
            }
        }
    }

    /// End sessions that have had no listeners for the inactivity timeout
    ///
    /// Per-room failures are logged and skipped. Returns the rooms ended.
    pub async fn sweep_inactive(&self, now: Instant) -> Vec<RoomId> {
        let timeout = self.settings.inactivity_timeout();
        let mut ended = Vec::new();

        for room in self.arena.active_rooms() {
            match self.store.autoend(room).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(room = %room, "Reading autoend flag failed: {}", e);
                    continue;
                }
            }

            let Some(handle) = self.arena.get(room) else {
                continue;
            };
            let (taken, removed) = {
                let mut state = handle.lock().await;
                let idle = state
                    .session()
                    .and_then(|s| s.empty_since)
                    .map(|since| now.saturating_duration_since(since) >= timeout)
                    .unwrap_or(false);
                if !idle {
                    continue;
                }
                let taken = self.registry.take_session(&mut state);
                (taken, state.queue.clear())
            };

            info!(room = %room, "Ending inactive session");
            self.registry
                .finish_leave(room, taken, SessionEndReason::Inactivity)
                .await;
            self.discard_items(&removed).await;
            self.emit_queue_changed(room, QueueChangeTrigger::Cleared).await;
            self.notify(room, "Ended the voice chat due to inactivity")
                .await;
            ended.push(room);
        }

        ended
    }

    /// Forget rooms with no session, queue or pending loop
    pub fn reap_vacant_rooms(&self) -> usize {
        let reaped = self.arena.reap_vacant();
        if reaped > 0 {
            debug!("Dropped state of {} vacant rooms", reaped);
        }
        reaped
    }

    /// Tell rooms left live by a previous process that playback stopped
    pub async fn notify_interrupted(&self) -> Result<usize> {
        let markers = self.store.active_markers().await?;
        for marker in &markers {
            info!(room = %marker.room_id, since = %marker.since, "Clearing stale ActiveVC marker");
            self.notify(
                marker.room_id,
                "Playback was interrupted by a restart, play again to resume",
            )
            .await;
            if let Err(e) = self.store.clear_active(marker.room_id).await {
                warn!(room = %marker.room_id, "Clearing stale marker failed: {}", e);
            }
        }
        Ok(markers.len())
    }

    /// Leave every room; used on shutdown
    pub async fn shutdown(&self) {
        let rooms = self.active_rooms();
        info!("Leaving {} active rooms", rooms.len());
        for room in rooms {
            self.teardown(room, SessionEndReason::Shutdown).await;
        }
    }

    // === Internals ===

    /// Leave and clear the queue atomically; true if a session was ended
    async fn teardown(&self, room: RoomId, reason: SessionEndReason) -> bool {
        let Some(handle) = self.arena.get(room) else {
            return false;
        };
        let (taken, removed) = {
            let mut state = handle.lock().await;
            let taken = self.registry.take_session(&mut state);
            (taken, state.queue.clear())
        };
        let had_session = taken.is_some();

        self.registry.finish_leave(room, taken, reason).await;
        if !removed.is_empty() {
            self.discard_items(&removed).await;
            self.emit_queue_changed(room, QueueChangeTrigger::Cleared).await;
        }
        had_session
    }

    /// Pick what follows a popped head; call with the room lock held
    fn advance_locked(&self, state: &mut RoomState) -> Step {
        match state.queue.head_mut() {
            Some(head) => {
                head.rewind_to_start();
                Step::Next(head.clone())
            }
            None => Step::Exhausted(self.registry.take_session(state)),
        }
    }

    async fn run_step(&self, room: RoomId, step: Step, trigger: QueueChangeTrigger) -> Result<()> {
        let started = match step {
            Step::Next(item) => {
                self.emit_queue_changed(room, trigger).await;
                self.start_playback(room, item, None, StartKind::Fresh).await
            }
            Step::Replay(item, remaining) => {
                debug!(room = %room, remaining, "Looping current track");
                self.state.broadcast_event(VoxqEvent::LoopChanged {
                    room_id: room,
                    remaining,
                    timestamp: chrono::Utc::now(),
                });
                self.start_playback(room, item, None, StartKind::Replay).await
            }
            Step::Exhausted(taken) => {
                let had_session = taken.is_some();
                self.emit_queue_changed(room, trigger).await;
                self.registry
                    .finish_leave(room, taken, SessionEndReason::QueueExhausted)
                    .await;
                if had_session {
                    info!(room = %room, "Queue finished");
                    self.notify(room, "Queue finished, leaving the voice chat")
                        .await;
                }
                Ok(())
            }
        };
        match started {
            // A later advance already bound the new head
            Err(Error::Superseded(_)) => Ok(()),
            other => other,
        }
    }

    /// Serialize media binds of one room
    async fn bind_guard(&self, room: RoomId) -> OwnedMutexGuard<()> {
        let bind = self.arena.room(room).lock().await.bind_lock();
        bind.lock_owned().await
    }

    /// Bind `item` to the room's call, joining if needed
    ///
    /// On failure the room is fully unwound: status message removed, failure
    /// notice sent, queue cleared, temp files deleted, and a live call whose
    /// media could not be switched is left. Losing the room to another
    /// caller's join in flight is not a failure of this track and leaves the
    /// queue as it is; a join cancelled by a leave drops only this track.
    async fn start_playback(
        &self,
        room: RoomId,
        item: QueueItem,
        status: Option<MessageId>,
        kind: StartKind,
    ) -> Result<()> {
        let _bind = self.bind_guard(room).await;
        let is_head = {
            let handle = self.arena.room(room);
            let state = handle.lock().await;
            state.queue.head().map(|head| head.id) == Some(item.id)
        };
        if !is_head {
            debug!(room = %room, title = %item.title, "Queue moved on, not binding");
            return Err(Error::Superseded(room));
        }

        let thumbnail = match bounded(
            self.settings.platform_timeout(),
            "render a thumbnail",
            self.thumbnailer.generate(&item),
        )
        .await
        {
            Ok(path) => path,
            Err(e) => {
                debug!(room = %room, "Thumbnail skipped: {}", e);
                None
            }
        };

        match self
            .registry
            .start(room, &item.media_path, item.kind, 0)
            .await
        {
            Ok(mode) => {
                let replay = kind == StartKind::Replay;
                info!(room = %room, title = %item.title, ?mode, replay, "Playback started");
                self.notify(room, &now_playing_text(&item, kind, mode)).await;
                if kind == StartKind::Fresh {
                    self.record_play(&item).await;
                }
                self.delete_status(room, status).await;
                if let Some(path) = thumbnail {
                    remove_temp_file(&path).await;
                }
                self.state.broadcast_event(VoxqEvent::TrackStarted {
                    room_id: room,
                    title: item.title.clone(),
                    duration_label: item.duration_label.clone(),
                    requested_by: item.requested_by.display_name.clone(),
                    replay,
                    timestamp: chrono::Utc::now(),
                });
                Ok(())
            }
            Err(err @ Error::AlreadyJoining(_)) => {
                info!(room = %room, title = %item.title, "Join already in flight, track stays queued");
                if let Some(path) = thumbnail {
                    remove_temp_file(&path).await;
                }
                Err(err)
            }
            Err(err @ Error::Cancelled(_)) => {
                // Whoever asked for the leave owns the rest of the queue
                info!(room = %room, title = %item.title, "Join cancelled by a leave");
                self.delete_status(room, status).await;
                let (removed, orphan) = {
                    let handle = self.arena.room(room);
                    let mut state = handle.lock().await;
                    let removed = state.queue.remove(item.id);
                    let orphan = removed
                        .as_ref()
                        .and_then(|popped| orphaned_temp_file(&state, popped));
                    (removed.is_some(), orphan)
                };
                if let Some(path) = orphan {
                    remove_temp_file(&path).await;
                }
                if let Some(path) = thumbnail {
                    remove_temp_file(&path).await;
                }
                if removed {
                    self.emit_queue_changed(room, QueueChangeTrigger::Cleared).await;
                }
                Err(err)
            }
            Err(err) => {
                warn!(room = %room, title = %item.title, error = %err, "Starting playback failed");
                self.delete_status(room, status).await;
                self.notify(room, &format!("Playback failed: {}", err.user_message()))
                    .await;

                let (taken, removed) = {
                    let handle = self.arena.room(room);
                    let mut state = handle.lock().await;
                    let taken = if state.is_active() {
                        self.registry.take_session(&mut state)
                    } else {
                        None
                    };
                    (taken, state.queue.clear())
                };
                self.registry
                    .finish_leave(room, taken, SessionEndReason::PlaybackFailed)
                    .await;

                if item.source.is_remote() && !removed.iter().any(|r| r.id == item.id) {
                    remove_temp_file(&item.media_path).await;
                }
                self.discard_items(&removed).await;
                if let Some(path) = thumbnail {
                    remove_temp_file(&path).await;
                }

                self.emit_queue_changed(room, QueueChangeTrigger::Cleared).await;
                self.state.broadcast_event(VoxqEvent::JoinFailed {
                    room_id: room,
                    reason: err.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                Err(err.into_join_failure())
            }
        }
    }

    async fn fetch(&self, source: &TrackSource, kind: MediaKind) -> Result<PathBuf> {
        match source {
            TrackSource::Attachment(path) => {
                if tokio::fs::try_exists(path).await.unwrap_or(false) {
                    Ok(path.clone())
                } else {
                    Err(Error::DownloadFailed(format!(
                        "attachment {} is not available",
                        path.display()
                    )))
                }
            }
            TrackSource::Remote(track_id) => {
                self.resolver
                    .resolve(track_id, kind)
                    .await
                    .map_err(|e| match e {
                        Error::DownloadFailed(_) => e,
                        other => Error::DownloadFailed(other.to_string()),
                    })
            }
        }
    }

    async fn record_play(&self, item: &QueueItem) {
        if let Err(e) = self.store.increment_play_count().await {
            warn!("Updating play count failed: {}", e);
        }
        if let Err(e) = self
            .store
            .increment_user_plays(item.requested_by.user_id)
            .await
        {
            warn!(user = %item.requested_by.user_id, "Updating user play count failed: {}", e);
        }
    }

    async fn resolve_requester(&self, requester: Requester) -> Requester {
        if !requester.display_name.trim().is_empty() {
            return requester;
        }
        let display_name = match bounded(
            self.settings.platform_timeout(),
            "look up a display name",
            self.platform.display_name(requester.user_id),
        )
        .await
        {
            Ok(name) => name,
            Err(e) => {
                debug!(user = %requester.user_id, "Display name lookup failed: {}", e);
                requester.user_id.to_string()
            }
        };
        Requester {
            user_id: requester.user_id,
            display_name,
        }
    }

    async fn discard_items(&self, items: &[QueueItem]) {
        for item in items.iter().filter(|i| i.source.is_remote()) {
            remove_temp_file(&item.media_path).await;
        }
    }

    async fn emit_queue_changed(&self, room: RoomId, trigger: QueueChangeTrigger) {
        let length = self.queue.len(room).await;
        self.state.broadcast_event(VoxqEvent::QueueChanged {
            room_id: room,
            length,
            trigger,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Send a room notice; failures are logged, never propagated
    async fn notify(&self, room: RoomId, text: &str) -> Option<MessageId> {
        match bounded(
            self.settings.platform_timeout(),
            "send a message",
            self.platform.send_message(room, text),
        )
        .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(room = %room, "Sending notice failed: {}", e);
                None
            }
        }
    }

    /// Turn the pending status message into `text`, or send it fresh
    async fn replace_status(&self, room: RoomId, status: Option<MessageId>, text: &str) {
        if let Some(message) = status {
            match bounded(
                self.settings.platform_timeout(),
                "edit a message",
                self.platform.edit_message(room, message, text),
            )
            .await
            {
                Ok(()) => return,
                Err(e) => debug!(room = %room, "Editing status failed: {}", e),
            }
        }
        self.notify(room, text).await;
    }

    async fn delete_status(&self, room: RoomId, status: Option<MessageId>) {
        let Some(message) = status else {
            return;
        };
        if let Err(e) = bounded(
            self.settings.platform_timeout(),
            "delete a message",
            self.platform.delete_message(room, message),
        )
        .await
        {
            debug!(room = %room, "Deleting status failed: {}", e);
        }
    }
}

#[async_trait]
impl EngineEventHandler for Player {
    async fn on_stream_ended(&self, room: RoomId) {
        self.handle_stream_ended(room).await;
    }

    async fn on_connection_changed(&self, room: RoomId, info: ConnectionInfo) {
        self.handle_connection_changed(room, info).await;
    }
}

fn now_playing_text(item: &QueueItem, kind: StartKind, mode: StartMode) -> String {
    let prefix = match (kind, mode) {
        (StartKind::Replay, _) => "Replaying",
        (StartKind::Fresh, StartMode::Joined) => "Started streaming",
        (StartKind::Fresh, StartMode::Switched) => "Now playing",
    };
    let duration = if item.duration_label.is_empty() {
        "?"
    } else {
        item.duration_label.as_str()
    };
    format!(
        "{}: {} [{}] requested by {}",
        prefix, item.title, duration, item.requested_by.display_name
    )
}

/// Downloaded file of a popped item that nothing left in the queue uses
fn orphaned_temp_file(state: &RoomState, popped: &QueueItem) -> Option<PathBuf> {
    if !popped.source.is_remote() || state.queue.references(&popped.media_path) {
        return None;
    }
    Some(popped.media_path.clone())
}

async fn remove_temp_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed temp file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Removing temp file failed: {}", e),
    }
}
