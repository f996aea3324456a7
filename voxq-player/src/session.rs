//! Session registry
//!
//! Owns the per-room session state machine
//! `Idle -> Joining -> Active -> Leaving -> Idle` and drives the engine and
//! the chat platform through the join handshake.
//!
//! A join claims the room under its lock, releases the lock for the
//! handshake, then re-locks to commit or roll back. A failed or cancelled
//! join always disconnects the engine, so no engine call outlives its
//! session and no session exists without an engine call.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use voxq_common::config::RuntimeSettings;
use voxq_common::events::{SessionEndReason, VoxqEvent};
use voxq_common::{MediaKind, RoomId, UserId};

use crate::collab::{ChatPlatform, GroupCall};
use crate::db::StateStore;
use crate::engine::{CallEngine, ConnectionState, MediaSpec};
use crate::error::{Error, Result};
use crate::room::{Phase, RoomArena, RoomState, Session, SessionSnapshot};
use crate::state::SharedState;

/// Run `fut`, failing with `Timeout` if it takes longer than `limit`
pub(crate) async fn bounded<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Timed out after {:?} during {}", limit, op);
            Err(Error::Timeout { op })
        }
    }
}

/// How [`SessionRegistry::start`] got the media playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// A new call was joined
    Joined,
    /// The live call was re-bound to the new media
    Switched,
}

/// Thin engine delegations that need a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Pause,
    Resume,
    Mute,
    Unmute,
}

impl Control {
    fn verb(self) -> &'static str {
        match self {
            Control::Pause => "pause",
            Control::Resume => "resume",
            Control::Mute => "mute",
            Control::Unmute => "unmute",
        }
    }

    fn apply(self, session: &mut Session) {
        match self {
            Control::Pause => session.paused = true,
            Control::Resume => session.paused = false,
            Control::Mute => session.muted = true,
            Control::Unmute => session.muted = false,
        }
    }
}

pub struct SessionRegistry {
    arena: Arc<RoomArena>,
    engine: Arc<dyn CallEngine>,
    platform: Arc<dyn ChatPlatform>,
    store: Arc<dyn StateStore>,
    state: Arc<SharedState>,
    platform_timeout: Duration,
    engine_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(
        arena: Arc<RoomArena>,
        engine: Arc<dyn CallEngine>,
        platform: Arc<dyn ChatPlatform>,
        store: Arc<dyn StateStore>,
        state: Arc<SharedState>,
        settings: &RuntimeSettings,
    ) -> Self {
        Self {
            arena,
            engine,
            platform,
            store,
            state,
            platform_timeout: settings.platform_timeout(),
            engine_timeout: settings.engine_timeout(),
        }
    }

    /// Join the room's group call and bind `media_path`
    ///
    /// Fails with `AlreadyJoining`/`AlreadyActive` without touching the
    /// engine if another join is in flight or a session is live. A previous
    /// session still leaving is waited out first.
    pub async fn join(&self, room: RoomId, media_path: &Path, kind: MediaKind) -> Result<()> {
        if !self.claim(room).await? {
            return Err(Error::AlreadyActive(room));
        }
        self.run_join(room, media_path, kind).await
    }

    /// Join if idle, otherwise re-bind the live call to the new media
    pub async fn start(
        &self,
        room: RoomId,
        media_path: &Path,
        kind: MediaKind,
        start_at: u64,
    ) -> Result<StartMode> {
        if self.claim(room).await? {
            self.run_join(room, media_path, kind).await?;
            Ok(StartMode::Joined)
        } else {
            self.change_media(room, media_path, kind, start_at).await?;
            Ok(StartMode::Switched)
        }
    }

    /// Move an idle room to `Joining`; false if a session is already live
    ///
    /// A room that is leaving, or whose join was told to roll back, is on
    /// its way to `Idle`; wait for that instead of failing.
    async fn claim(&self, room: RoomId) -> Result<bool> {
        let handle = self.arena.room(room);
        loop {
            let mut state = handle.lock().await;
            let signal = match &state.phase {
                Phase::Idle => None,
                Phase::Active(_) => return Ok(false),
                Phase::Joining {
                    leave_requested: false,
                } => return Err(Error::AlreadyJoining(room)),
                Phase::Joining {
                    leave_requested: true,
                }
                | Phase::Leaving => Some(state.idle_signal()),
            };
            let Some(signal) = signal else {
                state.phase = Phase::Joining {
                    leave_requested: false,
                };
                return Ok(true);
            };

            // Register before unlocking so the wake-up cannot be missed
            let idle = signal.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            drop(state);
            debug!(room = %room, "Waiting for the previous session to wind down");
            idle.await;
        }
    }

    /// Handshake and commit for a room already claimed as `Joining`
    async fn run_join(&self, room: RoomId, media_path: &Path, kind: MediaKind) -> Result<()> {
        info!(room = %room, path = %media_path.display(), kind = %kind, "Joining call");

        let mut joined_call: Option<GroupCall> = None;
        let call = match self.handshake(room, media_path, kind, &mut joined_call).await {
            Ok(call) => call,
            Err(err) => {
                warn!(room = %room, error = %err, "Join failed, rolling back");
                self.unwind(room, joined_call.as_ref()).await;
                return Err(err);
            }
        };

        // The marker exists before the session does; a rollback clears it
        if let Err(e) = self.store.mark_active(room, kind).await {
            warn!(room = %room, "Failed to record ActiveVC marker: {}", e);
        }

        let committed = {
            let handle = self.arena.room(room);
            let mut state = handle.lock().await;
            if matches!(state.phase, Phase::Joining { leave_requested: false }) {
                let mut session =
                    Session::new(room, media_path.to_path_buf(), kind, call.clone());
                // connect() returned, so the transport is up
                session.connection_state = ConnectionState::Connected;
                state.phase = Phase::Active(session);
                self.arena.set_active(room, true);
                true
            } else {
                false
            }
        };

        if !committed {
            info!(room = %room, "Leave requested during join, rolling back");
            self.clear_marker(room).await;
            self.unwind(room, Some(&call)).await;
            return Err(Error::Cancelled(room));
        }

        self.state.broadcast_event(VoxqEvent::SessionStarted {
            room_id: room,
            media_kind: kind,
            timestamp: chrono::Utc::now(),
        });
        info!(room = %room, "Session active");
        Ok(())
    }

    async fn handshake(
        &self,
        room: RoomId,
        media_path: &Path,
        kind: MediaKind,
        joined_call: &mut Option<GroupCall>,
    ) -> Result<GroupCall> {
        let call = bounded(
            self.platform_timeout,
            "find the group call",
            self.platform.group_call(room),
        )
        .await?;

        let offer = bounded(
            self.engine_timeout,
            "create a call offer",
            self.engine.create_offer(room),
        )
        .await?;

        let answer = bounded(
            self.platform_timeout,
            "join the group call",
            self.platform
                .join_group_call(room, &call, &offer, kind.is_video()),
        )
        .await?;
        *joined_call = Some(call.clone());

        if answer.trim().is_empty() {
            return Err(Error::HandshakeRejected(
                "platform returned an empty answer".to_string(),
            ));
        }

        // Peer-to-peer calls are not supported; always a group connection
        bounded(
            self.engine_timeout,
            "connect",
            self.engine.connect(room, &answer, false),
        )
        .await?;

        bounded(
            self.engine_timeout,
            "set the media source",
            self.engine
                .set_media_source(room, MediaSpec::file(media_path, kind)),
        )
        .await?;

        Ok(call)
    }

    /// Undo a partial join and return the room to `Idle`
    async fn unwind(&self, room: RoomId, joined_call: Option<&GroupCall>) {
        if let Err(e) = bounded(self.engine_timeout, "disconnect", self.engine.disconnect(room)).await
        {
            warn!(room = %room, "Engine disconnect during rollback failed: {}", e);
        }

        if let Some(call) = joined_call {
            if let Err(e) = bounded(
                self.platform_timeout,
                "leave the group call",
                self.platform.leave_group_call(room, call),
            )
            .await
            {
                warn!(room = %room, "Leaving group call during rollback failed: {}", e);
            }
        }

        let handle = self.arena.room(room);
        let mut state = handle.lock().await;
        if matches!(state.phase, Phase::Joining { .. }) {
            state.set_idle();
        }
    }

    async fn clear_marker(&self, room: RoomId) {
        if let Err(e) = self.store.clear_active(room).await {
            warn!(room = %room, "Failed to clear ActiveVC marker: {}", e);
        }
    }

    /// Re-bind the live call's media
    pub async fn change_media(
        &self,
        room: RoomId,
        media_path: &Path,
        kind: MediaKind,
        start_at: u64,
    ) -> Result<()> {
        if !self.is_active(room) {
            return Err(Error::SessionNotFound(room));
        }

        debug!(room = %room, path = %media_path.display(), start_at, "Re-binding media");
        bounded(
            self.engine_timeout,
            "set the media source",
            self.engine
                .set_media_source(room, MediaSpec::file(media_path, kind).starting_at(start_at)),
        )
        .await?;

        let handle = self.arena.room(room);
        let mut state = handle.lock().await;
        let session = state.session_mut().ok_or(Error::SessionNotFound(room))?;
        session.media_path = media_path.to_path_buf();
        session.kind = kind;
        Ok(())
    }

    /// End the room's session; a no-op when there is none
    ///
    /// Resets the loop counter. A join still in its handshake is told to
    /// roll back instead.
    pub async fn leave(&self, room: RoomId, reason: SessionEndReason) -> Result<()> {
        let Some(handle) = self.arena.get(room) else {
            return Ok(());
        };
        let taken = {
            let mut state = handle.lock().await;
            self.take_session(&mut state)
        };
        self.finish_leave(room, taken, reason).await;
        Ok(())
    }

    /// First half of a leave, for callers already holding the room lock
    ///
    /// Moves an active room to `Leaving` and hands back its session; the
    /// caller must pass the result to [`SessionRegistry::finish_leave`]
    /// after releasing the lock.
    pub(crate) fn take_session(&self, state: &mut RoomState) -> Option<Session> {
        state.loop_count = 0;
        match std::mem::replace(&mut state.phase, Phase::Idle) {
            Phase::Active(session) => {
                state.phase = Phase::Leaving;
                self.arena.set_active(state.room_id, false);
                Some(session)
            }
            Phase::Joining { .. } => {
                state.phase = Phase::Joining { leave_requested: true };
                None
            }
            other => {
                state.phase = other;
                None
            }
        }
    }

    /// Second half of a leave: engine and platform teardown
    pub(crate) async fn finish_leave(
        &self,
        room: RoomId,
        taken: Option<Session>,
        reason: SessionEndReason,
    ) {
        let Some(session) = taken else {
            debug!(room = %room, "Leave requested with no session");
            return;
        };
        info!(room = %room, reason = %reason, "Leaving call");

        if let Err(e) = bounded(self.engine_timeout, "disconnect", self.engine.disconnect(room)).await
        {
            warn!(room = %room, "Engine disconnect failed: {}", e);
        }
        if let Err(e) = bounded(
            self.platform_timeout,
            "leave the group call",
            self.platform.leave_group_call(room, &session.group_call),
        )
        .await
        {
            warn!(room = %room, "Leaving group call failed: {}", e);
        }

        // Cleared while still `Leaving`, so it cannot erase the marker of a
        // join that claims the room afterwards
        self.clear_marker(room).await;
        {
            let handle = self.arena.room(room);
            let mut state = handle.lock().await;
            if matches!(state.phase, Phase::Leaving) {
                state.set_idle();
            }
        }

        self.state.broadcast_event(VoxqEvent::SessionEnded {
            room_id: room,
            reason,
            timestamp: chrono::Utc::now(),
        });
    }

    pub async fn pause(&self, room: RoomId) -> Result<()> {
        self.control(room, Control::Pause).await
    }

    pub async fn resume(&self, room: RoomId) -> Result<()> {
        self.control(room, Control::Resume).await
    }

    pub async fn mute(&self, room: RoomId) -> Result<()> {
        self.control(room, Control::Mute).await
    }

    pub async fn unmute(&self, room: RoomId) -> Result<()> {
        self.control(room, Control::Unmute).await
    }

    async fn control(&self, room: RoomId, op: Control) -> Result<()> {
        if !self.is_active(room) {
            return Err(Error::SessionNotFound(room));
        }

        let call = match op {
            Control::Pause => self.engine.pause(room),
            Control::Resume => self.engine.resume(room),
            Control::Mute => self.engine.mute(room),
            Control::Unmute => self.engine.unmute(room),
        };
        bounded(self.engine_timeout, op.verb(), call).await?;

        let (paused, muted) = {
            let handle = self.arena.room(room);
            let mut state = handle.lock().await;
            let session = state.session_mut().ok_or(Error::SessionNotFound(room))?;
            op.apply(session);
            (session.paused, session.muted)
        };
        debug!(room = %room, op = op.verb(), "Playback control applied");

        self.state.broadcast_event(VoxqEvent::PlaybackStateChanged {
            room_id: room,
            paused,
            muted,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Record a non-terminal connection state; false if no session
    pub async fn set_connection_state(&self, room: RoomId, connection: ConnectionState) -> bool {
        let Some(handle) = self.arena.get(room) else {
            return false;
        };
        let mut state = handle.lock().await;
        match state.session_mut() {
            Some(session) => {
                session.connection_state = connection;
                true
            }
            None => false,
        }
    }

    /// Record a listener joining or leaving; false if no session
    pub async fn update_participant(&self, room: RoomId, user: UserId, joined: bool) -> bool {
        let Some(handle) = self.arena.get(room) else {
            return false;
        };
        let mut state = handle.lock().await;
        match state.session_mut() {
            Some(session) => {
                session.update_participant(user, joined);
                true
            }
            None => false,
        }
    }

    pub async fn snapshot(&self, room: RoomId) -> Option<SessionSnapshot> {
        let handle = self.arena.get(room)?;
        let state = handle.lock().await;
        state.session().map(Session::snapshot)
    }

    /// Non-blocking existence check
    pub fn is_active(&self, room: RoomId) -> bool {
        self.arena.is_active(room)
    }

    pub fn active_rooms(&self) -> Vec<RoomId> {
        self.arena.active_rooms()
    }
}
