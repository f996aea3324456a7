//! Test helper modules for voxq-player integration tests
//!
//! Provides recording stand-ins for every collaborator plus a harness that
//! wires them to a [`Player`] over an in-memory database.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use voxq_common::config::RuntimeSettings;
use voxq_common::events::VoxqEvent;
use voxq_common::{MediaKind, RoomId, UserId};
use voxq_player::collab::{ChatPlatform, GroupCall, MediaResolver, MessageId, NoThumbnails};
use voxq_player::db::init::init_memory_database;
use voxq_player::db::{ActiveMarker, SqliteStore, StateStore};
use voxq_player::engine::{
    event_channel, CallEngine, ConnectionInfo, ConnectionState, EngineEvent, EngineEventHandler,
    EngineEventSender, EventBridge, MediaSpec,
};
use voxq_player::orchestrator::PlayRequest;
use voxq_player::queue::{Requester, TrackSource};
use voxq_player::{Error, Player, PlayerDeps, Result, SharedState};

// ============================================================================
// Engine
// ============================================================================

/// One call made into the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateOffer(RoomId),
    Connect(RoomId),
    SetMedia(RoomId, MediaSpec),
    Pause(RoomId),
    Resume(RoomId),
    Mute(RoomId),
    Unmute(RoomId),
    Disconnect(RoomId),
}

/// Engine that records every call and fails on request
pub struct MockEngine {
    calls: Mutex<Vec<EngineCall>>,
    events: EngineEventSender,
    pub fail_connect: AtomicBool,
    pub fail_set_media: AtomicBool,
    offer_delay: Mutex<Option<Duration>>,
    disconnect_delay: Mutex<Option<Duration>>,
}

impl MockEngine {
    pub fn new(events: EngineEventSender) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            events,
            fail_connect: AtomicBool::new(false),
            fail_set_media: AtomicBool::new(false),
            offer_delay: Mutex::new(None),
            disconnect_delay: Mutex::new(None),
        }
    }

    pub fn delay_offers(&self, delay: Duration) {
        *self.offer_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_disconnects(&self, delay: Duration) {
        *self.disconnect_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn disconnects(&self, room: RoomId) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == EngineCall::Disconnect(room))
            .count()
    }

    /// Media specs bound to `room`, oldest first
    pub fn media_binds(&self, room: RoomId) -> Vec<MediaSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::SetMedia(r, spec) if r == room => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Report the room's stream as finished through the event channel
    pub fn end_stream(&self, room: RoomId) {
        let _ = self.events.send(EngineEvent::StreamEnded(room));
    }

    pub fn report_connection(&self, room: RoomId, state: ConnectionState) {
        let _ = self
            .events
            .send(EngineEvent::ConnectionChanged(room, ConnectionInfo { state }));
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CallEngine for MockEngine {
    async fn create_offer(&self, room: RoomId) -> Result<String> {
        self.record(EngineCall::CreateOffer(room));
        let delay = *self.offer_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(format!("offer-{}", room))
    }

    async fn connect(&self, room: RoomId, _answer: &str, _peer_to_peer: bool) -> Result<()> {
        self.record(EngineCall::Connect(room));
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::EngineUnavailable("connect refused".to_string()));
        }
        Ok(())
    }

    async fn set_media_source(&self, room: RoomId, media: MediaSpec) -> Result<()> {
        self.record(EngineCall::SetMedia(room, media));
        if self.fail_set_media.load(Ordering::SeqCst) {
            return Err(Error::EngineUnavailable("media rejected".to_string()));
        }
        Ok(())
    }

    async fn pause(&self, room: RoomId) -> Result<()> {
        self.record(EngineCall::Pause(room));
        Ok(())
    }

    async fn resume(&self, room: RoomId) -> Result<()> {
        self.record(EngineCall::Resume(room));
        Ok(())
    }

    async fn mute(&self, room: RoomId) -> Result<()> {
        self.record(EngineCall::Mute(room));
        Ok(())
    }

    async fn unmute(&self, room: RoomId) -> Result<()> {
        self.record(EngineCall::Unmute(room));
        Ok(())
    }

    async fn disconnect(&self, room: RoomId) -> Result<()> {
        self.record(EngineCall::Disconnect(room));
        let delay = *self.disconnect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

// ============================================================================
// Chat platform
// ============================================================================

/// Platform that records messages and group-call traffic
#[derive(Default)]
pub struct MockPlatform {
    no_call: Mutex<HashSet<RoomId>>,
    messages: Mutex<HashMap<MessageId, (RoomId, String)>>,
    deleted: Mutex<Vec<MessageId>>,
    next_id: AtomicI64,
    pub joins: AtomicUsize,
    pub leaves: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_group_call(&self, room: RoomId) {
        self.no_call.lock().unwrap().insert(room);
    }

    /// Current text of every undeleted message in `room`, oldest first
    pub fn texts(&self, room: RoomId) -> Vec<String> {
        let messages = self.messages.lock().unwrap();
        let deleted = self.deleted.lock().unwrap();
        let mut found: Vec<(i64, String)> = messages
            .iter()
            .filter(|(id, (r, _))| *r == room && !deleted.contains(id))
            .map(|(id, (_, text))| (id.0, text.clone()))
            .collect();
        found.sort();
        found.into_iter().map(|(_, text)| text).collect()
    }

    pub fn has_text(&self, room: RoomId, needle: &str) -> bool {
        self.texts(room).iter().any(|t| t.contains(needle))
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    async fn group_call(&self, room: RoomId) -> Result<GroupCall> {
        if self.no_call.lock().unwrap().contains(&room) {
            return Err(Error::NoGroupCall(room));
        }
        Ok(GroupCall {
            id: format!("call-{}", room),
        })
    }

    async fn join_group_call(
        &self,
        _room: RoomId,
        _call: &GroupCall,
        offer: &str,
        _video: bool,
    ) -> Result<String> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        Ok(format!("answer-for-{}", offer))
    }

    async fn leave_group_call(&self, _room: RoomId, _call: &GroupCall) -> Result<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_message(&self, room: RoomId, text: &str) -> Result<MessageId> {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.messages
            .lock()
            .unwrap()
            .insert(id, (room, text.to_string()));
        Ok(id)
    }

    async fn edit_message(&self, room: RoomId, message: MessageId, text: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .insert(message, (room, text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, _room: RoomId, message: MessageId) -> Result<()> {
        self.deleted.lock().unwrap().push(message);
        Ok(())
    }

    async fn display_name(&self, user: UserId) -> Result<String> {
        Ok(format!("user{}", user))
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolver writing a fresh temp file per resolution
///
/// Track ids starting with `missing` fail.
pub struct MockResolver {
    dir: TempDir,
    counter: AtomicUsize,
}

impl MockResolver {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn resolved(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn dir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

#[async_trait]
impl MediaResolver for MockResolver {
    async fn resolve(&self, track_id: &str, _kind: MediaKind) -> Result<PathBuf> {
        if track_id.starts_with("missing") {
            return Err(Error::DownloadFailed(format!("{} not found", track_id)));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.path().join(format!("{}-{}.mp3", n, track_id));
        tokio::fs::write(&path, b"audio").await?;
        Ok(path)
    }
}

// ============================================================================
// Store
// ============================================================================

/// SQLite store whose ActiveVC marker writes take `mark_delay`
pub struct SlowMarkerStore {
    inner: Arc<SqliteStore>,
    mark_delay: Duration,
}

#[async_trait]
impl StateStore for SlowMarkerStore {
    async fn increment_play_count(&self) -> Result<i64> {
        self.inner.increment_play_count().await
    }

    async fn increment_user_plays(&self, user: UserId) -> Result<i64> {
        self.inner.increment_user_plays(user).await
    }

    async fn total_plays(&self) -> Result<i64> {
        self.inner.total_plays().await
    }

    async fn user_plays(&self, user: UserId) -> Result<i64> {
        self.inner.user_plays(user).await
    }

    async fn mark_active(&self, room: RoomId, kind: MediaKind) -> Result<()> {
        tokio::time::sleep(self.mark_delay).await;
        self.inner.mark_active(room, kind).await
    }

    async fn clear_active(&self, room: RoomId) -> Result<()> {
        self.inner.clear_active(room).await
    }

    async fn active_markers(&self) -> Result<Vec<ActiveMarker>> {
        self.inner.active_markers().await
    }

    async fn autoend(&self, room: RoomId) -> Result<bool> {
        self.inner.autoend(room).await
    }

    async fn set_autoend(&self, room: RoomId, enabled: bool) -> Result<()> {
        self.inner.set_autoend(room, enabled).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub player: Arc<Player>,
    pub engine: Arc<MockEngine>,
    pub platform: Arc<MockPlatform>,
    pub resolver: Arc<MockResolver>,
    pub store: Arc<SqliteStore>,
    pub state: Arc<SharedState>,
    cancel: CancellationToken,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(RuntimeSettings::default()).await
    }

    pub async fn with_settings(settings: RuntimeSettings) -> Self {
        let store = Arc::new(SqliteStore::new(init_memory_database().await.unwrap()));
        Self::with_store(settings, store).await
    }

    /// Build on an existing store, e.g. one seeded with markers
    pub async fn with_store(settings: RuntimeSettings, store: Arc<SqliteStore>) -> Self {
        Self::build(settings, store.clone(), store).await
    }

    /// Player whose ActiveVC marker writes are slow
    pub async fn with_slow_markers(mark_delay: Duration) -> Self {
        let store = Arc::new(SqliteStore::new(init_memory_database().await.unwrap()));
        let slow = Arc::new(SlowMarkerStore {
            inner: store.clone(),
            mark_delay,
        });
        Self::build(RuntimeSettings::default(), store, slow).await
    }

    async fn build(
        settings: RuntimeSettings,
        store: Arc<SqliteStore>,
        backing: Arc<dyn StateStore>,
    ) -> Self {
        let (tx, rx) = event_channel();
        let engine = Arc::new(MockEngine::new(tx));
        let platform = Arc::new(MockPlatform::new());
        let resolver = Arc::new(MockResolver::new());
        let state = Arc::new(SharedState::new());

        let player = Arc::new(Player::new(PlayerDeps {
            engine: engine.clone(),
            platform: platform.clone(),
            resolver: resolver.clone(),
            thumbnailer: Arc::new(NoThumbnails),
            store: backing,
            state: state.clone(),
            settings,
        }));

        let cancel = CancellationToken::new();
        let handler: Arc<dyn EngineEventHandler> = player.clone();
        EventBridge::spawn(rx, handler, cancel.clone());

        Self {
            player,
            engine,
            platform,
            resolver,
            store,
            state,
            cancel,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoxqEvent> {
        self.state.subscribe_events()
    }

    pub async fn titles(&self, room: RoomId) -> Vec<String> {
        self.player
            .queue_snapshot(room)
            .await
            .into_iter()
            .map(|item| item.title)
            .collect()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Non-forced request for a remote track titled like its id
pub fn request(title: &str) -> PlayRequest {
    PlayRequest {
        requested_by: Requester {
            user_id: UserId(7),
            display_name: "tester".to_string(),
        },
        title: title.to_string(),
        duration_label: "3:00".to_string(),
        source: TrackSource::Remote(title.to_string()),
        kind: MediaKind::Voice,
        force: false,
    }
}

pub fn forced(title: &str) -> PlayRequest {
    PlayRequest {
        force: true,
        ..request(title)
    }
}

/// Wait for the first event matching `pred`, failing after two seconds
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<VoxqEvent>,
    pred: impl Fn(&VoxqEvent) -> bool,
) -> VoxqEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
