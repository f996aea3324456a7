//! Chat platform client
//!
//! Covers the slice of the platform the player needs: group-call lookup and
//! signaling, room messages, and display-name lookup.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::info;
use voxq_common::{RoomId, UserId};

use crate::error::{Error, Result};

/// Platform handle of a started group call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCall {
    pub id: String,
}

/// Platform message handle, used to edit or delete status messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MessageId(pub i64);

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Resolve the room's started group call; `NoGroupCall` if there is none
    async fn group_call(&self, room: RoomId) -> Result<GroupCall>;

    /// Send the engine's offer and return the platform's answer blob
    async fn join_group_call(
        &self,
        room: RoomId,
        call: &GroupCall,
        offer: &str,
        video: bool,
    ) -> Result<String>;

    async fn leave_group_call(&self, room: RoomId, call: &GroupCall) -> Result<()>;

    async fn send_message(&self, room: RoomId, text: &str) -> Result<MessageId>;
    async fn edit_message(&self, room: RoomId, message: MessageId, text: &str) -> Result<()>;
    async fn delete_message(&self, room: RoomId, message: MessageId) -> Result<()>;

    async fn display_name(&self, user: UserId) -> Result<String>;
}

/// Platform stand-in that writes messages to the log
///
/// Every room is treated as having a started group call unless it was
/// closed with [`LogPlatform::close_group_call`].
#[derive(Debug, Default)]
pub struct LogPlatform {
    closed_calls: DashSet<RoomId>,
    joined: DashMap<RoomId, GroupCall>,
    next_message: AtomicI64,
}

impl LogPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close_group_call(&self, room: RoomId) {
        self.closed_calls.insert(room);
    }

    pub fn open_group_call(&self, room: RoomId) {
        self.closed_calls.remove(&room);
    }

    /// Rooms whose group call the player is currently in
    pub fn joined_rooms(&self) -> Vec<RoomId> {
        self.joined.iter().map(|entry| *entry.key()).collect()
    }
}

#[async_trait]
impl ChatPlatform for LogPlatform {
    async fn group_call(&self, room: RoomId) -> Result<GroupCall> {
        if self.closed_calls.contains(&room) {
            return Err(Error::NoGroupCall(room));
        }
        Ok(GroupCall {
            id: format!("call-{}", room),
        })
    }

    async fn join_group_call(
        &self,
        room: RoomId,
        call: &GroupCall,
        offer: &str,
        video: bool,
    ) -> Result<String> {
        info!(room = %room, call = %call.id, video, "Joining group call");
        self.joined.insert(room, call.clone());
        // The loopback engine accepts any non-empty answer
        Ok(format!("answer:{}", offer.len()))
    }

    async fn leave_group_call(&self, room: RoomId, call: &GroupCall) -> Result<()> {
        info!(room = %room, call = %call.id, "Leaving group call");
        self.joined.remove(&room);
        Ok(())
    }

    async fn send_message(&self, room: RoomId, text: &str) -> Result<MessageId> {
        let id = MessageId(self.next_message.fetch_add(1, Ordering::Relaxed) + 1);
        info!(room = %room, message = id.0, "[chat] {}", text);
        Ok(id)
    }

    async fn edit_message(&self, room: RoomId, message: MessageId, text: &str) -> Result<()> {
        info!(room = %room, message = message.0, "[chat edit] {}", text);
        Ok(())
    }

    async fn delete_message(&self, room: RoomId, message: MessageId) -> Result<()> {
        info!(room = %room, message = message.0, "[chat delete]");
        Ok(())
    }

    async fn display_name(&self, user: UserId) -> Result<String> {
        Ok(format!("user{}", user))
    }
}
