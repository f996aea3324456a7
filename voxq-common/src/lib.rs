//! # VoxQ Common Library
//!
//! Shared code for the VoxQ voice-chat player:
//! - Room and user identifiers
//! - Event types (VoxqEvent enum) and the broadcast EventBus
//! - Bootstrap configuration loading
//! - Duration label parsing/formatting

pub mod config;
pub mod error;
pub mod events;
pub mod room;
pub mod time;

pub use error::{Error, Result};
pub use room::{MediaKind, RoomId, UserId};
