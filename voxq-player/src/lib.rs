//! # VoxQ Player Library (voxq-player)
//!
//! Streams queued tracks into the group voice calls of chat rooms.
//!
//! **Purpose:** Keep one call session per room, run each room's track queue
//! through it (advance, loop, replay, seek), and expose an HTTP/SSE control
//! interface to command front-ends.
//!
//! **Architecture:** A room state arena guarded per room, a session registry
//! that owns the join/leave lifecycle, and the player orchestrator that
//! sequences both against pluggable engine, chat platform and resolver seams.

pub mod api;
pub mod collab;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod room;
pub mod session;
pub mod state;
pub mod sweeper;

pub use error::{Error, Result};
pub use orchestrator::{Player, PlayerDeps};
pub use state::SharedState;
