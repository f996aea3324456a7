//! Database access for voxq-player

pub mod init;
pub mod store;

pub use store::{ActiveMarker, SqliteStore, StateStore};
