//! External collaborators the player depends on
//!
//! Each collaborator is a trait object so deployments can plug in a real
//! chat platform, downloader or thumbnail generator. The development
//! implementations here are what the binary wires up by default.

pub mod platform;
pub mod resolver;
pub mod thumbnail;

pub use platform::{ChatPlatform, GroupCall, LogPlatform, MessageId};
pub use resolver::{LocalResolver, MediaResolver};
pub use thumbnail::{NoThumbnails, Thumbnailer};
