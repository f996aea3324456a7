//! Thumbnail generation for "now playing" notices
//!
//! Purely cosmetic: callers ignore failures.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;
use crate::queue::QueueItem;

#[async_trait]
pub trait Thumbnailer: Send + Sync {
    /// Render a thumbnail for `item`, returning the temp file if one was made
    async fn generate(&self, item: &QueueItem) -> Result<Option<PathBuf>>;
}

/// Thumbnailer that never produces an image
#[derive(Debug, Default, Clone, Copy)]
pub struct NoThumbnails;

#[async_trait]
impl Thumbnailer for NoThumbnails {
    async fn generate(&self, _item: &QueueItem) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}
