//! Media resolution (search/download)
//!
//! Turns an external track identifier into a local file. Any failure is
//! reported as `DownloadFailed`; retry policy belongs to the resolver, the
//! player never retries.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use voxq_common::MediaKind;

use crate::error::{Error, Result};

#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Fetch `track_id` and return the path of the local temp file
    async fn resolve(&self, track_id: &str, kind: MediaKind) -> Result<PathBuf>;
}

/// Resolver that "downloads" by copying from a local media folder
///
/// Track identifiers are paths relative to `media_dir`. Each resolution
/// produces a fresh copy in `download_dir`, which the player may delete once
/// the track is done with.
#[derive(Debug, Clone)]
pub struct LocalResolver {
    media_dir: PathBuf,
    download_dir: PathBuf,
}

impl LocalResolver {
    pub fn new(media_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    fn source_path(&self, track_id: &str) -> Result<PathBuf> {
        let relative = Path::new(track_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if track_id.is_empty() || escapes {
            return Err(Error::DownloadFailed(format!(
                "invalid track identifier '{}'",
                track_id
            )));
        }
        Ok(self.media_dir.join(relative))
    }
}

#[async_trait]
impl MediaResolver for LocalResolver {
    async fn resolve(&self, track_id: &str, kind: MediaKind) -> Result<PathBuf> {
        let source = self.source_path(track_id)?;
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("track");

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| Error::DownloadFailed(format!("download folder unavailable: {}", e)))?;

        let target = self
            .download_dir
            .join(format!("{}-{}", Uuid::new_v4().simple(), file_name));
        tokio::fs::copy(&source, &target).await.map_err(|e| {
            Error::DownloadFailed(format!("{} not available: {}", track_id, e))
        })?;

        debug!(track = track_id, kind = %kind, path = %target.display(), "Track resolved");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_copies_into_download_dir() {
        let media = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        std::fs::write(media.path().join("song.mp3"), b"ID3").unwrap();

        let resolver = LocalResolver::new(media.path(), downloads.path());
        let path = resolver.resolve("song.mp3", MediaKind::Voice).await.unwrap();

        assert!(path.starts_with(downloads.path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3");

        // Each resolution is its own temp file
        let again = resolver.resolve("song.mp3", MediaKind::Voice).await.unwrap();
        assert_ne!(path, again);
    }

    #[tokio::test]
    async fn test_missing_track_is_download_failure() {
        let media = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let resolver = LocalResolver::new(media.path(), downloads.path());

        let err = resolver.resolve("absent.mp3", MediaKind::Voice).await.unwrap_err();
        assert!(matches!(err, Error::DownloadFailed(_)));
    }

    #[tokio::test]
    async fn test_identifiers_cannot_escape_media_dir() {
        let media = tempfile::tempdir().unwrap();
        let resolver = LocalResolver::new(media.path(), media.path().join("dl"));

        for bad in ["../etc/passwd", "/etc/passwd", ""] {
            let err = resolver.resolve(bad, MediaKind::Voice).await.unwrap_err();
            assert!(matches!(err, Error::DownloadFailed(_)), "{}", bad);
        }
    }
}
