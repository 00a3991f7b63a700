//! Artifact discovery and publication.
//!
//! The renderer lays its output out in a nested directory tree whose shape
//! depends on the script name and quality settings. Rather than predicting
//! it, the whole scratch output directory is searched.

use std::path::{Path, PathBuf};

use tokio::fs;
use walkdir::WalkDir;

use crate::error::{RenderError, RenderResult};

/// Renderer intermediate chunks, never the final movie.
const PARTIAL_DIR: &str = "partial_movie_files";

/// Find the first file with `extension` under `dir`.
///
/// Traversal is depth-first with entries sorted by file name, so the choice is
/// deterministic when several files match. Intermediate chunk directories are
/// skipped.
pub fn find_artifact(dir: &Path, extension: &str) -> RenderResult<Option<PathBuf>> {
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != PARTIAL_DIR);

    for entry in walker {
        let entry = entry.map_err(|e| {
            RenderError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("filesystem loop while searching for artifact")
            }))
        })?;

        let matches = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches {
            return Ok(Some(entry.into_path()));
        }
    }

    Ok(None)
}

/// Copy `src` to `dst` (leaving `src` in place) and return the copied size.
///
/// The copy goes to a temporary sibling first and is renamed into place, so
/// `dst` never holds a partially written file. A zero-size result is removed
/// and reported as [`RenderError::EmptyArtifact`].
pub async fn publish_copy(src: &Path, dst: &Path) -> RenderResult<u64> {
    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp_dst = dst.with_extension("tmp");
    fs::copy(src, &tmp_dst).await.map_err(|e| {
        tracing::error!(
            "Failed to copy artifact: {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        RenderError::from(e)
    })?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(e.into());
    }

    let size = fs::metadata(dst).await?.len();
    if size == 0 {
        if let Err(e) = fs::remove_file(dst).await {
            tracing::warn!("Failed to remove empty artifact {}: {}", dst.display(), e);
        }
        return Err(RenderError::EmptyArtifact(dst.to_path_buf()));
    }

    tracing::debug!(
        "Published artifact {} -> {} ({} bytes)",
        src.display(),
        dst.display(),
        size
    );
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_find_nested_artifact() {
        let dir = TempDir::new().unwrap();
        let movie = dir.path().join("videos/scene/480p30/GeneratedScene.mp4");
        touch(&movie, b"movie");
        touch(&dir.path().join("videos/scene/480p30/partial_movie_files/GeneratedScene/00000.mp4"), b"chunk");
        touch(&dir.path().join("texts/abc.svg"), b"svg");

        assert_eq!(find_artifact(dir.path(), "mp4").unwrap(), Some(movie));
    }

    #[test]
    fn test_find_is_deterministic() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("b/out.mp4"), b"b");
        touch(&dir.path().join("a/out.MP4"), b"a");
        touch(&dir.path().join("c.mp4"), b"c");

        let first = find_artifact(dir.path(), "mp4").unwrap().unwrap();
        assert_eq!(first, dir.path().join("a/out.MP4"));
        for _ in 0..3 {
            assert_eq!(find_artifact(dir.path(), "mp4").unwrap().unwrap(), first);
        }
    }

    #[test]
    fn test_find_nothing() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("images/frame.png"), b"png");
        assert_eq!(find_artifact(dir.path(), "mp4").unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_copies_and_keeps_source() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("scratch/GeneratedScene.mp4");
        let dst = dir.path().join("videos/job-1.mp4");
        touch(&src, b"rendered bytes");

        let size = publish_copy(&src, &dst).await.unwrap();
        assert_eq!(size, 14);
        assert!(src.exists(), "source must be copied, not moved");
        assert_eq!(std::fs::read(&dst).unwrap(), b"rendered bytes");
        assert!(!dst.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_publish_overwrites_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("new.mp4");
        let dst = dir.path().join("job.mp4");
        touch(&src, b"new");
        touch(&dst, b"old content");

        publish_copy(&src, &dst).await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_publish_rejects_empty() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("empty.mp4");
        let dst = dir.path().join("videos/job-1.mp4");
        touch(&src, b"");

        let err = publish_copy(&src, &dst).await.unwrap_err();
        assert!(matches!(err, RenderError::EmptyArtifact(_)));
        assert!(!dst.exists());
    }
}
