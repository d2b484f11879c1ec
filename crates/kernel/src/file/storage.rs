//! Media file system.
//!
//! Upload-backed properties store a public URL; the files behind it live in
//! a media file system addressed by paths relative to its root. Copying
//! content duplicates those files so the copy never shares them.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

/// Media file system provider.
#[async_trait]
pub trait MediaFileSystem: Send + Sync {
    /// Check if a file exists.
    async fn file_exists(&self, path: &str) -> Result<bool>;

    /// Copy a file, creating the target folder if needed.
    async fn copy_file(&self, from: &str, to: &str) -> Result<()>;

    /// Relative path of a public URL (or of a path that is already relative).
    fn relative_path(&self, url: &str) -> String;

    /// Relative path of a file inside a folder.
    fn relative_path_for(&self, folder: &str, file_name: &str) -> String {
        format!("{}/{}", folder.trim_matches('/'), file_name)
    }

    /// Public URL of a relative path.
    fn url(&self, path: &str) -> String;

    /// Thumbnails generated for a file: siblings named `<stem>_<suffix>`
    /// where the suffix mentions `thumb`.
    async fn thumbnails(&self, path: &str) -> Result<Vec<String>>;
}

/// Media stored on the local disk.
pub struct LocalMediaFileSystem {
    /// Root directory of the media tree.
    base_path: PathBuf,
    /// Public URL prefix of the media tree.
    base_url: String,
}

impl LocalMediaFileSystem {
    pub fn new(base_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            base_url: base_url.into(),
        }
    }

    /// Resolve a relative path below the root.
    ///
    /// Rejects paths containing `..` components to prevent directory traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = path.trim_start_matches('/');
        for component in Path::new(relative).components() {
            if matches!(component, Component::ParentDir) {
                anyhow::bail!("directory traversal not allowed in media path");
            }
        }
        Ok(self.base_path.join(relative))
    }
}

/// Whether `candidate` is a thumbnail name for a file with stem `stem`.
fn is_thumbnail_of(candidate: &str, stem: &str) -> bool {
    let candidate_stem = Path::new(candidate)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(candidate);
    candidate_stem
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|suffix| suffix.contains("thumb"))
}

#[async_trait]
impl MediaFileSystem for LocalMediaFileSystem {
    async fn file_exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(fs::try_exists(&full).await.unwrap_or(false))
    }

    async fn copy_file(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create directories")?;
        }

        let bytes = fs::copy(&source, &target)
            .await
            .with_context(|| format!("failed to copy {from} to {to}"))?;

        debug!(from = %from, to = %to, size = bytes, "media file copied");
        Ok(())
    }

    fn relative_path(&self, url: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        url.strip_prefix(base)
            .unwrap_or(url)
            .trim_start_matches('/')
            .to_string()
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn thumbnails(&self, path: &str) -> Result<Vec<String>> {
        let full = self.resolve(path)?;
        let Some(stem) = full.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            return Ok(Vec::new());
        };
        let Some(dir) = full.parent() else {
            return Ok(Vec::new());
        };
        if !fs::try_exists(dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let folder = Path::new(path.trim_start_matches('/'))
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut thumbnails = Vec::new();
        let mut entries = fs::read_dir(dir)
            .await
            .context("failed to read media folder")?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to read media folder entry")?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_thumbnail_of(&name, &stem) {
                thumbnails.push(if folder.is_empty() {
                    name
                } else {
                    format!("{folder}/{name}")
                });
            }
        }
        thumbnails.sort();
        Ok(thumbnails)
    }
}

impl std::fmt::Debug for LocalMediaFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMediaFileSystem")
            .field("base_path", &self.base_path)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("folio-media-{name}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn urls_and_relative_paths() {
        let media = LocalMediaFileSystem::new("/tmp/media", "/media/");
        assert_eq!(media.relative_path("/media/1050/photo.jpg"), "1050/photo.jpg");
        assert_eq!(media.relative_path("1050/photo.jpg"), "1050/photo.jpg");
        assert_eq!(media.url("1050/photo.jpg"), "/media/1050/photo.jpg");
        assert_eq!(media.relative_path_for("1051", "photo.jpg"), "1051/photo.jpg");
    }

    #[test]
    fn traversal_is_rejected() {
        let media = LocalMediaFileSystem::new("/tmp/media", "/media");
        assert!(media.resolve("../etc/passwd").is_err());
        assert!(media.resolve("1050/../../x").is_err());
        assert!(media.resolve("1050/photo.jpg").is_ok());
    }

    #[test]
    fn thumbnail_names() {
        assert!(is_thumbnail_of("photo_thumb.jpg", "photo"));
        assert!(is_thumbnail_of("photo_big-thumb.jpg", "photo"));
        assert!(!is_thumbnail_of("photo.jpg", "photo"));
        assert!(!is_thumbnail_of("photo_large.jpg", "photo"));
        assert!(!is_thumbnail_of("other_thumb.jpg", "photo"));
    }

    #[tokio::test]
    async fn copy_file_and_list_thumbnails() {
        let root = temp_root("copy");
        std::fs::create_dir_all(root.join("1050")).unwrap();
        std::fs::write(root.join("1050/photo.jpg"), b"image").unwrap();
        std::fs::write(root.join("1050/photo_thumb.jpg"), b"thumb").unwrap();
        std::fs::write(root.join("1050/notes.txt"), b"other").unwrap();

        let media = LocalMediaFileSystem::new(&root, "/media");
        assert!(media.file_exists("1050/photo.jpg").await.unwrap());
        assert_eq!(
            media.thumbnails("1050/photo.jpg").await.unwrap(),
            vec!["1050/photo_thumb.jpg".to_string()]
        );

        media.copy_file("1050/photo.jpg", "2000/photo.jpg").await.unwrap();
        assert_eq!(std::fs::read(root.join("2000/photo.jpg")).unwrap(), b"image");

        std::fs::remove_dir_all(&root).unwrap();
    }
}
