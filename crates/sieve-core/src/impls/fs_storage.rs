//! FilesystemBackend - artifacts under a local root directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::domain::{BackendKind, StorageError};
use crate::ports::storage::validate_key;
use crate::ports::{SignedUrl, StorageBackend};

/// Stores each object as a file at `root/<path>`.
///
/// - `save` writes to a sibling temp file and renames it into place, so a
///   concurrent `read` sees either the old or the new content, never a partial file
/// - delegated URLs are not supported
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create the backend, creating `root` if it is absent.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::from_io(e, &root.display().to_string()))?;
        debug!(root = %root.display(), "filesystem backend ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let key = validate_key(path)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn save(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let target = self.full_path(path)?;
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::from_io(e, path))?;
        }

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = target.with_file_name(format!(".{file_name}.{}.part", ulid::Ulid::new()));
        if let Err(e) = tokio::fs::write(&tmp, &data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::from_io(e, path));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::from_io(e, path));
        }
        debug!(path, bytes = data.len(), "saved to filesystem");
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let target = self.full_path(path)?;
        let data = tokio::fs::read(&target)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        Ok(Bytes::from(data))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let target = self.full_path(path)?;
        match tokio::fs::metadata(&target).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(e, path)),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let target = self.full_path(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, path)),
        }
    }

    async fn signed_url(&self, _path: &str, _expiration: Duration) -> Result<SignedUrl, StorageError> {
        Ok(SignedUrl::Unsupported)
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        self.full_path(path).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> (tempfile::TempDir, FilesystemBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().join("store")).await.unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn new_creates_root() {
        let (dir, backend) = backend().await;
        assert!(dir.path().join("store").is_dir());
        assert_eq!(backend.root(), dir.path().join("store"));
    }

    #[tokio::test]
    async fn save_then_read_returns_same_bytes() {
        let (_dir, backend) = backend().await;
        let data = Bytes::from((0..=255u8).cycle().take(70_000).collect::<Vec<_>>());
        backend.save("uploads/task-1_clip.mp4", data.clone()).await.unwrap();
        assert_eq!(backend.read("uploads/task-1_clip.mp4").await.unwrap(), data);
    }

    #[tokio::test]
    async fn save_overwrites() {
        let (_dir, backend) = backend().await;
        backend.save("a/b", Bytes::from_static(b"one")).await.unwrap();
        backend.save("a/b", Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(backend.read("a/b").await.unwrap(), Bytes::from_static(b"two"));

        // no temp files left next to the object
        let entries: Vec<_> = std::fs::read_dir(backend.root().join("a")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let (_dir, backend) = backend().await;
        assert!(matches!(
            backend.read("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn exists_and_delete() {
        let (_dir, backend) = backend().await;
        assert!(!backend.exists("x/y").await.unwrap());
        backend.save("x/y", Bytes::from_static(b"1")).await.unwrap();
        assert!(backend.exists("x/y").await.unwrap());

        backend.delete("x/y").await.unwrap();
        assert!(!backend.exists("x/y").await.unwrap());
        // absent is not an error
        backend.delete("x/y").await.unwrap();
    }

    #[tokio::test]
    async fn signed_url_is_unsupported() {
        let (_dir, backend) = backend().await;
        backend.save("o", Bytes::from_static(b"1")).await.unwrap();
        let url = backend
            .signed_url("o", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(url, SignedUrl::Unsupported);
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let (_dir, backend) = backend().await;
        assert!(matches!(
            backend.save("../escape", Bytes::from_static(b"1")).await,
            Err(StorageError::Backend { .. })
        ));
        assert!(backend.local_path("../escape").is_none());
    }

    #[tokio::test]
    async fn leading_slash_is_relative_to_root() {
        let (_dir, backend) = backend().await;
        backend.save("/uploads/a", Bytes::from_static(b"1")).await.unwrap();
        assert!(backend.root().join("uploads/a").is_file());
        assert_eq!(
            backend.local_path("/uploads/a").unwrap(),
            backend.root().join("uploads/a")
        );
    }
}
