use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::backend::BlobStore;
use super::error::PersistenceError;
use super::types::BlobPath;

/// Blob store rooted at a local directory.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// reader never observes a half-written artifact.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a blob path under the root, refusing anything that would leave it.
    pub fn resolve(&self, path: &BlobPath, operation: &'static str) -> Result<PathBuf, PersistenceError> {
        let relative = Path::new(path.as_str());
        let escapes = relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(PersistenceError::other(
                operation,
                format!("blob path {path} is not a plain relative path"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &BlobPath, bytes: Bytes, _mime_type: &str) -> Result<(), PersistenceError> {
        let op = "blob_put";
        let target = self.resolve(path, op)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(op, &e))?;
        }
        let mut staging = target.clone().into_os_string();
        staging.push(".part");
        let staging = PathBuf::from(staging);
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| PersistenceError::io(op, &e))?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| PersistenceError::io(op, &e))?;
        debug!(path = %path, bytes = bytes.len(), "blob_written");
        Ok(())
    }

    async fn get(&self, path: &BlobPath) -> Result<Option<Bytes>, PersistenceError> {
        let op = "blob_get";
        let target = self.resolve(path, op)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(op, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_nested_paths_and_overwrites() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let path = BlobPath::from_segments(["subjects", "p-1", "monthly-reports", "r.pdf"]);
        store.put(&path, Bytes::from_static(b"one"), "application/pdf").await.unwrap();
        store.put(&path, Bytes::from_static(b"two"), "application/pdf").await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), Some(Bytes::from_static(b"two")));
        assert!(dir.path().join("subjects/p-1/monthly-reports/r.pdf").exists());
        assert!(!dir.path().join("subjects/p-1/monthly-reports/r.pdf.part").exists());
    }

    #[tokio::test]
    async fn missing_blob_is_none() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let path = BlobPath::from_segments(["global", "x.pdf"]);
        assert_eq!(store.get(&path).await.unwrap(), None);
    }

    #[test]
    fn resolve_rejects_empty_path() {
        let store = FsBlobStore::new("/tmp/blobs");
        let empty = BlobPath::from_segments(Vec::<&str>::new());
        assert!(store.resolve(&empty, "blob_put").is_err());
    }
}
