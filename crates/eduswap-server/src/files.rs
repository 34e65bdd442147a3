//! Attachment storage for chat file uploads.
//!
//! Bytes are persisted under a generated name (uuid plus the original
//! extension); the chat message carries a `/files/<stored-name>` link while
//! the original filename travels separately for display.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::ServerError;

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal attacks.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(&canonical_base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ServerError::BadRequest(
                    "Path traversal detected".to_string(),
                ));
            }
            _ => {} // RootDir, CurDir, Prefix — skip
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest(
            "Path traversal detected".to_string(),
        ));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FileStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::FileStorage(format!(
                "Failed to create file directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        tracing::info!(path = %base_path.display(), "File store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Persist an upload and return its generated stored name.
    pub async fn store_file(
        &self,
        original_name: &str,
        data: &[u8],
    ) -> Result<String, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::FileTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let stored_name = match sanitized_extension(original_name) {
            Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        };
        let path = self.safe_file_path(&stored_name)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::FileStorage(format!("Failed to write file {stored_name}: {e}"))
        })?;

        debug!(name = %stored_name, size = data.len(), "Stored attachment");
        Ok(stored_name)
    }

    pub async fn get_file(&self, stored_name: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.safe_file_path(stored_name)?;

        if !path.exists() {
            return Err(ServerError::NotFound(format!("file {stored_name}")));
        }

        let data = fs::read(&path).await.map_err(|e| {
            ServerError::FileStorage(format!("Failed to read file {stored_name}: {e}"))
        })?;

        debug!(name = %stored_name, size = data.len(), "Retrieved attachment");
        Ok(data)
    }

    /// Safe path under the store root; rejects separators and traversal.
    fn safe_file_path(&self, stored_name: &str) -> Result<PathBuf, ServerError> {
        if stored_name.contains('/') || stored_name.contains('\\') || stored_name.contains("..") {
            return Err(ServerError::BadRequest(
                "Path traversal detected".to_string(),
            ));
        }
        let raw = self.base_path.join(stored_name);
        ensure_within(&self.base_path, &raw)
    }
}

/// Extension of the uploaded filename, kept only when it is plain
/// alphanumeric.
fn sanitized_extension(original_name: &str) -> Option<String> {
    let ext = Path::new(original_name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn store_and_get_round_trip() {
        let (store, _dir) = test_store().await;

        let name = store.store_file("homework.pdf", b"pdf-bytes").await.unwrap();
        assert!(name.ends_with(".pdf"));

        let data = store.get_file(&name).await.unwrap();
        assert_eq!(data, b"pdf-bytes");
    }

    #[tokio::test]
    async fn weird_extension_is_dropped() {
        let (store, _dir) = test_store().await;

        let name = store.store_file("notes.t/x\\t", b"data").await.unwrap();
        assert!(!name.contains('/'));
        assert!(!name.contains('\\'));
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf(), 4).await.unwrap();

        assert!(matches!(
            store.store_file("big.bin", b"too large").await,
            Err(ServerError::FileTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let (store, _dir) = test_store().await;

        assert!(store.get_file("../etc/passwd").await.is_err());
        assert!(store.get_file("a/b").await.is_err());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (store, _dir) = test_store().await;

        assert!(matches!(
            store.get_file("does-not-exist.png").await,
            Err(ServerError::NotFound(_))
        ));
    }
}
