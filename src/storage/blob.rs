use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub content_type: String,
    pub cache_control: String,
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub metadata: BlobMetadata,
}

/// Object storage for generated images. Writes overwrite, so retries are idempotent.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], metadata: &BlobMetadata) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Blob>>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !key.starts_with('.');
    if !valid {
        return Err(AppError::BadRequest(format!("Invalid blob key: {}", key)));
    }
    Ok(())
}

// ==================== FILESYSTEM ====================
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn open(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", key))
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| AppError::Storage(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| AppError::Storage(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], metadata: &BlobMetadata) -> Result<()> {
        validate_key(key)?;
        let meta = serde_json::to_vec(metadata)
            .map_err(|e| AppError::Internal(format!("blob metadata encode: {}", e)))?;
        Self::write_atomic(&self.meta_path(key), &meta).await?;
        Self::write_atomic(&self.data_path(key), bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Blob>> {
        validate_key(key)?;
        let bytes = match tokio::fs::read(self.data_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Storage(format!("read {}: {}", key, e))),
        };
        let metadata = match tokio::fs::read(self.meta_path(key)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| AppError::Storage(format!("metadata {}: {}", key, e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BlobMetadata {
                content_type: "application/octet-stream".to_string(),
                cache_control: "no-cache".to_string(),
            },
            Err(e) => return Err(AppError::Storage(format!("metadata {}: {}", key, e))),
        };
        Ok(Some(Blob { bytes, metadata }))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        tokio::fs::try_exists(self.data_path(key))
            .await
            .map_err(|e| AppError::Storage(format!("stat {}: {}", key, e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        for path in [self.data_path(key), self.meta_path(key)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(AppError::Storage(format!("delete {}: {}", key, e))),
            }
        }
        Ok(())
    }
}

// ==================== IN-MEMORY ====================
#[cfg(test)]
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: tokio::sync::Mutex<std::collections::HashMap<String, Blob>>,
}

#[cfg(test)]
#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], metadata: &BlobMetadata) -> Result<()> {
        validate_key(key)?;
        self.blobs.lock().await.insert(
            key.to_string(),
            Blob {
                bytes: bytes.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Blob>> {
        Ok(self.blobs.lock().await.get(key).cloned())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.lock().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_meta() -> BlobMetadata {
        BlobMetadata {
            content_type: "image/png".to_string(),
            cache_control: "public, max-age=31536000, immutable".to_string(),
        }
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("sprout-blobs-{}", uuid::Uuid::new_v4().simple()))
    }

    #[test]
    fn rejects_path_traversal_keys() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a/b.png").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("cr_0123abcd.png").is_ok());
    }

    #[tokio::test]
    async fn fs_store_round_trips_bytes_and_metadata() {
        let root = temp_root();
        let store = FsBlobStore::open(&root).await.expect("open");

        store.put("cr_1.png", b"\x89PNG", &png_meta()).await.expect("put");
        assert!(store.exists("cr_1.png").await.expect("exists"));

        let blob = store.get("cr_1.png").await.expect("get").expect("present");
        assert_eq!(blob.bytes, b"\x89PNG");
        assert_eq!(blob.metadata, png_meta());

        // overwrite is allowed
        store.put("cr_1.png", b"\x89PNG2", &png_meta()).await.expect("overwrite");
        store.delete("cr_1.png").await.expect("delete");
        assert!(store.get("cr_1.png").await.expect("get").is_none());
        store.delete("cr_1.png").await.expect("delete twice");

        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
