//! Local filesystem blob backend.
//!
//! Blobs live flat under a root directory, named by file id. The
//! "presigned" URL is a relative path the gateway serves; an S3 backend
//! would mint a real signed URL behind the same trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_domain::error::{Error, Result};

use crate::traits::{BlobStorage, UrlMethod};

/// Metadata returned by a blob save and required to fetch it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStoreMetadata {
    pub file_id: String,
    /// Backend locator: a filesystem path here, an object key on S3.
    pub locator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

pub struct LocalBlobStorage {
    root: PathBuf,
}

impl LocalBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File ids become file names; reject anything that could escape the
    /// root directory.
    fn path_for(&self, file_id: &str) -> Result<PathBuf> {
        if file_id.is_empty()
            || file_id.contains('/')
            || file_id.contains('\\')
            || file_id.contains("..")
        {
            return Err(Error::Validation(format!("invalid file id: {file_id:?}")));
        }
        Ok(self.root.join(file_id))
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn save(
        &self,
        bytes: &[u8],
        file_id: &str,
        name: Option<&str>,
    ) -> Result<FileStoreMetadata> {
        let path = self.path_for(file_id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(FileStoreMetadata {
            file_id: file_id.to_string(),
            locator: path.to_string_lossy().into_owned(),
            name: name.map(String::from),
            size: bytes.len() as u64,
            created_at: Utc::now(),
        })
    }

    async fn get(&self, meta: &FileStoreMetadata) -> Result<Vec<u8>> {
        let path = Path::new(&meta.locator);
        Ok(tokio::fs::read(path).await?)
    }

    async fn delete(&self, meta: &FileStoreMetadata) -> Result<()> {
        let path = Path::new(&meta.locator);
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            // Idempotent: deleting a missing blob is not an error.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn presigned_url(&self, file_id: &str, _method: UrlMethod) -> Result<String> {
        self.path_for(file_id)?;
        Ok(format!("/files/{file_id}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blob-backed data source store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::HashMap;

use parking_lot::RwLock;
use relay_domain::message::AttachmentKind;
use uuid::Uuid;

use crate::traits::{DataSource, DataSourceStore};

/// Data-source store that keeps metadata in memory and bytes in a blob
/// backend. The gateway's file-upload endpoint writes through this.
pub struct FsDataSourceStore {
    blobs: std::sync::Arc<dyn BlobStorage>,
    records: RwLock<HashMap<String, (DataSource, FileStoreMetadata)>>,
}

impl FsDataSourceStore {
    pub fn new(blobs: std::sync::Arc<dyn BlobStorage>) -> Self {
        Self {
            blobs,
            records: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DataSourceStore for FsDataSourceStore {
    async fn save_file(
        &self,
        bytes: Vec<u8>,
        file_name: Option<String>,
        content_type: Option<String>,
        kind: AttachmentKind,
    ) -> relay_domain::error::Result<DataSource> {
        let id = Uuid::new_v4().to_string();
        let meta = self.blobs.save(&bytes, &id, file_name.as_deref()).await?;
        let url = self.blobs.presigned_url(&id, UrlMethod::Get).await.ok();
        let source = DataSource {
            id: id.clone(),
            file_name,
            content_type,
            size: bytes.len() as u64,
            kind,
            url,
            created_at: Utc::now(),
        };
        self.records.write().insert(id, (source.clone(), meta));
        Ok(source)
    }

    async fn get(
        &self,
        file_id: &str,
    ) -> relay_domain::error::Result<Option<(DataSource, Vec<u8>)>> {
        let record = self.records.read().get(file_id).cloned();
        match record {
            Some((source, meta)) => {
                let bytes = self.blobs.get(&meta).await?;
                Ok(Some((source, bytes)))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> relay_domain::error::Result<Vec<DataSource>> {
        let records = self.records.read();
        let mut out: Vec<DataSource> = records.values().map(|(ds, _)| ds.clone()).collect();
        out.sort_by_key(|ds| ds.created_at);
        Ok(out)
    }

    async fn delete(&self, file_id: &str) -> relay_domain::error::Result<()> {
        let record = self.records.write().remove(file_id);
        if let Some((_, meta)) = record {
            self.blobs.delete(&meta).await?;
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_get_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlobStorage::new(dir.path());

        let meta = storage.save(b"payload", "f1", Some("report.pdf")).await.unwrap();
        assert_eq!(meta.size, 7);
        assert_eq!(meta.name.as_deref(), Some("report.pdf"));

        let bytes = storage.get(&meta).await.unwrap();
        assert_eq!(bytes, b"payload");

        storage.delete(&meta).await.unwrap();
        assert!(storage.get(&meta).await.is_err());
        // Second delete is a no-op.
        storage.delete(&meta).await.unwrap();
    }

    #[tokio::test]
    async fn save_overwrites_same_file_id() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlobStorage::new(dir.path());

        storage.save(b"one", "f1", None).await.unwrap();
        let meta = storage.save(b"two", "f1", None).await.unwrap();
        assert_eq!(storage.get(&meta).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn rejects_path_traversal_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlobStorage::new(dir.path());

        for bad in ["../etc/passwd", "a/b", "a\\b", ""] {
            assert!(storage.save(b"x", bad, None).await.is_err(), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn presigned_url_is_gateway_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlobStorage::new(dir.path());
        let url = storage.presigned_url("f9", UrlMethod::Get).await.unwrap();
        assert_eq!(url, "/files/f9");
    }

    #[tokio::test]
    async fn fs_data_source_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = std::sync::Arc::new(LocalBlobStorage::new(dir.path()));
        let store = FsDataSourceStore::new(blobs);

        let source = store
            .save_file(
                b"chart bytes".to_vec(),
                Some("chart.png".into()),
                Some("image/png".into()),
                AttachmentKind::Image,
            )
            .await
            .unwrap();
        assert!(source.url.as_deref().unwrap().starts_with("/files/"));

        let (fetched, bytes) = store.get(&source.id).await.unwrap().unwrap();
        assert_eq!(fetched.file_name.as_deref(), Some("chart.png"));
        assert_eq!(bytes, b"chart bytes");

        assert_eq!(store.list().await.unwrap().len(), 1);
        store.delete(&source.id).await.unwrap();
        assert!(store.get(&source.id).await.unwrap().is_none());
    }
}
