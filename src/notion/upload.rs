//! File upload subprotocol.
//!
//! Local paths are uploaded once per run: create a slot, PUT the bytes
//! to the signed URL, finalize, and cache the handle under the
//! canonical path. Concurrent workers asking for the same path coalesce
//! onto a single upload. URL inputs never upload; they are used by
//! reference.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use super::api::{ApiError, NotionApi};
use super::types::FileHandle;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("file {} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub struct FileUploader {
    api: Arc<dyn NotionApi>,
    cache: Mutex<HashMap<PathBuf, Arc<OnceCell<FileHandle>>>>,
}

impl FileUploader {
    pub fn new(api: Arc<dyn NotionApi>) -> Self {
        Self {
            api,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Upload a local file, or return the handle from an earlier upload
    /// of the same path in this run.
    pub async fn upload_path(&self, path: &Path) -> Result<FileHandle, UploadError> {
        let key = path
            .canonicalize()
            .map_err(|_| UploadError::Missing(path.to_owned()))?;

        let cell = {
            let mut cache = self.cache.lock().await;
            Arc::clone(cache.entry(key.clone()).or_default())
        };
        cell.get_or_try_init(|| self.upload_uncached(&key))
            .await
            .cloned()
    }

    async fn upload_uncached(&self, path: &Path) -> Result<FileHandle, UploadError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Read {
            path: path.to_owned(),
            source,
        })?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_owned();
        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        let content_type = content_type.essence_str();
        let sha256 = format!("{:x}", Sha256::digest(&bytes));

        debug!(path = %path.display(), size = bytes.len(), content_type, "uploading file");
        let slot = self.api.create_file_upload(&filename, content_type).await?;
        self.api
            .send_file_upload(&slot, bytes, content_type)
            .await?;
        self.api.complete_file_upload(&slot.id).await?;

        Ok(FileHandle {
            id: slot.id,
            filename,
            sha256,
        })
    }
}
