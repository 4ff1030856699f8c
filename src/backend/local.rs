//! Local-filesystem backend
//!
//! Passthrough adapter for `file://` and bare-path references. The cache
//! controller never copies local files into the cache (they already live on
//! local disk); this adapter exists for the uniform stat/fetch/upload/delete
//! surface and for existence probes.

use std::io::ErrorKind;
use std::path::Path;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;

use super::{Backend, BackendError, FetchedObject, ObjectStat};
use crate::uri::RemoteLocator;

/// Adapter for local-filesystem references
#[derive(Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    fn map_io(path: &Path, err: std::io::Error) -> BackendError {
        match err.kind() {
            ErrorKind::NotFound => BackendError::NotFound(path.display().to_string()),
            ErrorKind::PermissionDenied => {
                BackendError::PermissionDenied(path.display().to_string())
            }
            _ => BackendError::Io(err),
        }
    }

    /// Version string derived from mtime, so staleness checks work for local
    /// files too.
    fn mtime_version(meta: &std::fs::Metadata) -> Option<String> {
        meta.modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| format!("mtime-{}", d.as_millis()))
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn fetch(&self, locator: &RemoteLocator) -> Result<FetchedObject, BackendError> {
        let path = Path::new(locator.key());
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        if !meta.is_file() {
            return Err(BackendError::NotFound(path.display().to_string()));
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        Ok(FetchedObject {
            size: bytes.len() as u64,
            version: Self::mtime_version(&meta),
            bytes,
        })
    }

    async fn upload(
        &self,
        locator: &RemoteLocator,
        data: &[u8],
    ) -> Result<Option<String>, BackendError> {
        let path = Path::new(locator.key());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io(parent, e))?;
        }
        tokio::fs::write(path, data)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        Ok(Self::mtime_version(&meta))
    }

    async fn stat(&self, locator: &RemoteLocator) -> Result<ObjectStat, BackendError> {
        let path = Path::new(locator.key());
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        if !meta.is_file() {
            return Err(BackendError::NotFound(path.display().to_string()));
        }
        Ok(ObjectStat {
            size: meta.len(),
            version: Self::mtime_version(&meta),
        })
    }

    async fn delete(&self, locator: &RemoteLocator) -> Result<(), BackendError> {
        let path = Path::new(locator.key());
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| Self::map_io(path, e))
    }
}
