//! Cache error taxonomy
//!
//! Public error type for all cache operations. Transient backend failures are
//! retried internally and never surface directly; after retry exhaustion they
//! escalate to `FetchFailed`/`UploadFailed` carrying the final backend error.

use std::path::PathBuf;
use std::time::Duration;

use crate::backend::BackendError;

/// Errors surfaced by cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("malformed reference: {0}")]
    MalformedReference(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to fetch {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to upload {url}: {source}")]
    UploadFailed {
        url: String,
        #[source]
        source: BackendError,
    },

    #[error("timed out after {waited:?} waiting for lock on {path:?}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("cache entry for {0} was repeatedly invalidated by concurrent activity")]
    Contended(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Classify a backend failure from a fetch critical section.
    pub(crate) fn from_fetch(url: &str, err: BackendError) -> Self {
        match err {
            BackendError::NotFound(_) => CacheError::NotFound(url.to_string()),
            BackendError::PermissionDenied(_) => CacheError::PermissionDenied(url.to_string()),
            BackendError::Unsupported => CacheError::UnsupportedOperation("fetch"),
            other => CacheError::FetchFailed {
                url: url.to_string(),
                source: other,
            },
        }
    }

    /// Classify a backend failure from an upload critical section.
    pub(crate) fn from_upload(url: &str, err: BackendError) -> Self {
        match err {
            BackendError::NotFound(_) => CacheError::NotFound(url.to_string()),
            BackendError::PermissionDenied(_) => CacheError::PermissionDenied(url.to_string()),
            BackendError::Unsupported => CacheError::UnsupportedOperation("upload"),
            other => CacheError::UploadFailed {
                url: url.to_string(),
                source: other,
            },
        }
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, CacheError>;
