//! Backend adapters
//!
//! One adapter per URI scheme, behind a uniform async trait: object stores
//! (S3 and GCS over their public HTTP endpoints), plain webservers (read
//! only), and the local filesystem. Adapters are selected once at resolve
//! time; transient failures are retried here with exponential backoff before
//! escalating to the caller.

pub mod errors;
pub mod http;
pub mod local;
pub mod object_store;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::uri::RemoteLocator;

pub use errors::BackendError;
pub use http::HttpBackend;
pub use local::LocalBackend;
pub use object_store::ObjectStoreBackend;

/// Maximum number of retries for retryable errors
const MAX_RETRIES: u32 = 3;

/// Backoff schedule between retry attempts
const BACKOFF_MS: [u64; 3] = [500, 1000, 2000];

/// A fetched remote object: body plus the metadata the cache records
#[derive(Debug)]
pub struct FetchedObject {
    pub bytes: Vec<u8>,
    pub size: u64,
    /// Remote version identifier (ETag, generation) when the transport
    /// supplies one
    pub version: Option<String>,
}

/// Object metadata without the body, from a HEAD-style request
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub size: u64,
    pub version: Option<String>,
}

/// Uniform capability set implemented per scheme
#[async_trait]
pub trait Backend: Send + Sync {
    /// Download the object's bytes along with its size and version.
    async fn fetch(&self, locator: &RemoteLocator) -> Result<FetchedObject, BackendError>;

    /// Upload bytes to the object, returning the new remote version.
    async fn upload(
        &self,
        locator: &RemoteLocator,
        data: &[u8],
    ) -> Result<Option<String>, BackendError>;

    /// Fetch size and version without transferring the body.
    async fn stat(&self, locator: &RemoteLocator) -> Result<ObjectStat, BackendError>;

    /// Delete the remote object.
    async fn delete(&self, locator: &RemoteLocator) -> Result<(), BackendError>;
}

/// Execute a backend operation with retry and exponential backoff.
///
/// Only retryable errors (timeouts, connect failures, 429, 5xx) are retried;
/// the last error is returned once the attempt budget is exhausted.
pub(crate) async fn with_retry<T, F, Fut>(
    operation: &str,
    url: &str,
    f: F,
) -> Result<T, BackendError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, BackendError>>,
{
    for attempt in 0..=MAX_RETRIES {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() || attempt == MAX_RETRIES {
                    return Err(e);
                }
                let delay = BACKOFF_MS
                    .get(attempt as usize)
                    .copied()
                    .unwrap_or(2000);
                warn!(
                    operation = operation,
                    url = url,
                    attempt = attempt + 1,
                    max = MAX_RETRIES,
                    delay_ms = delay,
                    error = %e,
                    "Retrying backend operation"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }

    unreachable!()
}

/// Pull a trimmed ETag value out of a response header map.
pub(crate) fn etag_of(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_string())
}

/// Content-Length of a response, for HEAD requests.
pub(crate) fn content_length_of(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Percent-encode an object key, preserving `/` separators.
pub(crate) fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
