//! Object-store backend
//!
//! One adapter covering S3 and Google Cloud Storage through their public HTTP
//! endpoints (S3 virtual-hosted URLs, the GCS XML API). Credential resolution
//! is out of scope; requests go out unsigned, which matches public buckets
//! and anonymous access.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::{content_length_of, encode_key, etag_of};
use super::{Backend, BackendError, FetchedObject, ObjectStat};
use crate::uri::{RemoteLocator, Scheme};

/// GCS returns the object generation in this header; it is a stronger
/// version marker than the ETag for composite uploads.
const GCS_GENERATION_HEADER: &str = "x-goog-generation";

/// Adapter for `s3://` and `gs://` references
pub struct ObjectStoreBackend {
    client: Client,
    scheme: Scheme,
    bucket: String,
}

impl ObjectStoreBackend {
    pub fn new(client: Client, locator: &RemoteLocator) -> Self {
        Self {
            client,
            scheme: locator.scheme(),
            bucket: locator.remote().to_string(),
        }
    }

    fn object_url(&self, locator: &RemoteLocator) -> String {
        let key = encode_key(locator.key());
        match self.scheme {
            Scheme::S3 => format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
            _ => format!("https://storage.googleapis.com/{}/{}", self.bucket, key),
        }
    }

    fn version_of(&self, headers: &reqwest::header::HeaderMap) -> Option<String> {
        if self.scheme == Scheme::Gs {
            if let Some(generation) = headers
                .get(GCS_GENERATION_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                return Some(generation.to_string());
            }
        }
        etag_of(headers)
    }
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    async fn fetch(&self, locator: &RemoteLocator) -> Result<FetchedObject, BackendError> {
        let url = self.object_url(locator);
        debug!(url = %url, "Downloading object");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(BackendError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &body));
        }

        let version = self.version_of(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(BackendError::from_transport)?;

        debug!(url = %url, size = bytes.len(), "Downloaded object");

        Ok(FetchedObject {
            size: bytes.len() as u64,
            bytes: bytes.to_vec(),
            version,
        })
    }

    async fn upload(
        &self,
        locator: &RemoteLocator,
        data: &[u8],
    ) -> Result<Option<String>, BackendError> {
        let url = self.object_url(locator);
        info!(url = %url, size = data.len(), "Uploading object");

        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_LENGTH, data.len())
            .body(data.to_vec())
            .send()
            .await
            .map_err(BackendError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &body));
        }

        Ok(self.version_of(response.headers()))
    }

    async fn stat(&self, locator: &RemoteLocator) -> Result<ObjectStat, BackendError> {
        let url = self.object_url(locator);

        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(BackendError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(BackendError::from_status(status, ""));
        }

        Ok(ObjectStat {
            size: content_length_of(response.headers()),
            version: self.version_of(response.headers()),
        })
    }

    async fn delete(&self, locator: &RemoteLocator) -> Result<(), BackendError> {
        let url = self.object_url(locator);
        info!(url = %url, "Deleting object");

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(BackendError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &body));
        }

        Ok(())
    }
}
