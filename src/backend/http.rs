//! HTTP(S) webserver backend
//!
//! Read-only adapter for plain webservers: GET for fetch, HEAD for stat.
//! Upload and delete are unsupported.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{content_length_of, encode_key, etag_of};
use super::{Backend, BackendError, FetchedObject, ObjectStat};
use crate::uri::RemoteLocator;

/// Read-only adapter for `http://` and `https://` references
pub struct HttpBackend {
    client: Client,
    /// `http://host` or `https://host`
    base: String,
}

impl HttpBackend {
    pub fn new(client: Client, locator: &RemoteLocator) -> Self {
        Self {
            client,
            base: locator.base(),
        }
    }

    fn object_url(&self, locator: &RemoteLocator) -> String {
        format!("{}/{}", self.base, encode_key(locator.key()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch(&self, locator: &RemoteLocator) -> Result<FetchedObject, BackendError> {
        let url = self.object_url(locator);
        debug!(url = %url, "Downloading file from webserver");

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

        let version = etag_of(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(BackendError::from_transport)?;

        Ok(FetchedObject {
            size: bytes.len() as u64,
            bytes: bytes.to_vec(),
            version,
        })
    }

    async fn upload(
        &self,
        _locator: &RemoteLocator,
        _data: &[u8],
    ) -> Result<Option<String>, BackendError> {
        Err(BackendError::Unsupported)
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
            version: etag_of(response.headers()),
        })
    }

    async fn delete(&self, _locator: &RemoteLocator) -> Result<(), BackendError> {
        Err(BackendError::Unsupported)
    }
}
