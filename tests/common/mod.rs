//! Shared test fixtures
//!
//! An in-memory [`Backend`] standing in for a remote bucket, with per-call
//! counters and failure injection, plus helpers for building caches over
//! temporary roots.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fetchcache::{
    Backend, BackendError, CacheConfig, FetchedObject, FileCache, ObjectStat, RemoteLocator,
};

#[derive(Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    version: u64,
}

/// In-memory bucket keyed by object key
#[derive(Default)]
pub struct MockBucket {
    objects: Mutex<HashMap<String, StoredObject>>,
    pub fetches: AtomicUsize,
    pub uploads: AtomicUsize,
    pub stats: AtomicUsize,
    /// Fatal errors to inject into the next fetches (not retryable)
    deny_fetches: AtomicUsize,
    /// Fatal errors to inject into the next uploads (not retryable)
    deny_uploads: AtomicUsize,
    /// Artificial latency per fetch, to force overlap in concurrency tests
    fetch_delay: Mutex<Duration>,
}

impl MockBucket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, key: &str, bytes: &[u8]) {
        let mut objects = self.objects.lock().unwrap();
        let version = objects.get(key).map(|o| o.version + 1).unwrap_or(1);
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                version,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|o| o.bytes.clone())
    }

    pub fn deny_next_fetches(&self, n: usize) {
        self.deny_fetches.store(n, Ordering::SeqCst);
    }

    pub fn deny_next_uploads(&self, n: usize) {
        self.deny_uploads.store(n, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Backend for MockBucket {
    async fn fetch(&self, locator: &RemoteLocator) -> Result<FetchedObject, BackendError> {
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.deny_fetches) {
            return Err(BackendError::PermissionDenied("injected".into()));
        }
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(locator.key())
            .ok_or_else(|| BackendError::NotFound(locator.key().to_string()))?;
        Ok(FetchedObject {
            bytes: object.bytes.clone(),
            size: object.bytes.len() as u64,
            version: Some(object.version.to_string()),
        })
    }

    async fn upload(
        &self,
        locator: &RemoteLocator,
        data: &[u8],
    ) -> Result<Option<String>, BackendError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.deny_uploads) {
            return Err(BackendError::PermissionDenied("injected".into()));
        }
        self.put(locator.key(), data);
        let version = self
            .objects
            .lock()
            .unwrap()
            .get(locator.key())
            .map(|o| o.version.to_string());
        Ok(version)
    }

    async fn stat(&self, locator: &RemoteLocator) -> Result<ObjectStat, BackendError> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(locator.key())
            .ok_or_else(|| BackendError::NotFound(locator.key().to_string()))?;
        Ok(ObjectStat {
            size: object.bytes.len() as u64,
            version: Some(object.version.to_string()),
        })
    }

    async fn delete(&self, locator: &RemoteLocator) -> Result<(), BackendError> {
        self.objects
            .lock()
            .unwrap()
            .remove(locator.key())
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(locator.key().to_string()))
    }
}

pub const BUCKET: &str = "gs://test-bucket";

/// Route cache log output through the test harness, filtered by `RUST_LOG`.
/// Safe to call from every test: only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Cache over `root` wired to `bucket` for everything under [`BUCKET`].
pub async fn cache_with_bucket(root: &Path, bucket: &Arc<MockBucket>) -> FileCache {
    init_tracing();
    let cache = FileCache::with_config(CacheConfig::new().cache_root(root)).unwrap();
    cache
        .register_backend(BUCKET, bucket.clone() as Arc<dyn Backend>)
        .await;
    cache
}

pub fn url(key: &str) -> String {
    format!("{BUCKET}/{key}")
}
