//! File cache core
//!
//! [`FileCache`] materializes remote objects onto local disk and hands out
//! plain filesystem paths guarded by cross-process locks. Reads hold a shared
//! lock for the life of the handle, so eviction can never pull a file out
//! from under an open reader; writes hold an exclusive lock and follow
//! write-back semantics, with nothing reaching the remote until `commit`.

pub mod entry;
pub mod index;
pub mod layout;
pub mod lock;

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{
    with_retry, Backend, BackendError, HttpBackend, LocalBackend, ObjectStat, ObjectStoreBackend,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::uri::{RemoteLocator, Scheme};

use entry::{EntryMeta, EntryState};
use index::CacheIndex;
use layout::CacheLayout;
use lock::{LockMode, SlotLock};

/// Bound on populate/validate rounds for one slot before giving up. Each
/// round means another process invalidated the slot between our downgrade
/// and re-check, which cannot repeat forever under sane workloads.
const MAX_SLOT_ROUNDS: usize = 16;

/// How an entry opened for writing starts out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Start from the current remote content, fetching it if not cached
    Modify,
    /// Start from an empty file, ignoring any remote content
    CreateNew,
}

/// Result of comparing a cached entry against a remote `stat`
enum Freshness {
    Fresh,
    Stale(ObjectStat),
    /// The remote could not be consulted; serve the cached copy
    Unknown,
}

/// Local cache for remote files
///
/// Cheap to clone; clones share one cache root, adapter pool, and counters.
/// Multiple `FileCache` instances (and multiple processes) pointed at the
/// same shared root coordinate through per-slot advisory locks.
#[derive(Clone)]
pub struct FileCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    layout: CacheLayout,
    index: CacheIndex,
    /// Keeps a private root alive; the directory is removed on drop
    _private_root: Option<TempDir>,
    /// Backend adapters memoized per scheme+remote base
    backends: Mutex<HashMap<String, Arc<dyn Backend>>>,
    http: reqwest::Client,
    downloads: AtomicU64,
    uploads: AtomicU64,
}

/// Open read handle pinning a cached file
///
/// Holds a shared slot lock until dropped, so the path stays valid for as
/// long as the handle lives.
#[derive(Debug)]
pub struct ReadHandle {
    local_path: PathBuf,
    _lock: Option<SlotLock>,
}

impl ReadHandle {
    /// Local filesystem path of the cached (or passthrough local) file.
    pub fn path(&self) -> &Path {
        &self.local_path
    }
}

impl AsRef<Path> for ReadHandle {
    fn as_ref(&self) -> &Path {
        &self.local_path
    }
}

/// Open write handle for one remote object
///
/// Holds the slot's exclusive lock. Write to [`path`](Self::path) with any
/// filesystem API, then [`commit`](Self::commit) to push the bytes upstream.
/// Dropping without committing leaves the entry dirty in the cache: it will
/// not be evicted, and is served to later readers until a commit replaces it.
pub struct WriteHandle {
    inner: Arc<Inner>,
    locator: RemoteLocator,
    url: String,
    local_path: PathBuf,
    lock: Option<SlotLock>,
}

impl std::fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandle")
            .field("url", &self.url)
            .field("local_path", &self.local_path)
            .finish_non_exhaustive()
    }
}

impl WriteHandle {
    /// Local path to write through.
    pub fn path(&self) -> &Path {
        &self.local_path
    }

    /// Upload the local bytes to the remote object.
    ///
    /// Returns the remote version recorded for the upload when the backend
    /// reports one. On failure the entry stays dirty and a later commit can
    /// retry.
    pub async fn commit(self) -> Result<Option<String>> {
        if self.lock.is_none() {
            // Local passthrough writes land in place; just confirm the
            // caller actually produced the file
            match tokio::fs::metadata(&self.local_path).await {
                Ok(_) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(CacheError::NotFound(self.url.clone()))
                }
                Err(e) => return Err(e.into()),
            }
        }

        let data = tokio::fs::read(&self.local_path).await?;
        let mut meta = EntryMeta::load(&self.local_path)?
            .unwrap_or_else(|| EntryMeta::new(&self.url, EntryState::Dirty));
        meta.state = EntryState::Uploading;
        meta.size_bytes = data.len() as u64;
        meta.touch();
        meta.store(&self.local_path)?;

        let backend = self.inner.backend_for(&self.locator).await;
        debug!(url = %self.url, size = data.len(), "Uploading file");
        match with_retry("upload", &self.url, || backend.upload(&self.locator, &data)).await {
            Ok(version) => {
                meta.state = EntryState::Valid;
                meta.remote_version = version.clone();
                meta.touch();
                meta.store(&self.local_path)?;
                self.inner.uploads.fetch_add(1, Ordering::Relaxed);
                self.inner.maybe_evict();
                Ok(version)
            }
            Err(e) => {
                meta.state = EntryState::Dirty;
                meta.store(&self.local_path)?;
                Err(CacheError::from_upload(&self.url, e))
            }
        }
    }

    /// Commit a batch of handles concurrently.
    ///
    /// Results come back in input order, one per handle, so one failed
    /// upload does not sink the rest of the batch.
    pub async fn commit_multi(handles: Vec<WriteHandle>) -> Vec<Result<Option<String>>> {
        join_all(handles.into_iter().map(WriteHandle::commit)).await
    }
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        // A handle dropped without commit leaves the entry dirty. Record the
        // byte count actually on disk so accounting and eviction see it.
        if self.lock.is_none() {
            return;
        }
        let size = match std::fs::metadata(&self.local_path) {
            Ok(m) => m.len(),
            Err(_) => return,
        };
        if let Ok(Some(mut meta)) = EntryMeta::load(&self.local_path) {
            if meta.state == EntryState::Dirty && meta.size_bytes != size {
                meta.size_bytes = size;
                if let Err(e) = meta.store(&self.local_path) {
                    warn!(url = %self.url, error = %e, "Failed to record dirty entry size");
                }
            }
        }
    }
}

impl FileCache {
    /// Open a cache with default configuration (private root, no size cap).
    pub fn new() -> Result<Self> {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Result<Self> {
        let (root, private_root) = match &config.cache_root {
            Some(root) => (root.clone(), None),
            None => {
                let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
                std::fs::create_dir_all(&base)?;
                let dir = tempfile::Builder::new()
                    .prefix(".fetchcache_")
                    .tempdir_in(&base)?;
                (dir.path().to_path_buf(), Some(dir))
            }
        };
        let index = CacheIndex::open(&root)?;
        let layout = CacheLayout::new(&root);
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(io::Error::other)?;

        info!(
            root = %root.display(),
            shared = private_root.is_none(),
            "Opened file cache"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                layout,
                index,
                _private_root: private_root,
                backends: Mutex::new(HashMap::new()),
                http,
                downloads: AtomicU64::new(0),
                uploads: AtomicU64::new(0),
            }),
        })
    }

    /// Directory holding cached files, sidecars, and lock files.
    pub fn cache_root(&self) -> &Path {
        self.inner.index.root()
    }

    /// Number of remote downloads performed by this instance.
    pub fn download_count(&self) -> u64 {
        self.inner.downloads.load(Ordering::Relaxed)
    }

    /// Number of remote uploads performed by this instance.
    pub fn upload_count(&self) -> u64 {
        self.inner.uploads.load(Ordering::Relaxed)
    }

    /// Total bytes currently recorded in the cache.
    pub fn cached_bytes(&self) -> Result<u64> {
        Ok(self.inner.index.total_bytes()?)
    }

    /// Local path a reference resolves to, without touching the network.
    ///
    /// For remote references this is the slot path whether or not it is
    /// populated; for local references it is the path itself.
    pub fn local_path_for(&self, url: &str) -> Result<PathBuf> {
        let locator = RemoteLocator::parse(url)?;
        if locator.is_local() {
            return Ok(PathBuf::from(locator.key()));
        }
        Ok(self.inner.layout.local_path(&locator))
    }

    /// Install a backend adapter for every reference under `base`
    /// (e.g. `gs://bucket`), replacing the built-in adapter for it.
    pub async fn register_backend(&self, base: &str, backend: Arc<dyn Backend>) {
        let mut backends = self.inner.backends.lock().await;
        backends.insert(base.trim_end_matches('/').to_string(), backend);
    }

    /// Materialize a reference and return a handle to its local file.
    ///
    /// Cache hits return immediately; misses download under an exclusive
    /// slot lock while concurrent readers of the same object wait for the one
    /// in-flight transfer. The returned handle holds a shared lock, keeping
    /// the file safe from eviction until it is dropped.
    pub async fn open_for_read(&self, url: &str) -> Result<ReadHandle> {
        let locator = RemoteLocator::parse(url)?;
        if locator.is_local() {
            return self.open_local_for_read(&locator).await;
        }
        self.read_remote_slot(&locator, MAX_SLOT_ROUNDS).await
    }

    /// Materialize several references concurrently.
    ///
    /// One result per input, in input order. A failure for one object does
    /// not affect the others; distinct objects download in parallel while
    /// duplicates of the same reference share a single transfer.
    pub async fn open_for_read_multi<S: AsRef<str>>(&self, urls: &[S]) -> Vec<Result<ReadHandle>> {
        join_all(urls.iter().map(|u| self.open_for_read(u.as_ref()))).await
    }

    async fn read_remote_slot(
        &self,
        locator: &RemoteLocator,
        rounds: usize,
    ) -> Result<ReadHandle> {
        let url = locator.normalized();
        let local_path = self.inner.layout.local_path(locator);
        let backend = self.inner.backend_for(locator).await;
        let timeout = self.inner.config.lock_timeout;

        // Remote stat captured when a cached entry was seen to be stale;
        // used under the exclusive lock to tell a concurrent refresh apart
        // from the stale copy we already rejected.
        let mut expected: Option<ObjectStat> = None;

        for _ in 0..rounds {
            let shared = SlotLock::acquire(&local_path, LockMode::Shared, timeout).await?;
            if let Some(mut meta) = EntryMeta::load(&local_path)? {
                if meta.is_usable() {
                    let fresh = if self.inner.config.verify_on_read
                        && meta.state == EntryState::Valid
                    {
                        match self.inner.check_freshness(&backend, locator, &meta).await {
                            Freshness::Fresh | Freshness::Unknown => true,
                            Freshness::Stale(stat) => {
                                debug!(url = %url, "Cached copy is stale; refreshing");
                                expected = Some(stat);
                                false
                            }
                        }
                    } else {
                        true
                    };
                    if fresh {
                        meta.touch();
                        if let Err(e) = meta.store(&local_path) {
                            warn!(url = %url, error = %e, "Failed to record cache access time");
                        }
                        debug!(url = %url, "File cache HIT");
                        return Ok(ReadHandle {
                            local_path,
                            _lock: Some(shared),
                        });
                    }
                }
            }
            drop(shared);

            let mut excl = SlotLock::acquire(&local_path, LockMode::Exclusive, timeout).await?;

            // Another process may have populated or refreshed the slot while
            // we waited for the exclusive lock.
            if let Some(mut meta) = EntryMeta::load(&local_path)? {
                if meta.is_usable() && Self::still_stale(&meta, expected.as_ref()) {
                    // Crash-safe marker: if the refetch below never runs,
                    // the slot reads as absent instead of serving old bytes
                    meta.state = EntryState::Stale;
                    meta.store(&local_path)?;
                } else if meta.is_usable() {
                    excl.downgrade_to_shared().await?;
                    match EntryMeta::load(&local_path)? {
                        Some(m) if m.is_usable() => {
                            debug!(url = %url, "File cache HIT");
                            return Ok(ReadHandle {
                                local_path,
                                _lock: Some(excl),
                            });
                        }
                        // Invalidated during the downgrade window; start over
                        _ => continue,
                    }
                }
            }

            self.inner
                .fetch_into_slot(backend.as_ref(), locator, &local_path)
                .await?;
            expected = None;
            self.inner.maybe_evict();

            // Downgrade is not atomic, so re-validate before serving
            excl.downgrade_to_shared().await?;
            match EntryMeta::load(&local_path)? {
                Some(m) if m.is_usable() => {
                    return Ok(ReadHandle {
                        local_path,
                        _lock: Some(excl),
                    })
                }
                _ => continue,
            }
        }

        Err(CacheError::Contended(url))
    }

    /// Open a reference for writing.
    ///
    /// The exclusive slot lock is held until the handle is dropped, so two
    /// writers of the same object serialize, as do writers against readers.
    pub async fn open_for_write(&self, url: &str, mode: WriteMode) -> Result<WriteHandle> {
        let locator = RemoteLocator::parse(url)?;
        let url = locator.normalized();

        if locator.is_local() {
            let local_path = PathBuf::from(locator.key());
            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            return Ok(WriteHandle {
                inner: self.inner.clone(),
                locator,
                url,
                local_path,
                lock: None,
            });
        }

        let local_path = self.inner.layout.local_path(&locator);
        let backend = self.inner.backend_for(&locator).await;
        let lock =
            SlotLock::acquire(&local_path, LockMode::Exclusive, self.inner.config.lock_timeout)
                .await?;

        let usable = EntryMeta::load(&local_path)?.is_some_and(|m| m.is_usable());
        match mode {
            WriteMode::Modify if !usable => {
                self.inner
                    .fetch_into_slot(backend.as_ref(), &locator, &local_path)
                    .await?;
            }
            WriteMode::CreateNew => {
                write_atomic(&local_path, &[])?;
            }
            WriteMode::Modify => {}
        }

        let mut meta = EntryMeta::load(&local_path)?
            .unwrap_or_else(|| EntryMeta::new(&url, EntryState::Dirty));
        meta.state = EntryState::Dirty;
        meta.size_bytes = std::fs::metadata(&local_path)?.len();
        meta.touch();
        meta.store(&local_path)?;

        debug!(url = %url, mode = ?mode, "Opened file for writing");
        Ok(WriteHandle {
            inner: self.inner.clone(),
            locator,
            url,
            local_path,
            lock: Some(lock),
        })
    }

    /// Whether the reference resolves to an existing object.
    ///
    /// A usable cached entry answers without touching the network; otherwise
    /// the backend is consulted with a metadata request.
    pub async fn exists(&self, url: &str) -> Result<bool> {
        let locator = RemoteLocator::parse(url)?;
        if locator.is_local() {
            return Ok(tokio::fs::try_exists(locator.key()).await?);
        }

        let url = locator.normalized();
        let local_path = self.inner.layout.local_path(&locator);
        if EntryMeta::load(&local_path)?.is_some_and(|m| m.is_usable()) {
            return Ok(true);
        }

        let backend = self.inner.backend_for(&locator).await;
        match with_retry("stat", &url, || backend.stat(&locator)).await {
            Ok(_) => Ok(true),
            Err(BackendError::NotFound(_)) => Ok(false),
            Err(e) => Err(CacheError::from_fetch(&url, e)),
        }
    }

    /// Check several references concurrently. One result per input, in
    /// input order.
    pub async fn exists_multi<S: AsRef<str>>(&self, urls: &[S]) -> Vec<Result<bool>> {
        join_all(urls.iter().map(|u| self.exists(u.as_ref()))).await
    }

    /// Delete the remote object and drop any cached copy of it.
    pub async fn delete(&self, url: &str) -> Result<()> {
        let locator = RemoteLocator::parse(url)?;
        let url = locator.normalized();
        let backend = self.inner.backend_for(&locator).await;

        with_retry("delete", &url, || backend.delete(&locator))
            .await
            .map_err(|e| CacheError::from_upload(&url, e))?;

        if !locator.is_local() {
            self.invalidate_slot(&locator).await?;
        }
        debug!(url = %url, "Deleted remote object");
        Ok(())
    }

    /// Drop the cached copy of a reference without touching the remote.
    pub async fn invalidate(&self, url: &str) -> Result<()> {
        let locator = RemoteLocator::parse(url)?;
        if locator.is_local() {
            return Ok(());
        }
        self.invalidate_slot(&locator).await
    }

    /// Remove every cache entry not currently in use by any process.
    /// Returns the number of entries removed.
    pub async fn purge(&self) -> Result<usize> {
        Ok(self.inner.index.purge()?)
    }

    async fn invalidate_slot(&self, locator: &RemoteLocator) -> Result<()> {
        let local_path = self.inner.layout.local_path(locator);
        let lock =
            SlotLock::acquire(&local_path, LockMode::Exclusive, self.inner.config.lock_timeout)
                .await?;
        self.inner.index.remove_entry(&local_path)?;
        drop(lock);
        debug!(url = %locator, "Invalidated cache entry");
        Ok(())
    }

    async fn open_local_for_read(&self, locator: &RemoteLocator) -> Result<ReadHandle> {
        let local_path = PathBuf::from(locator.key());
        match tokio::fs::metadata(&local_path).await {
            Ok(_) => Ok(ReadHandle {
                local_path,
                _lock: None,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CacheError::NotFound(locator.normalized()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn still_stale(meta: &EntryMeta, expected: Option<&ObjectStat>) -> bool {
        let Some(stat) = expected else {
            return false;
        };
        match (&meta.remote_version, &stat.version) {
            (Some(have), Some(want)) => have != want,
            _ => meta.size_bytes != stat.size,
        }
    }
}

impl Inner {
    async fn backend_for(&self, locator: &RemoteLocator) -> Arc<dyn Backend> {
        let base = locator.base();
        let mut backends = self.backends.lock().await;
        if let Some(backend) = backends.get(&base) {
            return backend.clone();
        }
        let backend: Arc<dyn Backend> = match locator.scheme() {
            Scheme::S3 | Scheme::Gs => {
                Arc::new(ObjectStoreBackend::new(self.http.clone(), locator))
            }
            Scheme::Http => Arc::new(HttpBackend::new(self.http.clone(), locator)),
            Scheme::Local => Arc::new(LocalBackend::new()),
        };
        backends.insert(base, backend.clone());
        backend
    }

    /// Download into the slot. Caller holds the exclusive lock.
    async fn fetch_into_slot(
        &self,
        backend: &dyn Backend,
        locator: &RemoteLocator,
        local_path: &Path,
    ) -> Result<()> {
        let url = locator.normalized();
        debug!(url = %url, "File cache MISS; downloading");

        let mut meta = EntryMeta::new(&url, EntryState::Fetching);
        meta.store(local_path)?;

        let fetched = match with_retry("fetch", &url, || backend.fetch(locator)).await {
            Ok(fetched) => fetched,
            Err(e) => {
                // Leave no half-open slot behind
                if let Err(remove_err) = EntryMeta::remove(local_path) {
                    warn!(url = %url, error = %remove_err, "Failed to clear aborted fetch");
                }
                return Err(CacheError::from_fetch(&url, e));
            }
        };

        write_atomic(local_path, &fetched.bytes)?;
        meta.state = EntryState::Valid;
        meta.remote_version = fetched.version;
        meta.size_bytes = fetched.size;
        meta.touch();
        meta.store(local_path)?;

        self.downloads.fetch_add(1, Ordering::Relaxed);
        debug!(url = %url, size = fetched.size, "Downloaded file into cache");
        Ok(())
    }

    async fn check_freshness(
        &self,
        backend: &Arc<dyn Backend>,
        locator: &RemoteLocator,
        meta: &EntryMeta,
    ) -> Freshness {
        let url = locator.normalized();
        let stat = match with_retry("stat", &url, || backend.stat(locator)).await {
            Ok(stat) => stat,
            Err(e) => {
                warn!(url = %url, error = %e, "Freshness check failed; serving cached copy");
                return Freshness::Unknown;
            }
        };
        let fresh = match (&meta.remote_version, &stat.version) {
            (Some(have), Some(want)) => have == want,
            _ => meta.size_bytes == stat.size,
        };
        if fresh {
            Freshness::Fresh
        } else {
            Freshness::Stale(stat)
        }
    }

    fn maybe_evict(&self) {
        let Some(max) = self.config.max_bytes else {
            return;
        };
        match self.index.evict_to(max) {
            Ok(0) => {}
            Ok(freed) => debug!(freed, max, "Evicted cache entries"),
            Err(e) => warn!(error = %e, "Cache eviction failed"),
        }
    }
}

/// Write bytes to `path` through a temp file in the same directory, so a
/// crash mid-write never leaves a torn data file at the final path.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FetchedObject;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Serves one fixed object and counts fetches
    struct StaticBackend {
        body: Vec<u8>,
        version: Option<String>,
        fetches: AtomicUsize,
    }

    impl StaticBackend {
        fn new(body: &[u8], version: Option<&str>) -> Self {
            Self {
                body: body.to_vec(),
                version: version.map(str::to_string),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Backend for StaticBackend {
        async fn fetch(
            &self,
            _locator: &RemoteLocator,
        ) -> std::result::Result<FetchedObject, BackendError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedObject {
                bytes: self.body.clone(),
                size: self.body.len() as u64,
                version: self.version.clone(),
            })
        }

        async fn upload(
            &self,
            _locator: &RemoteLocator,
            _data: &[u8],
        ) -> std::result::Result<Option<String>, BackendError> {
            Ok(Some("uploaded-1".into()))
        }

        async fn stat(
            &self,
            _locator: &RemoteLocator,
        ) -> std::result::Result<ObjectStat, BackendError> {
            Ok(ObjectStat {
                size: self.body.len() as u64,
                version: self.version.clone(),
            })
        }

        async fn delete(&self, _locator: &RemoteLocator) -> std::result::Result<(), BackendError> {
            Ok(())
        }
    }

    fn cache_in(dir: &Path) -> FileCache {
        FileCache::with_config(CacheConfig::new().cache_root(dir)).unwrap()
    }

    #[tokio::test]
    async fn miss_downloads_then_hit_serves_locally() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let backend = Arc::new(StaticBackend::new(b"payload", Some("v1")));
        cache.register_backend("gs://bucket", backend.clone()).await;

        let handle = cache.open_for_read("gs://bucket/file.dat").await.unwrap();
        assert_eq!(std::fs::read(handle.path()).unwrap(), b"payload");
        drop(handle);

        let handle = cache.open_for_read("gs://bucket/file.dat").await.unwrap();
        assert_eq!(std::fs::read(handle.path()).unwrap(), b"payload");

        assert_eq!(backend.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.download_count(), 1);
    }

    #[tokio::test]
    async fn write_commit_records_remote_version() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache
            .register_backend("gs://bucket", Arc::new(StaticBackend::new(b"", None)))
            .await;

        let handle = cache
            .open_for_write("gs://bucket/out.dat", WriteMode::CreateNew)
            .await
            .unwrap();
        std::fs::write(handle.path(), b"fresh bytes").unwrap();
        let version = handle.commit().await.unwrap();
        assert_eq!(version.as_deref(), Some("uploaded-1"));
        assert_eq!(cache.upload_count(), 1);

        // Committed entry now serves reads without a fetch
        let read = cache.open_for_read("gs://bucket/out.dat").await.unwrap();
        assert_eq!(std::fs::read(read.path()).unwrap(), b"fresh bytes");
        assert_eq!(cache.download_count(), 0);
    }

    #[tokio::test]
    async fn uncommitted_write_stays_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache
            .register_backend("gs://bucket", Arc::new(StaticBackend::new(b"", None)))
            .await;

        let handle = cache
            .open_for_write("gs://bucket/draft.dat", WriteMode::CreateNew)
            .await
            .unwrap();
        std::fs::write(handle.path(), b"draft").unwrap();
        let slot = handle.path().to_path_buf();
        drop(handle);

        let meta = EntryMeta::load(&slot).unwrap().expect("sidecar");
        assert_eq!(meta.state, EntryState::Dirty);
        // Uncommitted bytes still occupy the cache and must be accounted for
        assert_eq!(meta.size_bytes, 5);
        assert_eq!(cache.cached_bytes().unwrap(), 5);
        assert_eq!(cache.upload_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_slot_rounds_report_contention() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache
            .register_backend("gs://bucket", Arc::new(StaticBackend::new(b"x", None)))
            .await;

        let locator = RemoteLocator::parse("gs://bucket/busy.dat").unwrap();
        let err = cache.read_remote_slot(&locator, 0).await.unwrap_err();
        assert!(matches!(err, CacheError::Contended(_)));
    }

    #[tokio::test]
    async fn local_references_bypass_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let target = dir.path().join("plain.txt");
        std::fs::write(&target, b"already here").unwrap();

        let handle = cache.open_for_read(target.to_str().unwrap()).await.unwrap();
        assert_eq!(handle.path(), target.as_path());
        assert_eq!(cache.download_count(), 0);
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let missing = dir.path().join("absent.txt");
        let err = cache
            .open_for_read(missing.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalidate_forces_a_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let backend = Arc::new(StaticBackend::new(b"payload", Some("v1")));
        cache.register_backend("gs://bucket", backend.clone()).await;

        drop(cache.open_for_read("gs://bucket/file.dat").await.unwrap());
        cache.invalidate("gs://bucket/file.dat").await.unwrap();
        drop(cache.open_for_read("gs://bucket/file.dat").await.unwrap());

        assert_eq!(backend.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exists_prefers_the_cached_copy() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let backend = Arc::new(StaticBackend::new(b"payload", Some("v1")));
        cache.register_backend("gs://bucket", backend.clone()).await;

        assert!(cache.exists("gs://bucket/file.dat").await.unwrap());
        drop(cache.open_for_read("gs://bucket/file.dat").await.unwrap());
        assert!(cache.exists("gs://bucket/file.dat").await.unwrap());
    }

    #[tokio::test]
    async fn modify_mode_seeds_from_remote_content() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache
            .register_backend(
                "gs://bucket",
                Arc::new(StaticBackend::new(b"existing", Some("v1"))),
            )
            .await;

        let handle = cache
            .open_for_write("gs://bucket/file.dat", WriteMode::Modify)
            .await
            .unwrap();
        assert_eq!(std::fs::read(handle.path()).unwrap(), b"existing");
    }

    #[test]
    fn local_path_for_is_stable_and_inside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let a = cache.local_path_for("gs://bucket/file.dat").unwrap();
        let b = cache.local_path_for("gs://bucket/file.dat").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(dir.path()));
    }
}
