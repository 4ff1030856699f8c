//! Cache configuration
//!
//! Supplied at construction. An explicit `cache_root` is a shared directory
//! that other processes (and future runs) participate in; leaving it unset
//! creates a private per-instance root that is removed when the cache handle
//! is dropped.

use std::path::PathBuf;
use std::time::Duration;

/// Default time to wait for a slot lock before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`crate::FileCache`]
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Shared cache root. `None` creates a unique private directory under the
    /// platform cache dir that lives as long as the cache handle.
    pub cache_root: Option<PathBuf>,
    /// Ceiling on aggregate cached bytes; `None` is unbounded.
    pub max_bytes: Option<u64>,
    /// How long a caller waits for a contested slot lock.
    pub lock_timeout: Duration,
    /// Verify cached entries against the remote version (cheap `stat`) on
    /// every read. Off by default; a cache hit then never touches the network.
    pub verify_on_read: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: None,
            max_bytes: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            verify_on_read: false,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    pub fn max_bytes(mut self, max: u64) -> Self {
        self.max_bytes = Some(max);
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn verify_on_read(mut self, verify: bool) -> Self {
        self.verify_on_read = verify;
        self
    }
}
