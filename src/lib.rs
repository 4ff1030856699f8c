//! Local caching for remote files
//!
//! `fetchcache` gives programs that read and write remote objects (S3 and
//! Google Cloud Storage buckets, plain webservers, or local paths addressed
//! uniformly) ordinary filesystem paths to work with. The first read of an
//! object downloads it into a cache directory; every later read is served
//! from disk. Writes are write-back: they land in the cache and reach the
//! remote only on an explicit commit.
//!
//! Caches may be private to one instance or shared between processes. Shared
//! roots coordinate through per-file advisory locks, so concurrent readers,
//! a downloader, and the LRU evictor never step on each other, within one
//! process or across many.
//!
//! ```no_run
//! use fetchcache::{CacheConfig, FileCache};
//!
//! # async fn demo() -> fetchcache::Result<()> {
//! let cache = FileCache::with_config(
//!     CacheConfig::new()
//!         .cache_root("/var/cache/datasets")
//!         .max_bytes(10 * 1024 * 1024 * 1024),
//! )?;
//!
//! let handle = cache.open_for_read("gs://my-bucket/2026/obs.tab").await?;
//! let contents = std::fs::read_to_string(handle.path())?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod prefix;
pub mod uri;

pub use backend::{Backend, BackendError, FetchedObject, ObjectStat};
pub use cache::lock::{LockMode, SlotLock};
pub use cache::{FileCache, ReadHandle, WriteHandle, WriteMode};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use prefix::CachePrefix;
pub use uri::{RemoteLocator, Scheme};
