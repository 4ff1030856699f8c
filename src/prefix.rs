//! Prefix-scoped cache handles
//!
//! A [`CachePrefix`] binds a cache to one remote location (a bucket, a
//! directory on a webserver, a local tree) so callers can address objects by
//! relative path instead of repeating full URLs.

use std::path::PathBuf;

use crate::cache::{FileCache, ReadHandle, WriteHandle, WriteMode};
use crate::error::Result;
use crate::uri::RemoteLocator;

/// A cache handle scoped to everything under one URL prefix
#[derive(Clone)]
pub struct CachePrefix {
    cache: FileCache,
    prefix: String,
}

impl std::fmt::Debug for CachePrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePrefix")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl CachePrefix {
    /// Scope `cache` to the location named by `prefix`.
    ///
    /// The prefix is validated the same way full references are, so a bad
    /// scheme or traversal segment is rejected up front.
    pub fn new(cache: FileCache, prefix: &str) -> Result<Self> {
        // Parsing requires a key; probe with a dummy leaf so bucket-only
        // prefixes like `gs://bucket` validate too.
        let trimmed = prefix.trim_end_matches('/');
        RemoteLocator::parse(&format!("{trimmed}/{}", "x"))?;
        Ok(Self {
            cache,
            prefix: trimmed.to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full reference for a sub-path under this prefix.
    pub fn full_url(&self, sub_path: &str) -> String {
        format!("{}/{}", self.prefix, sub_path.trim_start_matches('/'))
    }

    pub async fn open_for_read(&self, sub_path: &str) -> Result<ReadHandle> {
        self.cache.open_for_read(&self.full_url(sub_path)).await
    }

    /// Materialize several sub-paths concurrently. One result per input,
    /// in input order.
    pub async fn open_for_read_multi<S: AsRef<str>>(
        &self,
        sub_paths: &[S],
    ) -> Vec<Result<ReadHandle>> {
        let urls: Vec<String> = sub_paths
            .iter()
            .map(|p| self.full_url(p.as_ref()))
            .collect();
        self.cache.open_for_read_multi(&urls).await
    }

    pub async fn open_for_write(&self, sub_path: &str, mode: WriteMode) -> Result<WriteHandle> {
        self.cache
            .open_for_write(&self.full_url(sub_path), mode)
            .await
    }

    pub async fn exists(&self, sub_path: &str) -> Result<bool> {
        self.cache.exists(&self.full_url(sub_path)).await
    }

    /// Check several sub-paths concurrently. One result per input, in
    /// input order.
    pub async fn exists_multi<S: AsRef<str>>(&self, sub_paths: &[S]) -> Vec<Result<bool>> {
        let urls: Vec<String> = sub_paths
            .iter()
            .map(|p| self.full_url(p.as_ref()))
            .collect();
        self.cache.exists_multi(&urls).await
    }

    pub async fn delete(&self, sub_path: &str) -> Result<()> {
        self.cache.delete(&self.full_url(sub_path)).await
    }

    pub fn local_path_for(&self, sub_path: &str) -> Result<PathBuf> {
        self.cache.local_path_for(&self.full_url(sub_path))
    }
}
