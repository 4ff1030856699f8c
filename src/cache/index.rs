//! On-disk cache index and LRU eviction
//!
//! The directory tree is the authoritative index: other processes sharing the
//! cache root add and remove entries at any time, so every accounting
//! decision rescans the sidecars on disk instead of trusting an in-memory
//! view. Eviction walks entries oldest-first, claims each candidate with a
//! non-blocking exclusive lock, and skips anything in use or holding
//! uncommitted writes.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use super::entry::{EntryMeta, EntryState, SIDECAR_SUFFIX};
use super::lock::{LockMode, SlotLock};

/// Temp files younger than this are treated as writes still in flight by
/// another process and left alone.
const TEMP_MAX_AGE: Duration = Duration::from_secs(600);

/// One scanned slot: data path plus its sidecar record
#[derive(Debug)]
pub struct ScannedEntry {
    pub local_path: PathBuf,
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct CacheIndex {
    root: PathBuf,
}

impl CacheIndex {
    /// Open the index rooted at `root`, creating the directory and sweeping
    /// out temp files abandoned by interrupted atomic writes. Recent temp
    /// files are spared since another process may still be writing them.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let index = Self { root };
        index.sweep_temp_files(TEMP_MAX_AGE)?;
        Ok(index)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan every sidecar under the root.
    pub fn scan(&self) -> io::Result<Vec<ScannedEntry>> {
        let mut entries = Vec::new();
        for source_dir in read_dir_all(&self.root)? {
            if !source_dir.is_dir() {
                continue;
            }
            for path in read_dir_all(&source_dir)? {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some(stem) = name.strip_suffix(SIDECAR_SUFFIX) else {
                    continue;
                };
                let local_path = source_dir.join(stem);
                if let Some(meta) = EntryMeta::load(&local_path)? {
                    entries.push(ScannedEntry { local_path, meta });
                }
            }
        }
        Ok(entries)
    }

    /// Total bytes recorded across all usable entries.
    pub fn total_bytes(&self) -> io::Result<u64> {
        Ok(self.scan()?.iter().map(|e| e.meta.size_bytes).sum())
    }

    /// Evict least-recently-used entries until recorded usage fits in
    /// `max_bytes`. Returns the number of bytes reclaimed.
    ///
    /// Entries that are locked by any process, dirty, or mid-upload are
    /// skipped; going over budget is preferred to losing data.
    pub fn evict_to(&self, max_bytes: u64) -> io::Result<u64> {
        let mut entries = self.scan()?;
        let mut total: u64 = entries.iter().map(|e| e.meta.size_bytes).sum();
        if total <= max_bytes {
            return Ok(0);
        }

        entries.sort_by_key(|e| e.meta.last_access_ms);
        let mut freed = 0u64;

        for entry in entries {
            if total <= max_bytes {
                break;
            }
            if matches!(
                entry.meta.state,
                EntryState::Dirty | EntryState::Uploading
            ) {
                debug!(
                    path = %entry.local_path.display(),
                    "Skipping eviction of entry with uncommitted writes"
                );
                continue;
            }
            let claimed = match SlotLock::try_acquire(&entry.local_path, LockMode::Exclusive) {
                Ok(Some(lock)) => lock,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %entry.local_path.display(), error = %e, "Eviction lock failed");
                    continue;
                }
            };

            // Re-read under the lock: another process may have rewritten the
            // slot between the scan and the claim.
            let size = match EntryMeta::load(&entry.local_path)? {
                Some(meta) if !matches!(meta.state, EntryState::Dirty | EntryState::Uploading) => {
                    meta.size_bytes
                }
                Some(_) => {
                    drop(claimed);
                    continue;
                }
                None => 0,
            };

            self.remove_entry(&entry.local_path)?;
            drop(claimed);

            debug!(path = %entry.local_path.display(), size, "Evicted cache entry");
            total = total.saturating_sub(size);
            freed += size;
        }

        Ok(freed)
    }

    /// Delete a slot's data file and sidecar. The lock file stays: unlinking
    /// it would let a concurrent waiter lock a dead inode.
    pub fn remove_entry(&self, local_path: &Path) -> io::Result<()> {
        match std::fs::remove_file(local_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        EntryMeta::remove(local_path)
    }

    /// Remove every entry whose lock can be claimed without waiting.
    /// Returns how many entries were removed.
    pub fn purge(&self) -> io::Result<usize> {
        self.sweep_temp_files(TEMP_MAX_AGE)?;
        let mut removed = 0;
        for entry in self.scan()? {
            match SlotLock::try_acquire(&entry.local_path, LockMode::Exclusive) {
                Ok(Some(lock)) => {
                    self.remove_entry(&entry.local_path)?;
                    drop(lock);
                    removed += 1;
                }
                Ok(None) => {
                    debug!(path = %entry.local_path.display(), "Skipping purge of entry in use");
                }
                Err(e) => {
                    warn!(path = %entry.local_path.display(), error = %e, "Purge lock failed");
                }
            }
        }
        Ok(removed)
    }

    fn sweep_temp_files(&self, min_age: Duration) -> io::Result<()> {
        for source_dir in read_dir_all(&self.root)? {
            if !source_dir.is_dir() {
                continue;
            }
            for path in read_dir_all(&source_dir)? {
                let is_temp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(".tmp"));
                if !is_temp {
                    continue;
                }
                let abandoned = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok())
                    .is_some_and(|age| age >= min_age);
                if abandoned {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(())
    }
}

fn read_dir_all(dir: &Path) -> io::Result<Vec<PathBuf>> {
    match std::fs::read_dir(dir) {
        Ok(iter) => iter.map(|e| e.map(|e| e.path())).collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
