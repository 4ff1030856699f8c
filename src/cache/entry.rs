//! Cache entry sidecar metadata
//!
//! Every cached file carries a JSON sidecar next to it recording where the
//! bytes came from, what lifecycle state the slot is in, and when it was last
//! touched. The sidecar is the durable source of truth: a slot with no
//! sidecar does not exist, whatever data file happens to be on disk.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Suffix appended to a slot's data path to form its sidecar path
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Lifecycle state of a cache slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// A download was in progress when the sidecar was written. Found under a
    /// fresh exclusive lock, it means the transfer was interrupted.
    Fetching,
    /// Data file matches the recorded remote object
    Valid,
    /// Local bytes have diverged from the remote and await commit
    Dirty,
    /// An upload was in progress; interrupted if found under a fresh lock
    Uploading,
    /// Remote changed underneath us; treat as absent on next read
    Stale,
}

/// Sidecar record for one cache slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Canonical remote reference the slot caches
    pub url: String,
    pub state: EntryState,
    /// Backend version token (ETag, generation, mtime) at fetch time
    pub remote_version: Option<String>,
    pub size_bytes: u64,
    /// Wall-clock millis since the epoch; drives LRU ordering
    pub last_access_ms: u64,
}

impl EntryMeta {
    pub fn new(url: impl Into<String>, state: EntryState) -> Self {
        Self {
            url: url.into(),
            state,
            remote_version: None,
            size_bytes: 0,
            last_access_ms: now_ms(),
        }
    }

    /// Mark the entry as used now.
    pub fn touch(&mut self) {
        self.last_access_ms = now_ms();
    }

    /// `true` when the slot can serve reads as-is.
    pub fn is_usable(&self) -> bool {
        matches!(self.state, EntryState::Valid | EntryState::Dirty)
    }

    /// Sidecar path for a slot's data path.
    pub fn sidecar_path(local_path: &Path) -> PathBuf {
        let mut os = local_path.as_os_str().to_os_string();
        os.push(SIDECAR_SUFFIX);
        PathBuf::from(os)
    }

    /// Load the sidecar for `local_path`, if a readable one exists.
    ///
    /// A missing or unparsable sidecar is reported as `None`: either way the
    /// slot has to be treated as absent and repopulated.
    pub fn load(local_path: &Path) -> io::Result<Option<Self>> {
        let path = Self::sidecar_path(local_path);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match serde_json::from_slice(&raw) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding corrupt cache sidecar");
                Ok(None)
            }
        }
    }

    /// Persist the sidecar atomically next to `local_path`.
    pub fn store(&self, local_path: &Path) -> io::Result<()> {
        let path = Self::sidecar_path(local_path);
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer(tmp.as_file(), self).map_err(io::Error::other)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Remove the sidecar for `local_path`, tolerating absence.
    pub fn remove(local_path: &Path) -> io::Result<()> {
        match std::fs::remove_file(Self::sidecar_path(local_path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let slot = dir.path().join("entry.dat");

        let mut meta = EntryMeta::new("gs://bucket/path/file.dat", EntryState::Valid);
        meta.remote_version = Some("1234".into());
        meta.size_bytes = 42;
        meta.store(&slot).unwrap();

        let loaded = EntryMeta::load(&slot).unwrap().expect("sidecar exists");
        assert_eq!(loaded.url, "gs://bucket/path/file.dat");
        assert_eq!(loaded.state, EntryState::Valid);
        assert_eq!(loaded.remote_version.as_deref(), Some("1234"));
        assert_eq!(loaded.size_bytes, 42);
    }

    #[test]
    fn missing_sidecar_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EntryMeta::load(&dir.path().join("absent.dat"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn corrupt_sidecar_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let slot = dir.path().join("entry.dat");
        std::fs::write(EntryMeta::sidecar_path(&slot), b"{not json").unwrap();
        assert!(EntryMeta::load(&slot).unwrap().is_none());
    }

    #[test]
    fn remove_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        EntryMeta::remove(&dir.path().join("never-existed.dat")).unwrap();
    }

    #[test]
    fn usable_states() {
        assert!(EntryMeta::new("u", EntryState::Valid).is_usable());
        assert!(EntryMeta::new("u", EntryState::Dirty).is_usable());
        assert!(!EntryMeta::new("u", EntryState::Fetching).is_usable());
        assert!(!EntryMeta::new("u", EntryState::Uploading).is_usable());
        assert!(!EntryMeta::new("u", EntryState::Stale).is_usable());
    }
}
