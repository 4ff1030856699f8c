//! Cross-process slot locking
//!
//! Advisory `flock(2)` locks keyed by a cache slot's local path plus a fixed
//! suffix, so every thread and every process sharing a cache directory
//! participates in the same arbitration domain. Each guard opens its own file
//! description, which makes flock arbitrate between threads as well as
//! between processes, and the kernel drops a crashed holder's lock when its
//! descriptors close, so no staleness heuristics are needed.
//!
//! Acquisition is a non-blocking try in a sleep loop bounded by the caller's
//! timeout, so a waiting task never pins an OS thread and a timed-out wait
//! leaves nothing behind but the empty lock file.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::CacheError;

/// Suffix appended to a slot's local path to form its lock file
pub const LOCK_SUFFIX: &str = ".lock";

/// How often a blocked waiter re-tries the lock
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lock compatibility level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Compatible with other shared holders; used by readers
    Shared,
    /// Excludes all other holders; used by fetch, write, and upload
    Exclusive,
}

/// Guard holding an advisory lock on one cache slot.
///
/// The lock is released when the guard is dropped, on every exit path.
#[derive(Debug)]
pub struct SlotLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl SlotLock {
    /// Lock file path for a slot's local data path.
    pub fn lock_path(local_path: &Path) -> PathBuf {
        let mut os = local_path.as_os_str().to_os_string();
        os.push(LOCK_SUFFIX);
        PathBuf::from(os)
    }

    /// Acquire the lock, waiting up to `timeout` for contested slots.
    pub async fn acquire(
        local_path: &Path,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Self, CacheError> {
        let path = Self::lock_path(local_path);
        let file = Self::open_lock_file(&path)?;
        let deadline = Instant::now() + timeout;

        loop {
            match Self::try_flock(&file, mode) {
                Ok(()) => {
                    trace!(path = %path.display(), ?mode, "Acquired slot lock");
                    return Ok(Self { file, path, mode });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(CacheError::LockTimeout {
                            path,
                            waited: timeout,
                        });
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Try to acquire without waiting. `Ok(None)` means the slot is contested.
    pub fn try_acquire(local_path: &Path, mode: LockMode) -> Result<Option<Self>, CacheError> {
        let path = Self::lock_path(local_path);
        let file = Self::open_lock_file(&path)?;
        match Self::try_flock(&file, mode) {
            Ok(()) => Ok(Some(Self { file, path, mode })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Convert an exclusive lock to shared.
    ///
    /// flock does not guarantee atomic conversion: the kernel may release the
    /// lock before granting the new mode, letting a pending exclusive waiter
    /// in between. Callers must therefore re-validate slot state after the
    /// downgrade completes.
    pub async fn downgrade_to_shared(&mut self) -> io::Result<()> {
        loop {
            match Self::try_flock(&self.file, LockMode::Shared) {
                Ok(()) => {
                    self.mode = LockMode::Shared;
                    trace!(path = %self.path.display(), "Downgraded slot lock to shared");
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    fn open_lock_file(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    fn try_flock(file: &File, mode: LockMode) -> io::Result<()> {
        let arg = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        } | libc::LOCK_NB;

        // SAFETY: the descriptor comes from `file`, which outlives the call
        // and is not closed or moved while the flock runs.
        let rc = unsafe { libc::flock(file.as_raw_fd(), arg) };
        if rc != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Drop for SlotLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the flock; the explicit unlock just
        // makes release prompt even if the File lingers.
        // SAFETY: the descriptor is valid until `self.file` is dropped.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        trace!(path = %self.path.display(), "Released slot lock");
    }
}
