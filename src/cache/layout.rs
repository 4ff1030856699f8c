//! Cache directory layout
//!
//! Maps remote references to stable local paths. Each remote source gets a
//! subdirectory named after its scheme and host (`gs://bucket` becomes
//! `gs_bucket`), and each object inside it gets a file named from a digest of
//! the canonical reference plus a sanitized basename, so paths stay short,
//! filesystem-safe, and collision-free while remaining recognizable.

use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::uri::RemoteLocator;

/// Digest prefix length used in slot file names
const DIGEST_LEN: usize = 16;

/// Longest basename suffix carried into a slot file name
const BASENAME_MAX: usize = 64;

#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local data path for a remote reference.
    ///
    /// Deterministic across processes and insensitive to the http/https
    /// distinction, so every client sharing a cache root agrees on one slot
    /// per object.
    pub fn local_path(&self, locator: &RemoteLocator) -> PathBuf {
        let key = locator.normalized();
        let digest = Sha1::digest(key.as_bytes());
        let mut hex = String::with_capacity(DIGEST_LEN);
        for byte in digest.iter().take(DIGEST_LEN / 2) {
            hex.push_str(&format!("{byte:02x}"));
        }

        let basename = sanitize(truncated_basename(locator.key()));
        self.root
            .join(source_dir(locator))
            .join(format!("{hex}-{basename}"))
    }
}

/// Per-source subdirectory name, e.g. `gs_bucket` or `http_example.com`.
fn source_dir(locator: &RemoteLocator) -> String {
    format!("{}_{}", locator.scheme().as_str(), sanitize(locator.remote()))
}

fn truncated_basename(key: &str) -> &str {
    let base = key.rsplit('/').next().unwrap_or(key);
    if base.len() <= BASENAME_MAX {
        return base;
    }
    // Keep the tail: extensions matter more than prefixes
    let mut start = base.len() - BASENAME_MAX;
    while !base.is_char_boundary(start) {
        start += 1;
    }
    &base[start..]
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
