//! URI resolution
//!
//! Parses raw remote references (`s3://bucket/key`, `gs://bucket/key`,
//! `http(s)://host/path`, `file:///abs/path`, or bare local paths) into a
//! normalized [`RemoteLocator`]. The normalized form is the cache key, so
//! parsing must be idempotent: re-parsing a locator's normalized form yields
//! an identical locator.

use std::fmt;
use std::path::Path;

use crate::error::CacheError;

/// Storage scheme of a remote reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    S3,
    Gs,
    Http,
    Local,
}

impl Scheme {
    /// Canonical lowercase scheme name. `https` normalizes to `http`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::S3 => "s3",
            Scheme::Gs => "gs",
            Scheme::Http => "http",
            Scheme::Local => "file",
        }
    }
}

/// A parsed and normalized remote reference
///
/// Immutable once parsed. `scheme` matching is case-insensitive; the remote
/// (bucket or host) and key are case-sensitive and preserved byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteLocator {
    scheme: Scheme,
    /// Retained for URL reconstruction; `http` and `https` references to the
    /// same host/path share one cache slot.
    secure: bool,
    /// Bucket or host name; empty for local paths
    remote: String,
    /// Object key, or the absolute path for local references
    key: String,
}

impl RemoteLocator {
    /// Parse a raw reference into a normalized locator.
    pub fn parse(raw: &str) -> Result<Self, CacheError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CacheError::MalformedReference("empty reference".into()));
        }

        let cleaned = raw.replace('\\', "/");

        let Some(idx) = cleaned.find("://") else {
            return Self::parse_local(&cleaned);
        };

        let scheme_str = cleaned[..idx].to_ascii_lowercase();
        let rest = &cleaned[idx + 3..];

        let (scheme, secure) = match scheme_str.as_str() {
            "s3" => (Scheme::S3, true),
            "gs" => (Scheme::Gs, true),
            "http" => (Scheme::Http, false),
            "https" => (Scheme::Http, true),
            "file" => return Self::parse_local(rest),
            other => {
                return Err(CacheError::MalformedReference(format!(
                    "unsupported scheme {other:?} in {raw:?}"
                )))
            }
        };

        let (remote, key) = match rest.find('/') {
            Some(0) | None => {
                return Err(CacheError::MalformedReference(format!(
                    "reference {raw:?} does not include a remote name"
                )))
            }
            Some(slash) => (&rest[..slash], &rest[slash + 1..]),
        };

        let key = Self::normalize_key(raw, key)?;

        Ok(Self {
            scheme,
            secure,
            remote: remote.to_string(),
            key,
        })
    }

    /// Parse a scheme-less or `file://` reference as a local absolute path.
    fn parse_local(path: &str) -> Result<Self, CacheError> {
        if path.is_empty() {
            return Err(CacheError::MalformedReference("empty local path".into()));
        }
        if path
            .split('/')
            .any(|seg| seg == ".." || seg == ".")
        {
            return Err(CacheError::MalformedReference(format!(
                "local path {path:?} contains relative segments"
            )));
        }
        let abs = std::path::absolute(Path::new(path))
            .map_err(|e| CacheError::MalformedReference(format!("bad local path {path:?}: {e}")))?;
        Ok(Self {
            scheme: Scheme::Local,
            secure: false,
            remote: String::new(),
            key: abs.to_string_lossy().into_owned(),
        })
    }

    /// Strip leading slashes, collapse empty segments, reject traversal.
    fn normalize_key(raw: &str, key: &str) -> Result<String, CacheError> {
        let segments: Vec<&str> = key
            .split('/')
            .filter(|seg| !seg.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(CacheError::MalformedReference(format!(
                "reference {raw:?} has an empty key"
            )));
        }
        if segments.iter().any(|seg| *seg == ".." || *seg == ".") {
            return Err(CacheError::MalformedReference(format!(
                "reference {raw:?} contains path traversal segments"
            )));
        }
        Ok(segments.join("/"))
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Bucket or host name; empty for local references
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Object key relative to the remote, or the absolute local path
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_local(&self) -> bool {
        self.scheme == Scheme::Local
    }

    /// Canonical string form; the cache key. Scheme is lowercased, the key is
    /// slash-normalized, and `https` collapses to `http` (one slot per
    /// host/path regardless of transport security).
    pub fn normalized(&self) -> String {
        match self.scheme {
            Scheme::Local => self.key.clone(),
            _ => format!("{}://{}/{}", self.scheme.as_str(), self.remote, self.key),
        }
    }

    /// Scheme plus remote, e.g. `gs://bucket` or `https://host`. Used as the
    /// backend-adapter memoization key.
    pub fn base(&self) -> String {
        match self.scheme {
            Scheme::Local => "file://".to_string(),
            Scheme::Http if self.secure => format!("https://{}", self.remote),
            _ => format!("{}://{}", self.scheme.as_str(), self.remote),
        }
    }

    /// Whether the original reference used TLS (`https`, or any cloud scheme)
    pub fn secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for RemoteLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized())
    }
}
