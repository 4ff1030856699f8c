//! Backend error types
//!
//! Structured failures for backend transport operations. Maps HTTP status
//! codes and I/O errors to variants so the retry layer can distinguish
//! transient failures from fatal ones.

/// Backend transport errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("rate limited")]
    RateLimited,

    #[error("request timeout")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("server error ({0}): {1}")]
    Server(u16, String),

    #[error("request error: {0}")]
    Request(String),

    #[error("operation not supported by this backend")]
    Unsupported,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited
                | BackendError::Timeout
                | BackendError::Network(_)
                | BackendError::Server(_, _)
        )
    }

    /// Create a BackendError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => BackendError::PermissionDenied(body.to_string()),
            404 | 410 => BackendError::NotFound(body.to_string()),
            408 => BackendError::Timeout,
            429 => BackendError::RateLimited,
            500..=599 => BackendError::Server(status, body.to_string()),
            _ => BackendError::Request(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Create a BackendError from a reqwest transport failure
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_connect() {
            BackendError::Network(err.to_string())
        } else {
            BackendError::Request(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            BackendError::from_status(404, "gone"),
            BackendError::NotFound(_)
        ));
        assert!(matches!(
            BackendError::from_status(403, "no"),
            BackendError::PermissionDenied(_)
        ));
        assert!(matches!(
            BackendError::from_status(503, "busy"),
            BackendError::Server(503, _)
        ));
        assert!(matches!(
            BackendError::from_status(418, "teapot"),
            BackendError::Request(_)
        ));
    }

    #[test]
    fn retryability() {
        assert!(BackendError::RateLimited.is_retryable());
        assert!(BackendError::Timeout.is_retryable());
        assert!(BackendError::Server(500, String::new()).is_retryable());
        assert!(BackendError::Network("refused".into()).is_retryable());
        assert!(!BackendError::NotFound("x".into()).is_retryable());
        assert!(!BackendError::PermissionDenied("x".into()).is_retryable());
        assert!(!BackendError::Unsupported.is_retryable());
    }
}
