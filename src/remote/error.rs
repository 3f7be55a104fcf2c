//! Error types for remote data client calls.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by a [`super::RemoteDataClient`].
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The call did not complete within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote could not be reached at all
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// A row with the same identifier already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Error envelope returned by the remote store
    #[error("API error ({status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RemoteError {
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Network-class failures that say nothing about the payload itself.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            Self::Timeout(_) | Self::Unavailable(_) => true,
            Self::Api { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Self::Conflict(_) | Self::Decode(_) => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(RemoteError::Unavailable("offline".into()).is_transient());
        assert!(RemoteError::api(503, "INTERNAL_ERROR", "down").is_transient());
        assert!(RemoteError::api(429, "RATE_LIMITED", "slow down").is_transient());
        assert!(!RemoteError::api(400, "VALIDATION_ERROR", "bad").is_transient());
        assert!(!RemoteError::Conflict("exists".into()).is_transient());
    }

    #[test]
    fn test_conflict_detection() {
        assert!(RemoteError::Conflict("r1".into()).is_conflict());
        assert!(!RemoteError::api(409, "CONFLICT", "r1").is_conflict());
    }
}
