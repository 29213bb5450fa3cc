//! Error taxonomy shared across the fetch and clone paths
//!
//! Background tasks never let these escape as panics; every variant becomes
//! terminal session or job state that the consumer observes on the event
//! stream. `anyhow` is only used at the CLI boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while talking to the repository list API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The requested owner (user or organization) does not exist.
    #[error("GitHub user or organization '{0}' not found")]
    NotFound(String),

    /// Authentication was rejected (invalid or missing token).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The API quota for the current window is exhausted.
    #[error("API rate limit reached, resets at epoch {reset_epoch}")]
    RateLimited { reset_epoch: u64 },

    /// Transport-level failure (DNS, connect, timeout, 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be parsed as the expected shape.
    #[error("malformed API response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Transient errors are retried inside the fetcher; everything else is
    /// terminal for the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

/// Classified category of a failed (or degenerate) clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneFailureKind {
    /// The remote repository does not exist (deleted or never existed).
    RepoNotFound,
    /// Access was denied: private repository, revoked credentials, or a
    /// takedown. Carries a policy pointer in the job detail text.
    AccessDenied,
    /// The clone succeeded but the repository has no commits.
    EmptyRepository,
    /// The remote refused the operation due to rate limiting.
    RateLimited,
    /// Transport failure, including enforced clone timeouts.
    NetworkError,
    /// Nonzero exit that matched no known rule; detail keeps the raw text.
    Unknown,
}

impl CloneFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneFailureKind::RepoNotFound => "repository not found",
            CloneFailureKind::AccessDenied => "access denied",
            CloneFailureKind::EmptyRepository => "empty repository",
            CloneFailureKind::RateLimited => "rate limited",
            CloneFailureKind::NetworkError => "network error",
            CloneFailureKind::Unknown => "unknown error",
        }
    }
}

impl std::fmt::Display for CloneFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by a clone job.
#[derive(Debug, Clone, Error)]
pub enum CloneError {
    /// The destination already exists and is not empty, or another running
    /// job already claimed it. The subprocess is never spawned.
    #[error("destination '{}' already exists or is in use", .0.display())]
    ConflictingDestination(PathBuf),

    /// The subprocess ran and failed; `detail` is the human-readable reason.
    #[error("{kind}: {detail}")]
    Classified {
        kind: CloneFailureKind,
        detail: String,
    },
}

impl CloneError {
    pub fn classified(kind: CloneFailureKind, detail: impl Into<String>) -> Self {
        CloneError::Classified {
            kind,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::Network("connection reset".into()).is_transient());
        assert!(!ApiError::NotFound("ghost".into()).is_transient());
        assert!(!ApiError::RateLimited { reset_epoch: 0 }.is_transient());
        assert!(!ApiError::Unauthorized("bad token".into()).is_transient());
        assert!(!ApiError::Malformed("not json".into()).is_transient());
    }

    #[test]
    fn test_clone_error_display() {
        let err = CloneError::classified(CloneFailureKind::AccessDenied, "403 forbidden");
        assert_eq!(err.to_string(), "access denied: 403 forbidden");

        let err = CloneError::ConflictingDestination(PathBuf::from("/tmp/repo"));
        assert!(err.to_string().contains("/tmp/repo"));
    }
}
