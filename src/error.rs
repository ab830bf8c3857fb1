//! Error types for rpmbrowse
//!
//! All modules use `CacheResult<T>` as their return type. The error is
//! `Clone` so that a failed in-flight load can be handed to every caller
//! waiting on it.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for rpmbrowse operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Coarse classification of a [`CacheError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unsafe package filename
    InvalidIdentifier,
    /// Declared or observed download size over the cap
    SizeLimitExceeded,
    /// Network or upstream status failure
    UpstreamFetch,
    /// External packaging tool failure
    Extraction,
    /// Resolved path escapes the package root
    PathTraversal,
    /// Path legitimately absent inside a package
    NotFound,
    /// Everything else (io, config, internal)
    Other,
}

/// All errors that can occur in rpmbrowse
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    // Identifier errors
    #[error("Invalid package identifier {filename:?}: {reason}")]
    InvalidIdentifier { filename: String, reason: String },

    // Fetch errors
    #[error("{url} size {size} exceeds limit {limit}")]
    SizeLimitExceeded { url: String, size: u64, limit: u64 },

    #[error("Upstream returned HTTP {status} for {url}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("Upstream request to {url} failed: {reason}")]
    Upstream { url: String, reason: String },

    // Extraction errors
    #[error("Extraction command failed: {command} ({status}), stderr: {stderr}")]
    Extraction {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    // Path errors
    #[error("Insecure path: {path} escapes {root}")]
    PathTraversal { root: PathBuf, path: String },

    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Command failed to start: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source: Arc::new(source),
        }
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            filename: filename.into(),
            reason: reason.into(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            Self::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
            Self::UpstreamStatus { .. } | Self::Upstream { .. } => ErrorKind::UpstreamFetch,
            Self::Extraction { .. } | Self::CommandFailed { .. } => ErrorKind::Extraction,
            Self::PathTraversal { .. } => ErrorKind::PathTraversal,
            Self::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { .. } | Self::Timeout { .. } => true,
            Self::UpstreamStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidIdentifier { .. } => {
                Some("Expected NAME-VERSION-RELEASE.ARCH.rpm, e.g. strace-4.12-1.fc24.x86_64.rpm")
            }
            Self::UpstreamStatus { status: 404, .. } => {
                Some("Check the package exists upstream and the upstream.url_template setting")
            }
            Self::SizeLimitExceeded { .. } => Some("Raise cache.rpm_size_limit in the config"),
            Self::CommandFailed { .. } => {
                Some("Install the packaging tools: sudo dnf install rpm-build cpio")
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

impl From<toml::ser::Error> for CacheError {
    fn from(e: toml::ser::Error) -> Self {
        Self::TomlSerialize(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CacheError::UpstreamStatus {
            url: "https://example.test/a.rpm".to_string(),
            status: 404,
        };
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[test]
    fn error_hint() {
        let err = CacheError::invalid_identifier("not-an-rpm", "no match");
        assert!(err.hint().unwrap().contains("NAME-VERSION-RELEASE"));
        assert_eq!(CacheError::Internal("x".into()).hint(), None);
    }

    #[test]
    fn error_kind_separates_security_from_missing() {
        let traversal = CacheError::PathTraversal {
            root: PathBuf::from("/cache/a.rpm"),
            path: "../etc".to_string(),
        };
        let missing = CacheError::NotFound(PathBuf::from("/cache/a.rpm/nope"));
        assert_eq!(traversal.kind(), ErrorKind::PathTraversal);
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn error_retryable() {
        let server = CacheError::UpstreamStatus {
            url: String::new(),
            status: 503,
        };
        let missing = CacheError::UpstreamStatus {
            url: String::new(),
            status: 404,
        };
        assert!(server.is_retryable());
        assert!(!missing.is_retryable());
    }

    #[test]
    fn io_error_is_cloneable() {
        let err = CacheError::io("reading", std::io::Error::other("boom"));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
