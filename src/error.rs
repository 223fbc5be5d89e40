//! Structured error types for configuration loading and access.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Error kinds for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Source errors
    FileNotFound,
    ParseError,
    RemoteError,

    // Access errors
    TypeError,

    // Setup errors
    UnsupportedFormat,
    WatchError,
    ConfigError,
}

/// Errors produced by the aggregator.
#[derive(Debug, Error)]
pub enum FigiError {
    #[error("Config file not found: {}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("Remote source '{name}' failed: {message}")]
    Remote { name: String, message: String },

    #[error("Value at '{key}' is {found}, expected {expected}")]
    Type {
        key: String,
        expected: &'static str,
        found: String,
    },

    #[error("Unsupported config file extension: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0}")]
    Config(String),
}

impl FigiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FigiError::FileNotFound { .. } => ErrorKind::FileNotFound,
            FigiError::Parse { .. } => ErrorKind::ParseError,
            FigiError::Remote { .. } => ErrorKind::RemoteError,
            FigiError::Type { .. } => ErrorKind::TypeError,
            FigiError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            FigiError::Watch(_) => ErrorKind::WatchError,
            FigiError::Config(_) => ErrorKind::ConfigError,
        }
    }

    // Convenience constructors

    pub fn file_not_found(path: impl Into<PathBuf>, source: Option<std::io::Error>) -> Self {
        Self::FileNotFound {
            path: path.into(),
            source,
        }
    }

    pub fn parse(origin: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            origin: origin.into(),
            message: err.to_string(),
        }
    }

    pub fn remote(name: &str, err: impl std::fmt::Display) -> Self {
        Self::Remote {
            name: name.to_string(),
            message: err.to_string(),
        }
    }

    pub fn type_mismatch(key: &str, expected: &'static str, found: impl Into<String>) -> Self {
        Self::Type {
            key: key.to_string(),
            expected,
            found: found.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type for aggregator operations.
pub type Result<T> = std::result::Result<T, FigiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            FigiError::file_not_found("app.yaml", None).kind(),
            ErrorKind::FileNotFound
        );
        assert_eq!(
            FigiError::parse("app.yaml", "bad indent").kind(),
            ErrorKind::ParseError
        );
        assert_eq!(
            FigiError::remote("consul", "timeout").kind(),
            ErrorKind::RemoteError
        );
        assert_eq!(
            FigiError::type_mismatch("a.b", "boolean", "string \"maybe\"").kind(),
            ErrorKind::TypeError
        );
        assert_eq!(FigiError::config("nope").kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn test_messages() {
        let err = FigiError::type_mismatch("service.enabled", "boolean", "string \"maybe\"");
        assert_eq!(
            err.to_string(),
            "Value at 'service.enabled' is string \"maybe\", expected boolean"
        );

        let err = FigiError::remote("etcd", "connection refused");
        assert_eq!(err.to_string(), "Remote source 'etcd' failed: connection refused");
    }

    #[test]
    fn test_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::FileNotFound).unwrap();
        assert_eq!(json, "\"FILE_NOT_FOUND\"");
    }
}
