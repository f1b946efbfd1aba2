//! Error types for the log server.
//!
//! Per-message and per-connection errors are logged and contained by the
//! connection handler. Only `ServerError` and `ConfigError` are fatal, and
//! only at startup.

use std::path::PathBuf;
use thiserror::Error;

/// An inbound frame could not be parsed as JSON.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("binary frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// A frame parsed as JSON but its fields have an unexpected shape.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FieldExtractionError {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("field '{field}' must be {expected}, got {found}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

/// Appending a line to a daily log file failed.
#[derive(Error, Debug)]
#[error("failed to append to '{}': {source}", .path.display())]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Fatal startup errors of the listener.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to create log directory '{}': {source}", .path.display())]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve '{address}': {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("address '{0}' did not resolve to any socket address")]
    NoAddress(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_messages() {
        let err = FieldExtractionError::NotAnObject("array");
        assert_eq!(err.to_string(), "expected a JSON object, got array");

        let err = FieldExtractionError::WrongType {
            field: "args",
            expected: "an array",
            found: "string",
        };
        assert_eq!(err.to_string(), "field 'args' must be an array, got string");
    }

    #[test]
    fn test_write_error_mentions_path() {
        let err = WriteError {
            path: PathBuf::from("/nonexistent/console-2026-01-01.log"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("console-2026-01-01.log"));
        assert!(msg.contains("denied"));
    }
}
