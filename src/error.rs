//! Error types for the proxy.
//!
//! Every error here is scoped to a single connection, a single reload
//! attempt, or startup. None of them take the running server down.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the proxy library.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The config document could not be read.
    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config document is not valid JSON for the expected schema.
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The listening socket could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The upstream TCP connection could not be established.
    #[error("Failed to connect to {host}:{port}: {source}")]
    UpstreamConnect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The upstream HTTP exchange failed.
    #[error("Upstream error: {0}")]
    Upstream(#[from] hyper::Error),

    /// A request or response could not be built.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),

    /// The upstream request target is not a valid URI.
    #[error("Invalid request target: {0}")]
    InvalidUri(#[from] hyper::http::uri::InvalidUri),

    /// The config file watcher could not be installed.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ProxyError.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_connect_display() {
        let err = ProxyError::UpstreamConnect {
            host: "old.example".to_string(),
            port: 443,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        let text = err.to_string();
        assert!(text.contains("old.example:443"));
        assert!(text.contains("refused"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let proxy_err: ProxyError = io_err.into();
        assert!(matches!(proxy_err, ProxyError::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let proxy_err: ProxyError = json_err.into();
        assert!(proxy_err.to_string().starts_with("Failed to parse config"));
    }
}
