//! Error types for the resource proxy.
//!
//! Errors are grouped by where they originate: the connection, the supervised
//! process, the file payload codec, the upstream envelope, and authentication.
//! Only control-path errors travel through `Result`; per-file and per-part
//! failures are logged and skipped by their callers.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Message of {size} bytes exceeds the limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Process errors
    #[error("Failed to start {program}: {message}")]
    StartFailed { program: PathBuf, message: String },

    #[error("Process is not running")]
    ProcessNotRunning,

    // Codec errors
    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },

    // Envelope errors
    #[error("Invalid request envelope: {message}")]
    InvalidEnvelope { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Authentication errors
    #[error("Unauthorized")]
    Unauthorized,
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProxyError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ProxyError::ConnectionClosed,
            WsError::Capacity(e) => ProxyError::Transport {
                message: format!("capacity: {}", e),
            },
            other => ProxyError::Transport {
                message: other.to_string(),
            },
        }
    }
}

impl ProxyError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ProxyError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a transport error from anything printable.
    pub fn transport(message: impl std::fmt::Display) -> Self {
        ProxyError::Transport {
            message: message.to_string(),
        }
    }

    /// Whether this error means the peer went away, as opposed to a fault.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProxyError::ConnectionClosed | ProxyError::Timeout(_))
    }
}
