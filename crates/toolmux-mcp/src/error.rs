//! Error types for the connection layer.

use thiserror::Error;
use toolmux_core::{ConfigError, RepositoryError};

/// Failures moving bytes over a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport not started")]
    NotStarted,

    #[error("Transport already started")]
    AlreadyStarted,

    #[error("Process is not alive")]
    ProcessDead,

    #[error("Failed to write all bytes (wrote {written} of {expected})")]
    ShortWrite { written: usize, expected: usize },

    #[error("Transport closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Failures bringing up a child process.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A runtime the command needs is not installed. The message is the
    /// user-facing remediation text.
    #[error("{0}")]
    MissingDependency(String),

    #[error("Failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("Failed to prepare runtime: {0}")]
    Bootstrap(String),
}

/// Errors surfaced by protocol sessions and the connection manager.
#[derive(Debug, Error)]
pub enum McpError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("MCP server returned error: code={code}, message={message}")]
    Server { code: i64, message: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Server not connected")]
    NotConnected,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
