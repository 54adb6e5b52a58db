//! CLI error types and exit-code mapping.

use thiserror::Error;
use toolmux_core::{ConfigError, RepositoryError, SettingsError};
use toolmux_core::paths::PathError;
use toolmux_mcp::McpError;

#[derive(Debug, Error)]
pub enum CliError {
    /// Argument parsing or validation error.
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Config store error.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Connecting to or talking with a tool server failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The tool ran but reported failure.
    #[error("Tool failed: {0}")]
    ToolFailed(String),
}

impl CliError {
    /// Map error to an exit code (sysexits.h where one fits).
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ToolFailed(_) => 1,
            Self::Arguments(_) => 64,  // EX_USAGE
            Self::NotFound(_) => 66,   // EX_NOINPUT
            Self::Connection(_) => 69, // EX_UNAVAILABLE
            Self::Store(_) => 73,      // EX_CANTCREAT
            Self::Io(_) => 74,         // EX_IOERR
            Self::Config(_) => 78,     // EX_CONFIG
        }
    }
}

impl From<RepositoryError> for CliError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::NotFound(format!("server {id}")),
            RepositoryError::Conflict(name) => {
                Self::Arguments(format!("a server named '{name}' already exists"))
            }
            RepositoryError::Internal(msg) => Self::Store(msg),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Arguments(err.to_string())
    }
}

impl From<SettingsError> for CliError {
    fn from(err: SettingsError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<PathError> for CliError {
    fn from(err: PathError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<McpError> for CliError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Config(e) => e.into(),
            McpError::Repository(e) => e.into(),
            other => Self::Connection(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Exit code for an error returned from a handler.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>().map_or(1, CliError::exit_code)
}
