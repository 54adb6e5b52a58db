//! Settings domain types and validation.
//!
//! Every field is optional so a partially written settings file still loads;
//! the `effective_*` accessors apply defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::MAX_TOOL_OUTPUT_CHARS;

/// Default timeout for a "test this server" connection attempt.
pub const DEFAULT_TEST_CONNECTION_TIMEOUT_SECS: u64 = 15;

/// Client name reported in the protocol handshake.
pub const DEFAULT_CLIENT_NAME: &str = "toolmux";

/// Application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Cap on flattened tool output, in characters.
    pub max_tool_output_chars: Option<usize>,

    /// Timeout applied by `test_connection`.
    pub test_connection_timeout_secs: Option<u64>,

    /// Root of the sandbox that provides command-line runtimes.
    /// `None` uses the platform default layout.
    pub sandbox_root: Option<String>,

    /// Directory holding a bundled runtime asset tree to stage locally.
    pub runtime_bundle_dir: Option<String>,

    /// Client name announced to servers.
    pub client_name: Option<String>,
}

impl Settings {
    #[must_use]
    pub const fn with_defaults() -> Self {
        Self {
            max_tool_output_chars: Some(MAX_TOOL_OUTPUT_CHARS),
            test_connection_timeout_secs: Some(DEFAULT_TEST_CONNECTION_TIMEOUT_SECS),
            sandbox_root: None,
            runtime_bundle_dir: None,
            client_name: None,
        }
    }

    pub fn effective_max_tool_output_chars(&self) -> usize {
        self.max_tool_output_chars.unwrap_or(MAX_TOOL_OUTPUT_CHARS)
    }

    pub fn effective_test_connection_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.test_connection_timeout_secs
                .unwrap_or(DEFAULT_TEST_CONNECTION_TIMEOUT_SECS),
        )
    }

    pub fn effective_client_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(DEFAULT_CLIENT_NAME)
    }

    /// Read settings from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::with_defaults());
            }
            Err(e) => return Err(SettingsError::Io(e.to_string())),
        };
        let settings: Self =
            serde_json::from_str(&raw).map_err(|e| SettingsError::Parse(e.to_string()))?;
        validate_settings(&settings)?;
        Ok(settings)
    }
}

/// Settings validation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("Max tool output must be between 256 and 1,000,000 characters, got {0}")]
    InvalidOutputCap(usize),

    #[error("Test connection timeout must be between 1 and 600 seconds, got {0}")]
    InvalidTimeout(u64),

    #[error("Sandbox root must be an absolute path, got {0:?}")]
    RelativeSandboxRoot(String),

    #[error("Failed to read settings: {0}")]
    Io(String),

    #[error("Failed to parse settings: {0}")]
    Parse(String),
}

/// Validate settings values.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    if let Some(cap) = settings.max_tool_output_chars {
        if !(256..=1_000_000).contains(&cap) {
            return Err(SettingsError::InvalidOutputCap(cap));
        }
    }

    if let Some(secs) = settings.test_connection_timeout_secs {
        if !(1..=600).contains(&secs) {
            return Err(SettingsError::InvalidTimeout(secs));
        }
    }

    if let Some(root) = settings.sandbox_root.as_deref() {
        if !Path::new(root).is_absolute() {
            return Err(SettingsError::RelativeSandboxRoot(root.to_string()));
        }
    }

    Ok(())
}
