//! Tool server configuration types.
//!
//! A `ServerConfig` is the identity and connection recipe for one tool
//! server. Configs are created and edited by the host application and
//! persisted by a [`ServerConfigRepository`](crate::ports::ServerConfigRepository);
//! the connection layer only reads them (apart from the `enabled` flag).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the connection layer reaches a tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Local child process speaking newline-delimited JSON-RPC on stdio.
    #[default]
    Stdio,
    /// Legacy HTTP+SSE transport (GET event stream, POST to announced endpoint).
    Sse,
    /// Streamable HTTP transport (POST, JSON or event-stream replies).
    StreamableHttp,
    /// WebSocket transport, one JSON-RPC message per text frame.
    #[serde(rename = "websocket")]
    WebSocket,
}

impl TransportKind {
    /// Whether this kind connects to a URL rather than spawning a command.
    pub const fn is_remote(self) -> bool {
        !matches!(self, Self::Stdio)
    }

    /// Stable lowercase label, matching the serialized form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable_http",
            Self::WebSocket => "websocket",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "streamable_http" | "streamable-http" | "http" => Ok(Self::StreamableHttp),
            "websocket" | "ws" => Ok(Self::WebSocket),
            other => Err(ConfigError::UnknownTransport(other.to_string())),
        }
    }
}

/// A malformed server configuration.
///
/// Raised at connect time; it fails the single affected connection attempt
/// and never the whole manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Stdio server requires a command")]
    MissingCommand,

    #[error("{kind} server requires a url")]
    MissingUrl { kind: TransportKind },

    #[error("{kind} server url has an unsupported scheme: {url}")]
    UnsupportedScheme { kind: TransportKind, url: String },

    #[error("Working directory must be absolute: {0}")]
    RelativeWorkingDir(String),

    #[error("Server name cannot be empty")]
    EmptyName,

    #[error("Unknown transport kind: {0}")]
    UnknownTransport(String),

    #[error("npx package spec cannot be empty")]
    EmptyPackageSpec,
}

fn default_enabled() -> bool {
    true
}

/// A persisted tool server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Store-assigned identifier. Also the connection registry key.
    pub id: i64,

    /// Human-readable name.
    pub name: String,

    /// Transport used to reach the server.
    pub transport: TransportKind,

    /// Endpoint for remote transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Command line for stdio servers. May embed leading arguments
    /// separated by whitespace (e.g. `"npx -y some-server"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments appended after any inline arguments of `command`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the child process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Environment for the child process. Overrides resolved defaults.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Extra request headers for remote transports, passed through as-is.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Tool allow-list. `None` exposes every tool the server reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,

    /// Disabled servers are skipped by `connect_all`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// When the config was first stored.
    pub created_at: DateTime<Utc>,
}

impl ServerConfig {
    /// Check that the fields required by the transport kind are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_fields(
            &self.name,
            self.transport,
            self.url.as_deref(),
            self.command.as_deref(),
            self.working_dir.as_deref(),
        )
    }

    /// Whether `tool` passes this server's allow-list.
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|name| name == tool))
    }
}

/// A server configuration that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewServerConfig {
    pub name: String,
    pub transport: TransportKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl NewServerConfig {
    /// Stdio server launched from `command`.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            url: None,
            command: Some(command.into()),
            args,
            working_dir: None,
            env: BTreeMap::new(),
            headers: BTreeMap::new(),
            allowed_tools: None,
            enabled: true,
        }
    }

    /// Remote server reached at `url` over `transport`.
    pub fn remote(name: impl Into<String>, transport: TransportKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport,
            url: Some(url.into()),
            command: None,
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            headers: BTreeMap::new(),
            allowed_tools: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = Some(tools);
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_fields(
            &self.name,
            self.transport,
            self.url.as_deref(),
            self.command.as_deref(),
            self.working_dir.as_deref(),
        )
    }

    /// Attach an id and creation time.
    pub fn into_config(self, id: i64, created_at: DateTime<Utc>) -> ServerConfig {
        ServerConfig {
            id,
            name: self.name,
            transport: self.transport,
            url: self.url,
            command: self.command,
            args: self.args,
            working_dir: self.working_dir,
            env: self.env,
            headers: self.headers,
            allowed_tools: self.allowed_tools,
            enabled: self.enabled,
            created_at,
        }
    }
}

fn validate_fields(
    name: &str,
    transport: TransportKind,
    url: Option<&str>,
    command: Option<&str>,
    working_dir: Option<&str>,
) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::EmptyName);
    }

    if transport == TransportKind::Stdio {
        if command.is_none_or(|c| c.trim().is_empty()) {
            return Err(ConfigError::MissingCommand);
        }
        if let Some(cwd) = working_dir {
            if !cwd.is_empty() && !std::path::Path::new(cwd).is_absolute() {
                return Err(ConfigError::RelativeWorkingDir(cwd.to_string()));
            }
        }
        return Ok(());
    }

    let url = url
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(ConfigError::MissingUrl { kind: transport })?;

    let schemes: &[&str] = match transport {
        TransportKind::WebSocket => &["ws://", "wss://"],
        _ => &["http://", "https://"],
    };
    let lower = url.to_ascii_lowercase();
    if !schemes.iter().any(|s| lower.starts_with(s)) {
        return Err(ConfigError::UnsupportedScheme {
            kind: transport,
            url: url.to_string(),
        });
    }

    Ok(())
}
