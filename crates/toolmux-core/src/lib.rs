//! Core domain types and ports for toolmux.
//!
//! This crate has no transport or storage code. It defines the shapes that
//! flow between the connection layer (`toolmux-mcp`), configuration stores
//! (`toolmux-store`) and front-ends:
//!
//! - [`domain`]: server configs, tools, tool calls and results
//! - [`ports`]: the config store and event emitter traits
//! - [`events`]: connection lifecycle events
//! - [`settings`] and [`paths`]: configuration and on-disk layout

#![deny(unsafe_code)]

pub mod domain;
pub mod events;
pub mod paths;
pub mod ports;
pub mod settings;

pub use domain::{
    ConfigError, MAX_TOOL_OUTPUT_CHARS, NewServerConfig, ServerConfig, TRUNCATION_MARKER, Tool,
    ToolCall, ToolResult, TransportKind,
};
pub use events::ManagerEvent;
#[cfg(any(test, feature = "test-utils"))]
pub use ports::RecordingEmitter;
pub use ports::{EventEmitter, NoopEmitter, RepositoryError, ServerConfigRepository};
pub use settings::{Settings, SettingsError};
