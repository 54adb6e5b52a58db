//! Domain types shared by every toolmux crate.

mod server;
mod tool;

pub use server::{ConfigError, NewServerConfig, ServerConfig, TransportKind};
pub use tool::{MAX_TOOL_OUTPUT_CHARS, TRUNCATION_MARKER, Tool, ToolCall, ToolResult};
