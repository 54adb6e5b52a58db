//! MCP tool-server connections for toolmux.
//!
//! Layers, leaves first:
//!
//! - [`process`]: spawn a child with piped stdio, signal it, wait for it
//! - [`resolver`]: map bare command names to sandbox runtimes and build
//!   their environment
//! - [`runtime`]: stage a bundled runtime and rewrite `npx` launches
//! - [`transport`]: stdio, SSE, streamable HTTP and WebSocket channels
//! - [`client`] / [`session`]: the MCP handshake and `tools/*` requests
//! - [`manager`]: the connection registry and tool routing table

#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod process;
pub mod resolver;
pub mod runtime;
pub mod sanitize;
pub mod session;
pub mod transport;

pub use client::{CallToolResult, ContentBlock, McpClient, ToolDefinition};
pub use error::{McpError, SpawnError, TransportError};
pub use manager::{ConnectionManager, ConnectionState};
pub use resolver::{EnvironmentResolver, SandboxLayout};
pub use runtime::{RuntimeBundle, RuntimeContext};
pub use sanitize::{sanitize_tool_result, truncate_output};
pub use session::{McpSessionFactory, SessionFactory, ToolSession};
pub use transport::{Transport, TransportEvent};

// Re-export domain types from core for convenience
pub use toolmux_core::{ServerConfig, Tool, ToolCall, ToolResult, TransportKind};
