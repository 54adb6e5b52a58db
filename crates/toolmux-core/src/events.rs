//! Connection lifecycle events.
//!
//! Events are fire-and-forget notifications for observers (UIs, logs,
//! tests). They are delivered through an [`EventEmitter`](crate::ports::EventEmitter).

use serde::{Deserialize, Serialize};

/// Something that happened to the connection registry or routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerEvent {
    /// A server session was opened and registered.
    ServerConnected {
        server_id: i64,
        server_name: String,
    },

    /// A connect attempt failed. `message` is user-presentable.
    ServerFailed {
        server_id: i64,
        server_name: String,
        message: String,
    },

    /// A connection was closed and removed from the registry.
    ServerDisconnected { server_id: i64 },

    /// The routing table was rebuilt.
    ToolsRefreshed { tool_count: usize },

    /// Two servers expose the same tool name; the earlier one keeps it.
    ToolCollision {
        tool_name: String,
        kept_server_id: i64,
        rejected_server_id: i64,
    },
}

impl ManagerEvent {
    pub fn server_connected(server_id: i64, server_name: impl Into<String>) -> Self {
        Self::ServerConnected {
            server_id,
            server_name: server_name.into(),
        }
    }

    pub fn server_failed(
        server_id: i64,
        server_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ServerFailed {
            server_id,
            server_name: server_name.into(),
            message: message.into(),
        }
    }

    pub const fn server_disconnected(server_id: i64) -> Self {
        Self::ServerDisconnected { server_id }
    }

    pub const fn tools_refreshed(tool_count: usize) -> Self {
        Self::ToolsRefreshed { tool_count }
    }

    pub fn tool_collision(tool_name: impl Into<String>, kept_server_id: i64, rejected_server_id: i64) -> Self {
        Self::ToolCollision {
            tool_name: tool_name.into(),
            kept_server_id,
            rejected_server_id,
        }
    }

    /// Short event name for logs.
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::ServerConnected { .. } => "server_connected",
            Self::ServerFailed { .. } => "server_failed",
            Self::ServerDisconnected { .. } => "server_disconnected",
            Self::ToolsRefreshed { .. } => "tools_refreshed",
            Self::ToolCollision { .. } => "tool_collision",
        }
    }
}
