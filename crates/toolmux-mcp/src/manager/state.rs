//! Observable connection progress.

use std::collections::BTreeMap;

use serde::Serialize;

/// Snapshot of the manager's connection activity, published on a watch
/// channel after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    /// A connect pass is running.
    pub is_connecting: bool,
    /// Servers still waiting in the current pass.
    pub connecting_count: usize,
    /// Servers the current (or last) pass set out to connect.
    pub total_servers: usize,
    pub attempted_servers: usize,
    /// Live connections in the registry.
    pub connected_servers: usize,
    pub failed_servers: usize,
    pub last_error: Option<String>,
    /// Latest failure message per server id.
    pub server_errors: BTreeMap<i64, String>,
}

impl ConnectionState {
    /// Reset the counters for a pass over `total` servers. Connections kept
    /// from earlier passes stay counted.
    pub(super) fn begin_pass(&mut self, total: usize, connected: usize) {
        *self = Self {
            is_connecting: true,
            connecting_count: total,
            total_servers: total,
            connected_servers: connected,
            ..Self::default()
        };
    }

    pub(super) fn record_success(&mut self, server_id: i64) {
        self.attempted_servers += 1;
        self.connecting_count = self.connecting_count.saturating_sub(1);
        self.server_errors.remove(&server_id);
    }

    pub(super) fn record_failure(&mut self, server_id: i64, message: String) {
        self.attempted_servers += 1;
        self.failed_servers += 1;
        self.connecting_count = self.connecting_count.saturating_sub(1);
        self.last_error = Some(message.clone());
        self.server_errors.insert(server_id, message);
    }

    pub(super) fn finish_pass(&mut self, connected: usize) {
        self.is_connecting = false;
        self.connecting_count = 0;
        self.connected_servers = connected;
    }

    pub fn has_failures(&self) -> bool {
        !self.server_errors.is_empty()
    }
}
