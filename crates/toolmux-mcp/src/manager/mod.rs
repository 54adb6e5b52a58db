//! Connection manager.
//!
//! Owns every live server connection, merges their tool catalogs into one
//! routing table and dispatches tool calls to the owning connection.
//!
//! All registry reads and writes (connect, refresh, call, disconnect) run
//! inside one async mutex. Connect attempts within a pass are sequential,
//! so a slow server delays the ones after it but never races them.

mod state;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use toolmux_core::{
    EventEmitter, ManagerEvent, ServerConfig, ServerConfigRepository, Settings, Tool, ToolCall, ToolResult,
};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::sanitize::{bounded_error, sanitize_tool_result};
use crate::session::{SessionFactory, ToolSession};

pub use state::ConnectionState;

/// A config paired with its live session.
struct Connection {
    config: ServerConfig,
    session: Arc<dyn ToolSession>,
}

#[derive(Default)]
struct Registry {
    /// Registration order; routing iterates in this order.
    connections: Vec<Connection>,
    /// Tool name to owning server id.
    routes: HashMap<String, i64>,
    tools: Vec<Tool>,
}

impl Registry {
    fn position(&self, server_id: i64) -> Option<usize> {
        self.connections.iter().position(|c| c.config.id == server_id)
    }
}

pub struct ConnectionManager {
    repository: Arc<dyn ServerConfigRepository>,
    sessions: Arc<dyn SessionFactory>,
    emitter: Arc<dyn EventEmitter>,
    settings: Settings,
    registry: Mutex<Registry>,
    state_tx: watch::Sender<ConnectionState>,
    tools_tx: watch::Sender<Vec<Tool>>,
}

impl ConnectionManager {
    pub fn new(
        repository: Arc<dyn ServerConfigRepository>,
        sessions: Arc<dyn SessionFactory>,
        emitter: Arc<dyn EventEmitter>,
        settings: Settings,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        let (tools_tx, _) = watch::channel(Vec::new());
        Self {
            repository,
            sessions,
            emitter,
            settings,
            registry: Mutex::new(Registry::default()),
            state_tx,
            tools_tx,
        }
    }

    /// Live view of connection progress.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Live view of the merged tool catalog.
    pub fn available_tools(&self) -> watch::Receiver<Vec<Tool>> {
        self.tools_tx.subscribe()
    }

    /// Current catalog snapshot.
    pub fn tools(&self) -> Vec<Tool> {
        self.tools_tx.borrow().clone()
    }

    /// Ids of connected servers, in registration order.
    pub async fn connected_server_ids(&self) -> Vec<i64> {
        let registry = self.registry.lock().await;
        registry.connections.iter().map(|c| c.config.id).collect()
    }

    /// Which server currently owns `tool_name`.
    pub async fn route_for(&self, tool_name: &str) -> Option<i64> {
        self.registry.lock().await.routes.get(tool_name).copied()
    }

    /// Connect every enabled server, then rebuild the routing table.
    ///
    /// Each server is attempted on its own; a failure is recorded in the
    /// returned state and never stops the pass. Connections to servers that
    /// are no longer enabled are closed. Unless `force_refresh` is set, live
    /// connections whose config is unchanged are kept.
    pub async fn connect_all(&self, force_refresh: bool) -> Result<ConnectionState, McpError> {
        let mut registry = self.registry.lock().await;
        let mut configs = self.repository.list_enabled().await?;
        configs.sort_by_key(|c| c.id);

        let stale: Vec<i64> = registry
            .connections
            .iter()
            .map(|c| c.config.id)
            .filter(|id| !configs.iter().any(|c| c.id == *id))
            .collect();
        for id in stale {
            self.remove_connection(&mut registry, id).await;
        }

        self.state_tx
            .send_modify(|s| s.begin_pass(configs.len(), registry.connections.len()));
        info!(server_count = configs.len(), force_refresh, "Connecting MCP servers");

        for config in configs {
            let reusable = registry
                .position(config.id)
                .map(|i| &registry.connections[i])
                .is_some_and(|c| c.config == config && c.session.is_alive());
            if reusable && !force_refresh {
                debug!(server_id = config.id, server_name = %config.name, "Keeping live connection");
                self.state_tx.send_modify(|s| s.record_success(config.id));
                continue;
            }

            let server_id = config.id;
            match self.open_connection(&mut registry, config).await {
                Ok(()) => self.state_tx.send_modify(|s| {
                    s.record_success(server_id);
                    s.connected_servers = registry.connections.len();
                }),
                Err(e) => {
                    let message = e.to_string();
                    self.state_tx.send_modify(|s| s.record_failure(server_id, message));
                }
            }
        }

        self.rebuild_routes(&mut registry).await;
        let connected = registry.connections.len();
        drop(registry);

        self.state_tx.send_modify(|s| s.finish_pass(connected));
        let state = self.state_tx.borrow().clone();
        info!(
            connected = state.connected_servers,
            failed = state.failed_servers,
            tool_count = self.tools_tx.borrow().len(),
            "MCP connect pass finished"
        );
        Ok(state)
    }

    /// Connect one server and rebuild routing. An existing connection with
    /// the same id is closed first. Disabled configs are skipped.
    pub async fn connect(&self, config: &ServerConfig) -> Result<(), McpError> {
        config.validate()?;
        if !config.enabled {
            debug!(server_id = config.id, server_name = %config.name, "Skipping disabled server");
            return Ok(());
        }

        let mut registry = self.registry.lock().await;
        let result = self.open_connection(&mut registry, config.clone()).await;
        if let Err(e) = &result {
            let message = e.to_string();
            self.state_tx.send_modify(|s| {
                s.last_error = Some(message.clone());
                s.server_errors.insert(config.id, message);
            });
        }
        self.rebuild_routes(&mut registry).await;
        let connected = registry.connections.len();
        self.state_tx.send_modify(|s| {
            if result.is_ok() {
                s.server_errors.remove(&config.id);
            }
            s.connected_servers = connected;
        });
        result
    }

    /// Rebuild the routing table from the current connections.
    pub async fn refresh_tools(&self) -> Vec<Tool> {
        let mut registry = self.registry.lock().await;
        self.rebuild_routes(&mut registry).await;
        registry.tools.clone()
    }

    /// Invoke a tool on the server that owns it. Never fails: every problem
    /// is reported as an error result.
    pub async fn call_tool(&self, call: &ToolCall) -> ToolResult {
        let registry = self.registry.lock().await;
        let cap = self.settings.effective_max_tool_output_chars();

        let Some(&server_id) = registry.routes.get(&call.name) else {
            warn!(tool = %call.name, "No server provides tool");
            return bounded_error(call, &format!("No server provides tool: {}", call.name), cap);
        };
        let Some(connection) = registry
            .position(server_id)
            .map(|i| &registry.connections[i])
            .filter(|c| c.session.is_alive())
        else {
            warn!(tool = %call.name, server_id, "Tool owner is not connected");
            return bounded_error(call, &McpError::NotConnected.to_string(), cap);
        };

        debug!(tool = %call.name, server_id, call_id = %call.id, "Calling tool");
        match connection.session.call_tool(&call.name, call.arguments.clone()).await {
            Ok(result) => {
                let output = sanitize_tool_result(&result, cap);
                if result.is_error {
                    ToolResult::failed_with_output(call, output)
                } else {
                    ToolResult::success(call, output)
                }
            }
            Err(e) => {
                warn!(tool = %call.name, server_id, error = %e, "Tool call failed");
                bounded_error(call, &e.to_string(), cap)
            }
        }
    }

    /// Close one server's connection. Returns whether it was connected.
    ///
    /// Its routes stay in place until the next rebuild, so calls to its
    /// tools report "Server not connected" instead of an unknown tool.
    pub async fn disconnect(&self, server_id: i64) -> bool {
        let mut registry = self.registry.lock().await;
        let removed = self.remove_connection(&mut registry, server_id).await;
        let connected = registry.connections.len();
        self.state_tx.send_modify(|s| s.connected_servers = connected);
        removed
    }

    /// Close every connection, clear the registry and routing table, and
    /// release shared transport resources.
    pub async fn disconnect_all(&self) {
        let mut registry = self.registry.lock().await;
        let connections = std::mem::take(&mut registry.connections);
        registry.routes.clear();
        registry.tools.clear();

        for connection in connections {
            connection.session.close().await;
            info!(server_id = connection.config.id, server_name = %connection.config.name, "Disconnected MCP server");
            self.emitter.emit(ManagerEvent::server_disconnected(connection.config.id));
        }
        self.sessions.release().await;
        drop(registry);

        self.tools_tx.send_replace(Vec::new());
        self.state_tx.send_replace(ConnectionState::default());
    }

    /// Persist a server's enabled flag. Disabling disconnects it; enabling
    /// connects it.
    pub async fn set_enabled(&self, server_id: i64, enabled: bool) -> Result<(), McpError> {
        self.repository.set_enabled(server_id, enabled).await?;
        if enabled {
            let config = self.repository.get_by_id(server_id).await?;
            self.connect(&config).await
        } else {
            if self.disconnect(server_id).await {
                self.refresh_tools().await;
            }
            Ok(())
        }
    }

    /// Open a throwaway session to `config` and report how many tools it
    /// offers. Bounded by the configured test timeout; the registry is not
    /// touched.
    pub async fn test_connection(&self, config: &ServerConfig) -> Result<usize, McpError> {
        config.validate()?;
        let limit = self.settings.effective_test_connection_timeout();
        let attempt = async {
            let session = self.sessions.open(config).await?;
            let tools = session.list_tools().await;
            session.close().await;
            tools.map(|t| t.iter().filter(|d| config.allows_tool(&d.name)).count())
        };
        match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                warn!(server_name = %config.name, timeout = ?limit, "Connection test timed out");
                Err(McpError::Timeout(limit))
            }
        }
    }

    /// Open a session for `config` and register it, replacing (in place)
    /// any connection with the same id.
    async fn open_connection(&self, registry: &mut Registry, config: ServerConfig) -> Result<(), McpError> {
        let existing = registry.position(config.id);
        if let Some(index) = existing {
            registry.connections[index].session.close().await;
        }

        let opened = match config.validate() {
            Ok(()) => self.sessions.open(&config).await,
            Err(e) => Err(e.into()),
        };
        let session = match opened {
            Ok(session) => session,
            Err(e) => {
                if let Some(index) = existing {
                    registry.connections.remove(index);
                }
                warn!(server_id = config.id, server_name = %config.name, error = %e, "Failed to connect MCP server");
                self.emitter
                    .emit(ManagerEvent::server_failed(config.id, config.name.clone(), e.to_string()));
                return Err(e);
            }
        };

        info!(server_id = config.id, server_name = %config.name, transport = %config.transport, "Connected MCP server");
        self.emitter
            .emit(ManagerEvent::server_connected(config.id, config.name.clone()));
        let connection = Connection { config, session };
        match existing {
            Some(index) => registry.connections[index] = connection,
            None => registry.connections.push(connection),
        }
        Ok(())
    }

    async fn remove_connection(&self, registry: &mut Registry, server_id: i64) -> bool {
        let Some(index) = registry.position(server_id) else {
            return false;
        };
        let connection = registry.connections.remove(index);
        connection.session.close().await;
        info!(server_id, server_name = %connection.config.name, "Disconnected MCP server");
        self.emitter.emit(ManagerEvent::server_disconnected(server_id));
        true
    }

    /// Re-derive the routing table. Connections are visited in registration
    /// order and the first to claim a name keeps it.
    async fn rebuild_routes(&self, registry: &mut Registry) {
        let Registry {
            connections,
            routes,
            tools,
        } = registry;
        routes.clear();
        tools.clear();

        for connection in connections.iter() {
            let server_id = connection.config.id;
            let definitions = match connection.session.list_tools().await {
                Ok(definitions) => definitions,
                Err(e) => {
                    warn!(server_id, server_name = %connection.config.name, error = %e, "Failed to list tools");
                    continue;
                }
            };

            for definition in definitions {
                if !connection.config.allows_tool(&definition.name) {
                    continue;
                }
                match routes.entry(definition.name.clone()) {
                    Entry::Occupied(owner) if *owner.get() == server_id => {
                        debug!(server_id, tool = %definition.name, "Server listed a tool twice");
                    }
                    Entry::Occupied(owner) => {
                        let kept = *owner.get();
                        warn!(
                            tool = %definition.name,
                            kept_server_id = kept,
                            rejected_server_id = server_id,
                            "Tool name collision; keeping first registered server"
                        );
                        self.emitter
                            .emit(ManagerEvent::tool_collision(definition.name.clone(), kept, server_id));
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(server_id);
                        tools.push(Tool::from_definition(
                            definition.name,
                            definition.description,
                            definition.input_schema.as_ref(),
                        ));
                    }
                }
            }
        }

        debug!(tool_count = tools.len(), "Rebuilt tool routing table");
        self.emitter.emit(ManagerEvent::tools_refreshed(tools.len()));
        self.tools_tx.send_replace(tools.clone());
    }
}

#[cfg(test)]
mod tests;
