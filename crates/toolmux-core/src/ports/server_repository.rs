//! Server configuration store port.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{NewServerConfig, ServerConfig};

/// Errors reported by a configuration store.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No server with the given id.
    #[error("Server config not found: {0}")]
    NotFound(i64),

    /// A server with the same name already exists.
    #[error("Server config already exists: {0}")]
    Conflict(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Persistence for [`ServerConfig`]s.
///
/// The connection manager reads through this port on every `connect_all`
/// and never caches results beyond that call. It writes only the
/// `enabled` flag.
///
/// # Design Rules
///
/// - `name` is unique across all servers
/// - `update()` replaces the whole record, keeping `id` and `created_at`
/// - `list_enabled()` returns servers in ascending id order
#[async_trait]
pub trait ServerConfigRepository: Send + Sync {
    /// Store a new config and return it with its assigned id.
    async fn insert(&self, config: NewServerConfig) -> Result<ServerConfig, RepositoryError>;

    async fn get_by_id(&self, id: i64) -> Result<ServerConfig, RepositoryError>;

    /// All configs, ascending id.
    async fn list(&self) -> Result<Vec<ServerConfig>, RepositoryError>;

    /// Enabled configs, ascending id.
    async fn list_enabled(&self) -> Result<Vec<ServerConfig>, RepositoryError>;

    async fn update(&self, config: &ServerConfig) -> Result<(), RepositoryError>;

    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;

    /// Toggle the `enabled` flag.
    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<(), RepositoryError> {
        let mut config = self.get_by_id(id).await?;
        config.enabled = enabled;
        self.update(&config).await
    }
}
