//! In-process config store.

use async_trait::async_trait;
use tokio::sync::RwLock;
use toolmux_core::{NewServerConfig, RepositoryError, ServerConfig, ServerConfigRepository};

use crate::catalog::Catalog;

/// Keeps configs in memory only. Suitable for tests and embedding hosts
/// that own persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryServerRepository {
    catalog: RwLock<Catalog>,
}

impl MemoryServerRepository {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Catalog::new()),
        }
    }

    /// Build a store pre-populated with `configs`, assigning ids in order.
    pub fn with_configs(configs: impl IntoIterator<Item = NewServerConfig>) -> Result<Self, RepositoryError> {
        let mut catalog = Catalog::new();
        for config in configs {
            catalog.insert(config)?;
        }
        Ok(Self {
            catalog: RwLock::new(catalog),
        })
    }
}

#[async_trait]
impl ServerConfigRepository for MemoryServerRepository {
    async fn insert(&self, config: NewServerConfig) -> Result<ServerConfig, RepositoryError> {
        self.catalog.write().await.insert(config)
    }

    async fn get_by_id(&self, id: i64) -> Result<ServerConfig, RepositoryError> {
        self.catalog.read().await.get(id)
    }

    async fn list(&self) -> Result<Vec<ServerConfig>, RepositoryError> {
        Ok(self.catalog.read().await.list())
    }

    async fn list_enabled(&self) -> Result<Vec<ServerConfig>, RepositoryError> {
        Ok(self.catalog.read().await.list_enabled())
    }

    async fn update(&self, config: &ServerConfig) -> Result<(), RepositoryError> {
        self.catalog.write().await.update(config)
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        self.catalog.write().await.delete(id)
    }
}
