//! Id assignment and name uniqueness shared by every store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use toolmux_core::{NewServerConfig, RepositoryError, ServerConfig};

/// The full set of stored configs plus the next id to hand out.
///
/// Ids are never reused, even after a delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Catalog {
    #[serde(default = "first_id")]
    pub next_id: i64,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

const fn first_id() -> i64 {
    1
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub const fn new() -> Self {
        Self {
            next_id: first_id(),
            servers: Vec::new(),
        }
    }

    /// Restore the ordering and id invariants after loading from disk.
    pub fn normalize(&mut self) {
        self.servers.sort_by_key(|s| s.id);
        let max_id = self.servers.last().map_or(0, |s| s.id);
        self.next_id = self.next_id.max(max_id + 1);
    }

    pub fn insert(&mut self, config: NewServerConfig) -> Result<ServerConfig, RepositoryError> {
        self.ensure_unique_name(&config.name, None)?;
        let stored = config.into_config(self.next_id, Utc::now());
        self.next_id += 1;
        self.servers.push(stored.clone());
        Ok(stored)
    }

    pub fn get(&self, id: i64) -> Result<ServerConfig, RepositoryError> {
        self.servers
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    pub fn list(&self) -> Vec<ServerConfig> {
        self.servers.clone()
    }

    pub fn list_enabled(&self) -> Vec<ServerConfig> {
        self.servers.iter().filter(|s| s.enabled).cloned().collect()
    }

    /// Replace a stored record. `id` and `created_at` always come from the
    /// existing record.
    pub fn update(&mut self, config: &ServerConfig) -> Result<(), RepositoryError> {
        self.ensure_unique_name(&config.name, Some(config.id))?;
        let slot = self
            .servers
            .iter_mut()
            .find(|s| s.id == config.id)
            .ok_or(RepositoryError::NotFound(config.id))?;
        let created_at = slot.created_at;
        *slot = ServerConfig {
            created_at,
            ..config.clone()
        };
        Ok(())
    }

    pub fn delete(&mut self, id: i64) -> Result<(), RepositoryError> {
        let before = self.servers.len();
        self.servers.retain(|s| s.id != id);
        if self.servers.len() == before {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    fn ensure_unique_name(&self, name: &str, except: Option<i64>) -> Result<(), RepositoryError> {
        let name = name.trim();
        let taken = self
            .servers
            .iter()
            .any(|s| Some(s.id) != except && s.name.trim() == name);
        if taken {
            return Err(RepositoryError::Conflict(name.to_string()));
        }
        Ok(())
    }
}
