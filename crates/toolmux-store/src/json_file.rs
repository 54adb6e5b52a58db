//! JSON-file config store.
//!
//! The whole catalog is held in memory and rewritten on every change.
//! Environment values are base64 encoded on disk so secrets are not
//! readable at a glance (encoding, not encryption).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::RwLock;
use toolmux_core::{NewServerConfig, RepositoryError, ServerConfig, ServerConfigRepository};

use crate::catalog::Catalog;

/// Config store backed by a single JSON document (normally `servers.json`).
#[derive(Debug)]
pub struct JsonFileServerRepository {
    path: PathBuf,
    catalog: RwLock<Catalog>,
}

impl JsonFileServerRepository {
    /// Load the store at `path`. A missing file starts an empty catalog; it
    /// is created on the first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let catalog = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => decode_catalog(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No server store yet, starting empty");
                Catalog::new()
            }
            Err(e) => {
                return Err(RepositoryError::Internal(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        tracing::debug!(
            path = %path.display(),
            server_count = catalog.servers.len(),
            "Loaded server store"
        );
        Ok(Self {
            path,
            catalog: RwLock::new(catalog),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` and persist. The in-memory catalog is only replaced
    /// once the file write succeeds.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Catalog) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut guard = self.catalog.write().await;
        let mut next = guard.clone();
        let out = change(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn persist(&self, catalog: &Catalog) -> Result<(), RepositoryError> {
        let body = encode_catalog(catalog)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create", parent, &e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| io_error("write", &tmp, &e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error("replace", &self.path, &e))
    }
}

fn io_error(action: &str, path: &Path, e: &std::io::Error) -> RepositoryError {
    RepositoryError::Internal(format!("Failed to {action} {}: {e}", path.display()))
}

fn encode_env_value(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

fn decode_env_value(encoded: &str) -> Result<String, RepositoryError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| RepositoryError::Internal(format!("Failed to decode env var: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| RepositoryError::Internal(format!("Invalid UTF-8 in env var: {e}")))
}

fn encode_catalog(catalog: &Catalog) -> Result<String, RepositoryError> {
    let mut on_disk = catalog.clone();
    for server in &mut on_disk.servers {
        for value in server.env.values_mut() {
            *value = encode_env_value(value);
        }
    }
    serde_json::to_string_pretty(&on_disk)
        .map_err(|e| RepositoryError::Internal(format!("Failed to serialize servers: {e}")))
}

fn decode_catalog(raw: &str) -> Result<Catalog, RepositoryError> {
    if raw.trim().is_empty() {
        return Ok(Catalog::new());
    }
    let mut catalog: Catalog = serde_json::from_str(raw)
        .map_err(|e| RepositoryError::Internal(format!("Failed to parse servers: {e}")))?;
    for server in &mut catalog.servers {
        for value in server.env.values_mut() {
            *value = decode_env_value(value)?;
        }
    }
    catalog.normalize();
    Ok(catalog)
}

#[async_trait]
impl ServerConfigRepository for JsonFileServerRepository {
    async fn insert(&self, config: NewServerConfig) -> Result<ServerConfig, RepositoryError> {
        let stored = self.mutate(|catalog| catalog.insert(config)).await?;
        tracing::info!(server_id = stored.id, server_name = %stored.name, "Stored server config");
        Ok(stored)
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
        self.mutate(|catalog| catalog.update(config)).await
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        self.mutate(|catalog| catalog.delete(id)).await?;
        tracing::info!(server_id = id, "Deleted server config");
        Ok(())
    }
}
