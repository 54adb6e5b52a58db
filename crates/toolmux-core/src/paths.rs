//! Canonical locations of toolmux data on disk.
//!
//! Everything lives under one data root:
//!
//! ```text
//! <data_root>/
//!   servers.json    server configs
//!   settings.json   settings
//!   runtime/        staged managed runtime
//!   packages/       locally installed JavaScript packages
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Overrides the data root when set.
pub const DATA_DIR_ENV: &str = "TOOLMUX_DATA_DIR";

/// Errors that can occur during path resolution and directory operations.
#[derive(Debug, Error)]
pub enum PathError {
    /// Could not determine the system data directory.
    #[error("Cannot determine system data directory")]
    NoDataDir,

    /// A path was expected to be a directory but was not.
    #[error("{0} exists but is not a directory")]
    NotADirectory(PathBuf),

    /// Failed to create a directory.
    #[error("Failed to create directory {path}: {reason}")]
    CreateFailed { path: PathBuf, reason: String },
}

/// Resolve the data root: `$TOOLMUX_DATA_DIR`, else `<data_dir>/toolmux`.
pub fn data_root() -> Result<PathBuf, PathError> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|d| d.join("toolmux"))
        .ok_or(PathError::NoDataDir)
}

/// All derived locations for one data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub root: PathBuf,
    pub servers_file: PathBuf,
    pub settings_file: PathBuf,
    pub runtime_dir: PathBuf,
    pub packages_dir: PathBuf,
}

impl ResolvedPaths {
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            servers_file: root.join("servers.json"),
            settings_file: root.join("settings.json"),
            runtime_dir: root.join("runtime"),
            packages_dir: root.join("packages"),
            root,
        }
    }

    pub fn resolve() -> Result<Self, PathError> {
        data_root().map(Self::under)
    }
}

/// Create `path` (and parents) if missing.
pub fn ensure_directory(path: &Path) -> Result<(), PathError> {
    if path.exists() {
        if !path.is_dir() {
            return Err(PathError::NotADirectory(path.to_path_buf()));
        }
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| PathError::CreateFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
