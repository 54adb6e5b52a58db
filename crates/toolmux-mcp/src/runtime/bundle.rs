//! One-time staging of a bundled runtime onto local storage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::SpawnError;

/// Serializes staging across every bundle and caller in the process, so a
/// connect and a connection test never wipe each other's copy.
static STAGING: Mutex<()> = Mutex::new(());

/// Marker file inside the staged runtime dir holding the staged version.
pub const VERSION_MARKER: &str = ".version";

/// Version of the runtime bundle this build expects.
pub const BUNDLED_RUNTIME_VERSION: &str = "node-22.12.0-r1";

/// A runtime asset tree and where it gets staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeBundle {
    source: PathBuf,
    target: PathBuf,
    version: String,
}

impl RuntimeBundle {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            version: BUNDLED_RUNTIME_VERSION.to_string(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// `bin/node` inside the staged tree.
    pub fn node_binary(&self) -> PathBuf {
        self.target.join("bin").join("node")
    }

    /// npm's CLI script inside the staged tree.
    pub fn npm_cli(&self) -> PathBuf {
        self.target
            .join("lib")
            .join("node_modules")
            .join("npm")
            .join("bin")
            .join("npm-cli.js")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.target.join("bin")
    }

    /// Whether the marker matches the expected version.
    pub fn is_staged(&self) -> bool {
        fs::read_to_string(self.target.join(VERSION_MARKER))
            .is_ok_and(|content| content.trim() == self.version)
    }

    /// Copy the asset tree into place unless the marker already matches.
    ///
    /// Returns `true` when files were copied. A stale or missing marker
    /// wipes the target first. The marker is written last, so an
    /// interrupted copy is redone next time. Blocks while another caller
    /// is staging.
    pub fn ensure_staged(&self) -> Result<bool, SpawnError> {
        let _guard = STAGING.lock().unwrap_or_else(PoisonError::into_inner);

        if self.is_staged() {
            tracing::debug!(target = %self.target.display(), version = %self.version, "Runtime already staged");
            return Ok(false);
        }

        if !self.source.is_dir() {
            return Err(SpawnError::Bootstrap(format!(
                "runtime bundle not found at {}",
                self.source.display()
            )));
        }

        tracing::info!(
            source = %self.source.display(),
            target = %self.target.display(),
            version = %self.version,
            "Staging bundled runtime"
        );

        let stage = || -> io::Result<()> {
            if self.target.exists() {
                fs::remove_dir_all(&self.target)?;
            }
            copy_tree(&self.source, &self.target)?;
            fs::write(self.target.join(VERSION_MARKER), &self.version)
        };
        stage().map_err(|e| {
            SpawnError::Bootstrap(format!(
                "failed to stage runtime into {}: {e}",
                self.target.display()
            ))
        })?;

        Ok(true)
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else if file_type.is_symlink() {
            copy_symlink(&entry.path(), &dest)?;
        } else {
            // fs::copy carries permission bits, keeping binaries executable.
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_source(dir: &Path) -> PathBuf {
        let source = dir.join("assets");
        fs::create_dir_all(source.join("bin")).unwrap();
        fs::write(source.join("bin/node"), "#!/bin/sh\n").unwrap();
        source
    }

    #[test]
    fn stages_once_then_skips() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = RuntimeBundle::new(bundle_source(dir.path()), dir.path().join("runtime"));

        assert!(!bundle.is_staged());
        assert!(bundle.ensure_staged().unwrap());
        assert!(bundle.node_binary().exists());
        assert_eq!(
            fs::read_to_string(bundle.target().join(VERSION_MARKER)).unwrap(),
            BUNDLED_RUNTIME_VERSION
        );

        assert!(!bundle.ensure_staged().unwrap());
    }

    #[test]
    fn version_mismatch_forces_restage() {
        let dir = tempfile::tempdir().unwrap();
        let source = bundle_source(dir.path());
        let target = dir.path().join("runtime");

        RuntimeBundle::new(&source, &target)
            .with_version("old")
            .ensure_staged()
            .unwrap();
        fs::write(target.join("stale-file"), "x").unwrap();

        let bundle = RuntimeBundle::new(&source, &target).with_version("new");
        assert!(bundle.ensure_staged().unwrap());
        assert!(!target.join("stale-file").exists());
        assert!(bundle.is_staged());
    }

    #[test]
    fn concurrent_restage_copies_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = bundle_source(dir.path());
        fs::write(source.join("bin/npm"), "#!/bin/sh\n").unwrap();
        let target = dir.path().join("runtime");
        RuntimeBundle::new(&source, &target)
            .with_version("old")
            .ensure_staged()
            .unwrap();

        let bundle = RuntimeBundle::new(&source, &target).with_version("new");
        let barrier = std::sync::Barrier::new(8);
        let copied: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        bundle.clone().ensure_staged().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(copied.iter().filter(|&&c| c).count(), 1);
        assert!(bundle.is_staged());
        assert!(bundle.node_binary().exists());
        assert!(target.join("bin/npm").exists());
    }

    #[test]
    fn missing_source_is_a_bootstrap_error() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = RuntimeBundle::new(dir.path().join("nope"), dir.path().join("runtime"));
        assert!(matches!(bundle.ensure_staged(), Err(SpawnError::Bootstrap(_))));
    }
}
