//! Filesystem probes, injectable for tests.

use std::path::Path;

use super::types::ProbeOutcome;

pub trait FsProvider: Send + Sync {
    /// Whether `path` is an executable regular file.
    fn check_executable(&self, path: &Path) -> ProbeOutcome;

    /// Whether `path` is a directory the current user can list.
    fn is_readable_dir(&self, path: &Path) -> bool;
}

/// Real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFs;

impl FsProvider for SystemFs {
    fn check_executable(&self, path: &Path) -> ProbeOutcome {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ProbeOutcome::NotFound,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return ProbeOutcome::PermissionDenied;
            }
            Err(e) => return ProbeOutcome::IoError(e.to_string()),
        };

        if !metadata.is_file() {
            return ProbeOutcome::NotAFile;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return ProbeOutcome::NotExecutable;
            }
        }

        ProbeOutcome::Ok
    }

    fn is_readable_dir(&self, path: &Path) -> bool {
        path.is_dir() && std::fs::read_dir(path).is_ok()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct MockFs {
    executables: std::collections::BTreeSet<std::path::PathBuf>,
    dirs: std::collections::BTreeSet<std::path::PathBuf>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_executable(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.executables.insert(path.into());
        self
    }

    #[must_use]
    pub fn with_dir(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.dirs.insert(path.into());
        self
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl FsProvider for MockFs {
    fn check_executable(&self, path: &Path) -> ProbeOutcome {
        if self.executables.contains(path) {
            ProbeOutcome::Ok
        } else {
            ProbeOutcome::NotFound
        }
    }

    fn is_readable_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }
}
