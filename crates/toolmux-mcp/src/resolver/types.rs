//! Resolver result types.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// A command mapped to something the process layer can execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    /// Absolute path, or the bare name when deferring to the OS lookup.
    pub executable: PathBuf,
    /// Run with the sandbox's managed environment.
    pub use_managed_env: bool,
}

impl ResolvedCommand {
    pub fn managed(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            use_managed_env: true,
        }
    }

    pub fn unmanaged(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            use_managed_env: false,
        }
    }
}

/// What a probe of the sandbox found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxStatus {
    /// The sandbox root exists.
    pub installed: bool,
    /// The sandbox bin dir can be listed.
    pub accessible: bool,
    /// Managed runtimes found in the sandbox bin dir, by alias.
    pub runtimes: BTreeMap<String, PathBuf>,
    /// Set when the sandbox exists but cannot be used.
    pub error: Option<String>,
}

impl SandboxStatus {
    pub fn has_runtime(&self, alias: &str) -> bool {
        self.runtimes.contains_key(alias)
    }

    pub fn runtime_path(&self, alias: &str) -> Option<&PathBuf> {
        self.runtimes.get(alias)
    }
}

/// Outcome of checking one candidate executable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    NotFound,
    NotAFile,
    NotExecutable,
    PermissionDenied,
    IoError(String),
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::NotFound => write!(f, "not found"),
            Self::NotAFile => write!(f, "not a file"),
            Self::NotExecutable => write!(f, "not executable"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::IoError(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}
