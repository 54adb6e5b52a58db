//! Environment resolver.
//!
//! Maps bare command names (like `npx`) to concrete executables by probing
//! a sandbox that provides command-line runtimes, and builds the environment
//! those binaries need.
//!
//! - `layout`: where the sandbox keeps its prefix, bin and lib dirs
//! - `env` / `fs`: injectable environment and filesystem access
//! - `resolve`: resolution order, managed environment, missing-dependency text

mod env;
mod fs;
mod layout;
mod resolve;
mod types;

pub use env::{EnvProvider, SystemEnv};
pub use fs::{FsProvider, SystemFs};
pub use layout::{SandboxLayout, TERMUX_FILES_DIR};
pub use resolve::{EnvironmentResolver, MANAGED_RUNTIME_ALIASES, missing_dependency_message};
pub use types::{ProbeOutcome, ResolvedCommand, SandboxStatus};

#[cfg(any(test, feature = "test-utils"))]
pub use env::MockEnv;
#[cfg(any(test, feature = "test-utils"))]
pub use fs::MockFs;
