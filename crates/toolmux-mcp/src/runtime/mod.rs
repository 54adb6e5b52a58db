//! Managed runtime bootstrap: staging a bundled runtime and running `npx`
//! packages through it.

mod bundle;
mod npm;

use std::path::PathBuf;

pub use bundle::{BUNDLED_RUNTIME_VERSION, RuntimeBundle, VERSION_MARKER};
pub use npm::{
    NodeRuntime, NpxInvocation, PackageInstaller, package_name_from_spec,
    resolve_entry_point, unscoped_name,
};

/// Locations the stdio transport may use while bootstrapping a process.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    /// Bundled runtime to stage before first use.
    pub bundle: Option<RuntimeBundle>,
    /// Writable prefix for locally installed packages. Without it `npx` is
    /// never rewritten.
    pub packages_dir: Option<PathBuf>,
}

impl RuntimeContext {
    #[must_use]
    pub fn with_bundle(mut self, bundle: RuntimeBundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    #[must_use]
    pub fn with_packages_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.packages_dir = Some(dir.into());
        self
    }
}
