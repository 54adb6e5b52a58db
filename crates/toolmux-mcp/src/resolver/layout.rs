//! Where the sandbox keeps its runtimes.

use std::path::{Path, PathBuf};

/// Files directory of the Termux app on Android.
pub const TERMUX_FILES_DIR: &str = "/data/data/com.termux/files";

/// Directory layout of a sandbox that provides command-line runtimes.
///
/// The sandbox is an independently installed environment; toolmux only
/// probes it and runs binaries from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLayout {
    pub root: PathBuf,
    pub prefix: PathBuf,
    pub home: PathBuf,
    pub bin: PathBuf,
    pub lib: PathBuf,
    pub tmp: PathBuf,
    /// Host directories appended to PATH after `bin`. `None` appends the
    /// host's own PATH instead.
    pub system_path: Option<Vec<PathBuf>>,
    /// Name used in user-facing messages.
    pub display_name: String,
    /// How to get the sandbox when it is missing.
    pub install_hint: String,
}

impl SandboxLayout {
    /// The Termux layout (`files/usr` prefix, `files/home` home).
    pub fn termux() -> Self {
        Self {
            system_path: Some(vec![
                PathBuf::from("/system/bin"),
                PathBuf::from("/system/xbin"),
            ]),
            display_name: "Termux".to_string(),
            install_hint: "Please install Termux from F-Droid or GitHub.".to_string(),
            ..Self::prefixed(TERMUX_FILES_DIR)
        }
    }

    /// A Termux-shaped layout rooted somewhere else.
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            system_path: None,
            display_name: "the sandbox".to_string(),
            install_hint: format!("Expected a runtime prefix at {}.", root.join("usr").display()),
            ..Self::prefixed(root)
        }
    }

    /// Layout for an optional configured root, defaulting to Termux.
    pub fn from_configured(root: Option<&str>) -> Self {
        root.map_or_else(Self::termux, Self::from_root)
    }

    fn prefixed(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let prefix = root.join("usr");
        Self {
            home: root.join("home"),
            bin: prefix.join("bin"),
            lib: prefix.join("lib"),
            tmp: prefix.join("tmp"),
            prefix,
            root,
            system_path: None,
            display_name: String::new(),
            install_hint: String::new(),
        }
    }

    /// Whether `path` lies inside the sandbox.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }
}
