//! Command resolution against the sandbox.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use super::env::{EnvProvider, SystemEnv};
use super::fs::{FsProvider, SystemFs};
use super::layout::SandboxLayout;
use super::types::{ProbeOutcome, ResolvedCommand, SandboxStatus};

/// Runtime names that map onto binaries in the sandbox bin dir.
pub const MANAGED_RUNTIME_ALIASES: &[&str] =
    &["node", "npx", "npm", "python", "python3", "pip", "uv", "uvx"];

/// Maps command names to executables and builds the managed environment.
///
/// Resolution never fails; absence is `None` and the caller decides whether
/// it is fatal.
pub struct EnvironmentResolver {
    layout: SandboxLayout,
    env: Box<dyn EnvProvider>,
    fs: Box<dyn FsProvider>,
}

impl std::fmt::Debug for EnvironmentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentResolver")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl EnvironmentResolver {
    pub fn new(layout: SandboxLayout) -> Self {
        Self::with_deps(layout, Box::new(SystemEnv), Box::new(SystemFs))
    }

    /// Build with injected environment and filesystem (for testing).
    pub fn with_deps(layout: SandboxLayout, env: Box<dyn EnvProvider>, fs: Box<dyn FsProvider>) -> Self {
        Self { layout, env, fs }
    }

    pub const fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    /// Probe the sandbox: does it exist, can we read it, which runtimes
    /// does it provide.
    pub fn check_status(&self) -> SandboxStatus {
        if !self.fs.is_readable_dir(&self.layout.root) {
            tracing::debug!(root = %self.layout.root.display(), "Sandbox not installed");
            return SandboxStatus::default();
        }

        if !self.fs.is_readable_dir(&self.layout.bin) {
            return SandboxStatus {
                installed: true,
                accessible: false,
                runtimes: BTreeMap::new(),
                error: Some(format!(
                    "Cannot access {name} files. Please run {name} at least once.",
                    name = self.layout.display_name
                )),
            };
        }

        let runtimes = MANAGED_RUNTIME_ALIASES
            .iter()
            .filter_map(|alias| {
                let candidate = self.layout.bin.join(alias);
                (self.fs.check_executable(&candidate) == ProbeOutcome::Ok)
                    .then(|| ((*alias).to_string(), candidate))
            })
            .collect::<BTreeMap<_, _>>();

        tracing::debug!(runtimes = ?runtimes.keys().collect::<Vec<_>>(), "Sandbox probed");

        SandboxStatus {
            installed: true,
            accessible: true,
            runtimes,
            error: None,
        }
    }

    /// Resolve `name` to an executable.
    ///
    /// Order:
    /// 1. managed-runtime alias installed in the sandbox
    /// 2. absolute path that exists and is executable (managed iff inside
    ///    the sandbox)
    /// 3. literal name in the sandbox bin dir
    /// 4. the bare name, left to the OS lookup
    pub fn resolve_command(&self, name: &str) -> Option<ResolvedCommand> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let path = Path::new(name);
        if path.is_absolute() {
            let outcome = self.fs.check_executable(path);
            if outcome != ProbeOutcome::Ok {
                tracing::debug!(command = name, %outcome, "Absolute command not usable");
                return None;
            }
            return Some(ResolvedCommand {
                executable: path.to_path_buf(),
                use_managed_env: self.layout.contains(path),
            });
        }

        if name.contains('/') {
            return Some(ResolvedCommand::unmanaged(name));
        }

        // Aliases and any other literal name share one probe location.
        let candidate = self.layout.bin.join(name);
        if self.fs.check_executable(&candidate) == ProbeOutcome::Ok {
            if MANAGED_RUNTIME_ALIASES.contains(&name) {
                tracing::debug!(command = name, path = %candidate.display(), "Resolved managed runtime");
            }
            return Some(ResolvedCommand::managed(candidate));
        }

        Some(ResolvedCommand::unmanaged(name))
    }

    /// Find `name` on the host PATH.
    pub fn find_on_host_path(&self, name: &str) -> Option<PathBuf> {
        let path_var = self.env.get("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(name))
            .find(|candidate| self.fs.check_executable(candidate) == ProbeOutcome::Ok)
    }

    /// Variables required to run binaries from the sandbox.
    pub fn managed_environment(&self) -> BTreeMap<String, String> {
        let layout = &self.layout;
        let mut path_entries = vec![layout.bin.clone()];
        match &layout.system_path {
            Some(dirs) => path_entries.extend(dirs.iter().cloned()),
            None => {
                if let Some(host) = self.env.get("PATH") {
                    path_entries.extend(std::env::split_paths(&host));
                }
            }
        }
        let path = std::env::join_paths(&path_entries)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| layout.bin.display().to_string());

        let display = |p: &Path| p.display().to_string();
        BTreeMap::from([
            ("HOME".to_string(), display(&layout.home)),
            ("PREFIX".to_string(), display(&layout.prefix)),
            ("TMPDIR".to_string(), display(&layout.tmp)),
            ("PATH".to_string(), path),
            ("LD_LIBRARY_PATH".to_string(), display(&layout.lib)),
            ("LANG".to_string(), "en_US.UTF-8".to_string()),
            ("TERM".to_string(), "xterm-256color".to_string()),
            ("COLORTERM".to_string(), "truecolor".to_string()),
        ])
    }

    /// The host environment, used for commands that are not managed.
    pub fn host_environment(&self) -> BTreeMap<String, String> {
        self.env.vars().into_iter().collect()
    }

    pub fn missing_dependency_message(&self, command: &str, status: &SandboxStatus) -> String {
        missing_dependency_message(&self.layout, command, status)
    }
}

/// Human-actionable text for a command that could not be run.
///
/// Distinguishes a missing sandbox from a sandbox that lacks the runtime
/// package, naming the command that installs it.
pub fn missing_dependency_message(layout: &SandboxLayout, command: &str, status: &SandboxStatus) -> String {
    let name = &layout.display_name;
    if !status.installed {
        return format!(
            "{} is required for local MCP servers. {}",
            capitalize(name),
            layout.install_hint
        );
    }
    if let Some(error) = &status.error {
        return error.clone();
    }

    let base = Path::new(command.split_whitespace().next().unwrap_or(command))
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or(command)
        .to_ascii_lowercase();

    let (runtime, install) = match base.as_str() {
        "npx" | "node" | "npm" => ("Node.js", "pkg install nodejs"),
        "python" | "pip" => ("Python", "pkg install python"),
        "python3" => ("Python 3", "pkg install python"),
        "uv" => ("uv", "pip install uv"),
        "uvx" => ("uvx", "pip install uv"),
        _ => {
            return format!("Command '{command}' not found. Make sure it's installed in {name}.");
        }
    };
    format!("{runtime} is not installed in {name}. Open {name} and run: {install}")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
