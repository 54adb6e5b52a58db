//! Running `npx` packages directly with `node`.
//!
//! `npx` is itself a script that needs a working npm setup and a shell. When
//! a managed JavaScript runtime is available, toolmux instead installs the
//! package into a local prefix and runs its entry point with `node`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;

use toolmux_core::ConfigError;

use crate::error::SpawnError;

/// A parsed `npx [flags] <package> [args...]` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpxInvocation {
    /// Install spec, possibly with a version (`@scope/pkg@1.2.3`).
    pub package_spec: String,
    /// Bin to run when given explicitly (`npx -p pkg <bin>`).
    pub bin_name: Option<String>,
    /// Arguments passed through to the package.
    pub args: Vec<String>,
}

impl NpxInvocation {
    /// Parse the arguments that follow `npx`.
    ///
    /// `-y`/`--yes`/`-q`/`--quiet` are dropped. `-p`/`--package` names the
    /// package, in which case the first positional is the bin to run. A
    /// blank package spec yields `None`.
    pub fn parse(args: &[String]) -> Option<Self> {
        Self::parse_parts(args).filter(|inv| !inv.package_spec.trim().is_empty())
    }

    fn parse_parts(args: &[String]) -> Option<Self> {
        let mut package: Option<String> = None;
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-y" | "--yes" | "-q" | "--quiet" | "--no-install" => {}
                "-p" | "--package" => package = Some(iter.next()?.clone()),
                "--" => {
                    let first = iter.next()?.clone();
                    return Some(Self::positional(package, first, iter.cloned().collect()));
                }
                flag if flag.starts_with("--package=") => {
                    package = Some(flag.trim_start_matches("--package=").to_string());
                }
                flag if flag.starts_with('-') => {
                    tracing::debug!(flag, "Ignoring unsupported npx flag");
                }
                _ => return Some(Self::positional(package, arg.clone(), iter.cloned().collect())),
            }
        }
        None
    }

    fn positional(package: Option<String>, first: String, args: Vec<String>) -> Self {
        match package {
            Some(package_spec) => Self {
                package_spec,
                bin_name: Some(first),
                args,
            },
            None => Self {
                package_spec: first,
                bin_name: None,
                args,
            },
        }
    }

    /// Package name without any version suffix.
    pub fn package_name(&self) -> &str {
        package_name_from_spec(&self.package_spec)
    }
}

/// `@scope/pkg@1.0` -> `@scope/pkg`, `pkg@latest` -> `pkg`.
pub fn package_name_from_spec(spec: &str) -> &str {
    let search_from = usize::from(spec.starts_with('@'));
    spec[search_from..]
        .find('@')
        .map_or(spec, |at| &spec[..search_from + at])
}

/// `@scope/pkg` -> `pkg`.
pub fn unscoped_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Resolve the script to run for an installed package.
///
/// Uses the manifest's `bin`: a string is the entry itself; an object is
/// looked up by `bin_name`, then by the unscoped package name, then its
/// first value. Without `bin`, falls back to `main`, then `index.js`.
pub fn resolve_entry_point(
    package_dir: &Path,
    package_name: &str,
    bin_name: Option<&str>,
) -> Result<PathBuf, SpawnError> {
    let manifest_path = package_dir.join("package.json");
    let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
        SpawnError::Bootstrap(format!("cannot read {}: {e}", manifest_path.display()))
    })?;
    let manifest: Value = serde_json::from_str(&raw).map_err(|e| {
        SpawnError::Bootstrap(format!("invalid {}: {e}", manifest_path.display()))
    })?;

    let from_bin = match manifest.get("bin") {
        Some(Value::String(entry)) => Some(entry.as_str()),
        Some(Value::Object(bins)) => bin_name
            .and_then(|name| bins.get(name))
            .or_else(|| bins.get(unscoped_name(package_name)))
            .or_else(|| bins.values().next())
            .and_then(Value::as_str),
        _ => None,
    };

    let entry = from_bin
        .or_else(|| manifest.get("main").and_then(Value::as_str))
        .unwrap_or("index.js");

    Ok(package_dir.join(entry))
}

/// A JavaScript runtime able to install and run packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRuntime {
    pub node: PathBuf,
    /// npm's CLI script, run through `node`.
    pub npm_cli: PathBuf,
    /// Environment the runtime's binaries need.
    pub env: BTreeMap<String, String>,
}

/// Installs packages into a local prefix.
#[derive(Debug, Clone)]
pub struct PackageInstaller {
    prefix: PathBuf,
}

impl PackageInstaller {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Where `name` lives once installed.
    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.prefix.join("node_modules").join(name)
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.package_dir(name).join("package.json").is_file()
    }

    /// Install `spec` unless already present. Blocking.
    pub fn ensure_installed(&self, runtime: &NodeRuntime, spec: &str) -> Result<PathBuf, SpawnError> {
        let spec = spec.trim();
        let name = package_name_from_spec(spec);
        if name.is_empty() {
            return Err(ConfigError::EmptyPackageSpec.into());
        }
        if self.is_installed(name) {
            return Ok(self.package_dir(name));
        }

        std::fs::create_dir_all(&self.prefix).map_err(|e| {
            SpawnError::Bootstrap(format!("cannot create {}: {e}", self.prefix.display()))
        })?;

        let mut cmd = Command::new(&runtime.node);
        cmd.arg(&runtime.npm_cli)
            .arg("install")
            .arg("--prefix")
            .arg(&self.prefix)
            .args(["--no-audit", "--no-fund", "--loglevel=error"])
            .arg(spec)
            .env_clear()
            .envs(&runtime.env);

        tracing::info!(package = spec, prefix = %self.prefix.display(), "Installing package");
        let output = cmd.output().map_err(|e| SpawnError::Spawn {
            command: "npm install".to_string(),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpawnError::Bootstrap(format!(
                "npm install {spec} failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        if !self.is_installed(name) {
            return Err(SpawnError::Bootstrap(format!(
                "npm install {spec} finished but {} is missing",
                self.package_dir(name).join("package.json").display()
            )));
        }

        Ok(self.package_dir(name))
    }
}
