//! Subprocess transport.
//!
//! Spawns a tool server as a child process and exchanges newline-delimited
//! JSON-RPC over its stdin/stdout. The read side runs on a dedicated OS
//! thread; `send` writes synchronously (off the async worker) before it
//! returns.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use toolmux_core::{ConfigError, ServerConfig, TransportKind};

use super::framing::{LineBuffer, LineOutcome, parse_line};
use super::{EventSink, Transport};
use crate::error::{McpError, SpawnError, TransportError};
use crate::jsonrpc::JsonRpcMessage;
use crate::process::{self, ProcessHandle};
use crate::resolver::EnvironmentResolver;
use crate::runtime::{
    NodeRuntime, NpxInvocation, PackageInstaller, RuntimeBundle, RuntimeContext,
    resolve_entry_point,
};

/// Bytes requested per read of child stdout.
const READ_CHUNK: usize = 8192;

/// How long a terminated child gets before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Split a possibly space-separated command into program and arguments.
/// Inline arguments come before `extra`. `None` for a blank command.
pub fn split_command(command: &str, extra: &[String]) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace();
    let program = parts.next()?.to_string();
    let args = parts.map(str::to_string).chain(extra.iter().cloned()).collect();
    Some((program, args))
}

/// What the caller asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioCommand {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl StdioCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        let command = config
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or(ConfigError::MissingCommand)?;
        Ok(Self {
            command,
            args: config.args.clone(),
            env: config.env.clone(),
            working_dir: config
                .working_dir
                .as_deref()
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
        })
    }
}

/// Fully resolved process launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Running with the sandbox's managed environment.
    pub managed: bool,
}

/// Turns a [`StdioCommand`] into a [`LaunchPlan`]: stages the bundled
/// runtime, resolves the executable, rewrites `npx` and merges environments.
#[derive(Debug, Clone)]
pub struct StdioLauncher {
    resolver: Arc<EnvironmentResolver>,
    runtime: RuntimeContext,
}

impl StdioLauncher {
    pub const fn new(resolver: Arc<EnvironmentResolver>, runtime: RuntimeContext) -> Self {
        Self { resolver, runtime }
    }

    /// Build the launch plan. Blocking: may copy files and run npm.
    pub fn plan(&self, cmd: &StdioCommand) -> Result<LaunchPlan, SpawnError> {
        let (program, args) =
            split_command(&cmd.command, &cmd.args).ok_or(ConfigError::MissingCommand)?;

        let bundle = match &self.runtime.bundle {
            Some(bundle) => {
                bundle.ensure_staged()?;
                Some(bundle)
            }
            None => None,
        };

        if program == "npx" {
            if let (Some(bundle), Some(packages)) = (bundle, self.runtime.packages_dir.as_deref()) {
                return self.plan_npx(bundle, packages, &args, cmd);
            }
        }

        let resolved = self
            .resolver
            .resolve_command(&program)
            .ok_or_else(|| SpawnError::Spawn {
                command: program.clone(),
                reason: "executable not found".to_string(),
            })?;

        let bare_name = !program.contains('/');
        if !resolved.use_managed_env && bare_name && self.resolver.find_on_host_path(&program).is_none() {
            let status = self.resolver.check_status();
            return Err(SpawnError::MissingDependency(
                self.resolver.missing_dependency_message(&program, &status),
            ));
        }

        let mut env = if resolved.use_managed_env {
            self.resolver.managed_environment()
        } else {
            self.resolver.host_environment()
        };
        env.extend(cmd.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let working_dir = cmd.working_dir.clone().or_else(|| {
            let home = &self.resolver.layout().home;
            (resolved.use_managed_env && home.is_dir()).then(|| home.clone())
        });

        Ok(LaunchPlan {
            program: resolved.executable.to_string_lossy().into_owned(),
            args,
            env,
            working_dir,
            managed: resolved.use_managed_env,
        })
    }

    /// `npx <pkg> args...` becomes `node <pkg entry> args...` on the
    /// bundled runtime.
    fn plan_npx(
        &self,
        bundle: &RuntimeBundle,
        packages: &Path,
        args: &[String],
        cmd: &StdioCommand,
    ) -> Result<LaunchPlan, SpawnError> {
        let invocation = NpxInvocation::parse(args).ok_or(ConfigError::EmptyPackageSpec)?;

        let mut env = self.resolver.host_environment();
        let host_path = env.get("PATH").cloned().unwrap_or_default();
        let path = std::env::join_paths(
            std::iter::once(bundle.bin_dir()).chain(std::env::split_paths(&host_path)),
        )
        .map_err(|e| SpawnError::Bootstrap(format!("invalid PATH: {e}")))?;
        env.insert("PATH".to_string(), path.to_string_lossy().into_owned());

        let node = NodeRuntime {
            node: bundle.node_binary(),
            npm_cli: bundle.npm_cli(),
            env: env.clone(),
        };
        let package_dir = PackageInstaller::new(packages).ensure_installed(&node, &invocation.package_spec)?;
        let entry = resolve_entry_point(
            &package_dir,
            invocation.package_name(),
            invocation.bin_name.as_deref(),
        )?;

        tracing::debug!(
            package = %invocation.package_spec,
            entry = %entry.display(),
            "Running npx package with bundled node"
        );

        env.extend(cmd.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut final_args = vec![entry.to_string_lossy().into_owned()];
        final_args.extend(invocation.args);

        Ok(LaunchPlan {
            program: node.node.to_string_lossy().into_owned(),
            args: final_args,
            env,
            working_dir: cmd.working_dir.clone(),
            managed: false,
        })
    }
}

/// Lifecycle of a [`StdioTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Starting,
    Running,
    Closing,
    Closed,
}

/// Newline-delimited JSON-RPC over a child's stdio.
pub struct StdioTransport {
    server_name: String,
    command: StdioCommand,
    launcher: StdioLauncher,
    state: Arc<Mutex<TransportState>>,
    handle: Option<Arc<ProcessHandle>>,
    events: Option<EventSink>,
    cancel: Arc<AtomicBool>,
    close_started: AtomicBool,
}

impl StdioTransport {
    pub fn new(server_name: impl Into<String>, command: StdioCommand, launcher: StdioLauncher) -> Self {
        Self {
            server_name: server_name.into(),
            command,
            launcher,
            state: Arc::new(Mutex::new(TransportState::Idle)),
            handle: None,
            events: None,
            cancel: Arc::new(AtomicBool::new(false)),
            close_started: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> TransportState {
        *lock(&self.state)
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid())
    }

    fn set_state(&self, next: TransportState) {
        *lock(&self.state) = next;
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&mut self, events: EventSink) -> Result<(), McpError> {
        {
            let mut state = lock(&self.state);
            if *state != TransportState::Idle {
                return Err(TransportError::AlreadyStarted.into());
            }
            *state = TransportState::Starting;
        }

        let launcher = self.launcher.clone();
        let command = self.command.clone();
        let server_name = self.server_name.clone();
        let spawned = tokio::task::spawn_blocking(move || -> Result<ProcessHandle, SpawnError> {
            let plan = launcher.plan(&command)?;
            tracing::info!(
                server_name = %server_name,
                program = %plan.program,
                args = ?plan.args,
                working_dir = ?plan.working_dir,
                managed = plan.managed,
                "Spawning stdio server"
            );
            process::spawn(&plan.program, plan.working_dir.as_deref(), &plan.args, &plan.env)
        })
        .await
        .unwrap_or_else(|e| {
            Err(SpawnError::Spawn {
                command: self.command.command.clone(),
                reason: format!("spawn task failed: {e}"),
            })
        });

        let handle = match spawned {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                self.set_state(TransportState::Closed);
                return Err(e.into());
            }
        };

        self.set_state(TransportState::Running);

        let reader = {
            let handle = Arc::clone(&handle);
            let events = events.clone();
            let cancel = Arc::clone(&self.cancel);
            let state = Arc::clone(&self.state);
            let server_name = self.server_name.clone();
            std::thread::Builder::new()
                .name(format!("toolmux-stdio-{}", handle.pid()))
                .spawn(move || read_loop(&handle, &events, &cancel, &server_name, &state))
        };

        if let Err(e) = reader {
            let _ = handle.kill();
            handle.close();
            self.set_state(TransportState::Closed);
            return Err(SpawnError::Spawn {
                command: self.command.command.clone(),
                reason: format!("cannot start reader thread: {e}"),
            }
            .into());
        }

        tracing::info!(server_name = %self.server_name, pid = handle.pid(), "Stdio server started");
        self.handle = Some(handle);
        self.events = Some(events);
        Ok(())
    }

    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let handle = self.handle.clone().ok_or(TransportError::NotStarted)?;
        if matches!(self.state(), TransportState::Closing | TransportState::Closed) {
            return Err(TransportError::Closed);
        }
        if !handle.is_alive() {
            self.close().await;
            return Err(TransportError::ProcessDead);
        }

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let expected = line.len();

        let written = tokio::task::spawn_blocking(move || handle.write_bytes(&line))
            .await
            .map_err(|e| TransportError::Io(io::Error::other(e)))?;

        match written {
            Ok(written) if written == expected => {
                tracing::trace!(server_name = %self.server_name, bytes = written, "Sent message");
                Ok(())
            }
            Ok(written) => Err(TransportError::ShortWrite { written, expected }),
            Err(e) => {
                tracing::warn!(server_name = %self.server_name, error = %e, "Write to stdio server failed");
                self.close().await;
                Err(TransportError::Io(e))
            }
        }
    }

    async fn close(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(TransportState::Closing);
        self.cancel.store(true, Ordering::SeqCst);

        if let Some(handle) = &self.handle {
            if let Err(e) = handle.terminate() {
                tracing::debug!(pid = handle.pid(), error = %e, "Terminate failed");
            }
            handle.close();
            reap_in_background(Arc::clone(handle));
        }

        self.set_state(TransportState::Closed);
        if let Some(events) = &self.events {
            events.close();
        }
        tracing::info!(server_name = %self.server_name, "Stdio transport closed");
    }

    fn is_alive(&self) -> bool {
        self.state() == TransportState::Running && self.handle.as_ref().is_some_and(|h| h.is_alive())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = &self.handle {
            if !self.close_started.swap(true, Ordering::SeqCst) {
                let _ = handle.terminate();
                reap_in_background(Arc::clone(handle));
            }
            handle.close();
        }
    }
}

/// Pump child stdout into `events` until EOF, a read error or cancellation.
fn read_loop(
    handle: &ProcessHandle,
    events: &EventSink,
    cancel: &AtomicBool,
    server_name: &str,
    state: &Mutex<TransportState>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut lines = LineBuffer::new();

    'read: while !cancel.load(Ordering::SeqCst) {
        let n = match handle.read_bytes(&mut buf) {
            Ok(0) => {
                tracing::debug!(server_name, "Stdio server closed stdout");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(server_name, error = %e, "Reading from stdio server failed");
                events.error(TransportError::Io(e));
                break;
            }
        };

        for line in lines.push(&buf[..n]) {
            match parse_line(&line) {
                LineOutcome::Blank => {}
                LineOutcome::Noise => tracing::debug!(server_name, line = %line, "Skipping non-protocol output"),
                LineOutcome::Invalid(e) => {
                    tracing::warn!(server_name, line = %line, error = %e, "Failed to parse JSON-RPC message");
                }
                LineOutcome::Message(message) => {
                    if !events.message(message) {
                        break 'read;
                    }
                }
            }
        }
    }

    if !lines.remainder().is_empty() {
        tracing::debug!(server_name, bytes = lines.remainder().len(), "Dropping unterminated trailing output");
    }

    {
        let mut state = lock(state);
        if *state == TransportState::Running {
            *state = TransportState::Closed;
        }
    }
    events.close();
    tracing::debug!(server_name, "Stdio reader finished");
}

/// SIGTERM has been sent; give the child a grace period, then SIGKILL, and
/// reap it so it does not linger as a zombie.
fn reap_in_background(handle: Arc<ProcessHandle>) {
    let pid = handle.pid();
    let spawned = std::thread::Builder::new()
        .name(format!("toolmux-reap-{pid}"))
        .spawn(move || {
            let code = match handle.wait_timeout(TERMINATE_GRACE) {
                Ok(Some(code)) => Some(code),
                Ok(None) => {
                    tracing::debug!(pid, "Child ignored SIGTERM, killing");
                    let _ = handle.kill();
                    handle.wait_for().ok()
                }
                Err(e) => {
                    tracing::debug!(pid, error = %e, "Waiting for child failed");
                    None
                }
            };
            tracing::debug!(pid, exit_code = ?code, "Child reaped");
        });
    if let Err(e) = spawned {
        tracing::warn!(pid, error = %e, "Cannot start reaper thread");
    }
}
