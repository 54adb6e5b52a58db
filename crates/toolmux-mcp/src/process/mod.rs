//! Process primitive layer.
//!
//! A small synchronous API over OS process creation and raw byte I/O on the
//! child's standard streams. Nothing here knows about JSON-RPC. Every call
//! may block and must run off async worker threads.
//!
//! Platform differences (signals) are confined to [`signal`]; the transport
//! and manager never touch OS process APIs directly.

mod signal;

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::SpawnError;

/// How often `wait_for` re-checks a child that has not exited yet.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A spawned child process and its piped stdin/stdout.
///
/// stderr is inherited from the host so server diagnostics end up in the
/// host's log rather than on the protocol stream.
pub struct ProcessHandle {
    pid: u32,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<ChildStdout>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn `command` directly (no shell) with exactly `env` as its environment.
pub fn spawn(
    command: &str,
    working_dir: Option<&Path>,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Result<ProcessHandle, SpawnError> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| SpawnError::Spawn {
        command: command.to_string(),
        reason: format!("{e} (args: {args:?}, cwd: {working_dir:?})"),
    })?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(SpawnError::Spawn {
            command: command.to_string(),
            reason: "child stdio was not piped".to_string(),
        });
    };

    let pid = child.id();
    tracing::debug!(pid, command, "Spawned child process");

    Ok(ProcessHandle {
        pid,
        child: Mutex::new(child),
        stdin: Mutex::new(Some(stdin)),
        stdout: Mutex::new(Some(stdout)),
        closed: AtomicBool::new(false),
    })
}

impl ProcessHandle {
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// One write to the child's stdin. May write fewer bytes than `buf.len()`.
    pub fn write_bytes(&self, buf: &[u8]) -> io::Result<usize> {
        let mut stdin = lock(&self.stdin);
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed"))?;
        let written = pipe.write(buf)?;
        pipe.flush()?;
        Ok(written)
    }

    /// Blocking read from the child's stdout. `Ok(0)` means EOF, including
    /// after [`close`](Self::close).
    pub fn read_bytes(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stdout = lock(&self.stdout);
        if self.closed.load(Ordering::SeqCst) {
            stdout.take();
            return Ok(0);
        }
        let Some(pipe) = stdout.as_mut() else {
            return Ok(0);
        };
        let read = pipe.read(buf)?;
        if self.closed.load(Ordering::SeqCst) {
            stdout.take();
            return Ok(0);
        }
        Ok(read)
    }

    /// Ask the child to stop (SIGTERM on unix).
    pub fn terminate(&self) -> io::Result<()> {
        let mut child = lock(&self.child);
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        signal::terminate(&mut child)
    }

    /// Force the child to stop (SIGKILL on unix).
    pub fn kill(&self) -> io::Result<()> {
        let mut child = lock(&self.child);
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        signal::kill(&mut child)
    }

    /// Point-in-time liveness probe. Callers must tolerate the answer going
    /// stale immediately.
    pub fn is_alive(&self) -> bool {
        matches!(lock(&self.child).try_wait(), Ok(None))
    }

    /// Block until the child exits and return its exit code. A child killed
    /// by a signal reports `128 + signo`.
    pub fn wait_for(&self) -> io::Result<i32> {
        loop {
            if let Some(status) = lock(&self.child).try_wait()? {
                return Ok(exit_code(status));
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Like [`wait_for`](Self::wait_for) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<Option<i32>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = lock(&self.child).try_wait()? {
                return Ok(Some(exit_code(status)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Release stdin and stdout. Idempotent.
    ///
    /// stdout is released immediately unless a reader is blocked on it, in
    /// which case the reader drops it as soon as its read returns.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.stdin).take();
        if let Ok(mut stdout) = self.stdout.try_lock() {
            stdout.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let child = self.child.get_mut().unwrap_or_else(PoisonError::into_inner);
        if matches!(child.try_wait(), Ok(None)) {
            let _ = signal::kill(child);
            let _ = child.wait();
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    signal::terminating_signal(status).map_or(-1, |signo| 128 + signo)
}
