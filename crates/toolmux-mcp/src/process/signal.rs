//! Signal delivery, isolated per platform.

use std::io;
use std::process::{Child, ExitStatus};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[cfg(unix)]
fn send(child: &Child, sig: Signal) -> io::Result<()> {
    let pid = i32::try_from(child.id())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    match signal::kill(Pid::from_raw(pid), sig) {
        // Already gone between the liveness check and the signal.
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    }
}

#[cfg(unix)]
pub(super) fn terminate(child: &mut Child) -> io::Result<()> {
    send(child, Signal::SIGTERM)
}

#[cfg(unix)]
pub(super) fn kill(child: &mut Child) -> io::Result<()> {
    send(child, Signal::SIGKILL)
}

#[cfg(unix)]
pub(super) fn terminating_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

// No graceful stop outside unix; both requests force-stop.
#[cfg(not(unix))]
pub(super) fn terminate(child: &mut Child) -> io::Result<()> {
    child.kill()
}

#[cfg(not(unix))]
pub(super) fn kill(child: &mut Child) -> io::Result<()> {
    child.kill()
}

#[cfg(not(unix))]
pub(super) const fn terminating_signal(_status: ExitStatus) -> Option<i32> {
    None
}
