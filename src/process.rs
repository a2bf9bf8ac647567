//! Process utilities: liveness probing, orderly teardown, stderr forwarding.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Check whether a process with the given PID is alive.
///
/// Sends the null signal, which probes existence without delivering
/// anything. `EPERM` means the process exists but belongs to someone else,
/// so it counts as alive. PID 0 and PIDs beyond `i32::MAX` never refer to
/// a daemon and report `false`.
#[cfg(unix)]
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw == 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Check whether a process with the given PID is alive.
///
/// Without a null-signal probe the answer is optimistic; an unreachable
/// daemon is still caught when its port refuses the connection.
#[cfg(not(unix))]
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    pid != 0
}

/// Ask `child` to exit, then force-kill it after `grace`.
///
/// On Unix the child first receives `SIGTERM`. A child that already
/// exited is left alone.
pub async fn terminate_child(child: &mut Child, grace: Duration, label: &str) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(label, ?status, "child already exited");
            return;
        }
        Ok(None) => {}
        Err(err) => warn!(label, %err, "failed to poll child status"),
    }

    send_sigterm(child, label);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!(label, ?status, "child exited"),
        Ok(Err(err)) => warn!(label, %err, "error waiting for child"),
        Err(_) => {
            warn!(label, "child did not exit within grace period, forcing kill");
            if let Err(err) = child.kill().await {
                warn!(label, %err, "failed to force-kill child");
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child, label: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(label, %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child, _label: &str) {}

/// Forward each line of a child's stream to the debug log until EOF.
pub fn forward_lines<R>(stream: R, label: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(label, line = line.as_str(), "child output"),
                Ok(None) => break,
                Err(err) => {
                    debug!(label, %err, "child stream read failed");
                    break;
                }
            }
        }
    })
}
