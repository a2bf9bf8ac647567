//! Detached daemon launch.
//!
//! The daemon is this same executable re-run with the hidden `daemon`
//! subcommand. It gets its own process group so it survives the invoking
//! shell, its stderr goes to a log file beside the session record, and its
//! stdout is read exactly once for the readiness line.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::DebugConfig;
use crate::daemon::protocol::DaemonReady;
use crate::runtime::RuntimeKind;
use crate::{AppError, Result};

/// Executable and leading arguments used to re-enter the CLI as a daemon.
#[derive(Debug, Clone)]
pub struct DaemonLauncher {
    exe: PathBuf,
    global_args: Vec<OsString>,
}

/// A daemon that announced readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedDaemon {
    /// Daemon process identifier.
    pub pid: u32,
    /// Loopback port it listens on.
    pub port: u16,
    /// Rendered start result.
    pub message: String,
}

impl DaemonLauncher {
    /// Launcher for an explicit executable.
    #[must_use]
    pub fn new(exe: impl Into<PathBuf>, global_args: Vec<OsString>) -> Self {
        Self {
            exe: exe.into(),
            global_args,
        }
    }

    /// Launcher that re-runs the current executable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Start` if the current executable cannot be located.
    pub fn current_exe(global_args: Vec<OsString>) -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|err| AppError::Start(format!("cannot locate own executable: {err}")))?;
        Ok(Self::new(exe, global_args))
    }

    /// Spawn a daemon for `program` and wait for its readiness line.
    ///
    /// The wait is bounded by twice the launch timeout, since the daemon
    /// itself spends up to one launch timeout bringing the debuggee up.
    ///
    /// # Errors
    ///
    /// - `AppError::Start` if the daemon cannot be spawned, exits early,
    ///   or stays silent past the deadline.
    /// - The daemon's own start failure, re-tagged by its prefix.
    pub async fn spawn(
        &self,
        config: &DebugConfig,
        program: &Path,
        runtime: RuntimeKind,
    ) -> Result<SpawnedDaemon> {
        let log_path = config.daemon_log_path();
        let log = open_log(&log_path)?;

        let mut command = std::process::Command::new(&self.exe);
        command
            .args(&self.global_args)
            .arg("daemon")
            .arg("--runtime")
            .arg(runtime.to_string())
            .arg(program)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = tokio::process::Command::from(command)
            .spawn()
            .map_err(|err| {
                AppError::Start(format!(
                    "failed to spawn daemon {}: {err}",
                    self.exe.display()
                ))
            })?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::Start("daemon exited immediately".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Start("daemon stdout was not captured".into()))?;

        let deadline = config.timeouts.launch() * 2;
        let mut lines = BufReader::new(stdout).lines();
        let first = match tokio::time::timeout(deadline, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                match child.wait().await {
                    Ok(status) => warn!(pid, %status, "daemon exited before readiness"),
                    Err(err) => warn!(pid, %err, "failed to reap daemon"),
                }
                return Err(AppError::Start(format!(
                    "daemon exited before signalling readiness; see {}",
                    log_path.display()
                )));
            }
            Ok(Err(err)) => {
                return Err(AppError::Start(format!(
                    "failed to read daemon readiness: {err}"
                )))
            }
            Err(_) => {
                warn!(pid, "daemon not ready in time, killing it");
                if let Err(err) = child.kill().await {
                    warn!(pid, %err, "failed to kill unresponsive daemon");
                }
                return Err(AppError::Start(format!(
                    "daemon not ready within {}s; see {}",
                    deadline.as_secs(),
                    log_path.display()
                )));
            }
        };

        match parse_readiness(&first)? {
            DaemonReady::Ready { port, message, .. } => {
                info!(pid, port, "daemon ready");
                Ok(SpawnedDaemon { pid, port, message })
            }
            DaemonReady::Failed { error } => {
                if let Err(err) = child.wait().await {
                    warn!(pid, %err, "failed to reap daemon after failed start");
                }
                Err(AppError::from_wire(&error))
            }
        }
    }
}

/// Parse the daemon's readiness line.
///
/// # Errors
///
/// Returns `AppError::Start` if the line is not a readiness message or
/// reports `ready: false`.
pub fn parse_readiness(line: &str) -> Result<DaemonReady> {
    let ready: DaemonReady = serde_json::from_str(line.trim()).map_err(|err| {
        AppError::Start(format!("unexpected daemon readiness line {line:?}: {err}"))
    })?;
    if let DaemonReady::Ready { ready: false, .. } = ready {
        return Err(AppError::Start("daemon reported it is not ready".into()));
    }
    Ok(ready)
}

fn open_log(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| {
            AppError::Io(format!("failed to create {}: {err}", parent.display()))
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| AppError::Io(format!("failed to open daemon log {}: {err}", path.display())))
}
