//! Debug adapter process spawner.
//!
//! Launches `<python> -m <adapter_module>` with piped stdio. The adapter
//! speaks framed messages on stdin/stdout; its stderr is forwarded to the
//! debug log. The child is spawned with `kill_on_drop(true)` so a dropped
//! driver never leaks an adapter or its debuggee.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::config::AdapterConfig;
use crate::process::forward_lines;
use crate::{AppError, Result};

/// Active stdio connection to a spawned adapter process.
#[derive(Debug)]
pub struct AdapterProcess {
    /// Child handle; kept alive so `kill_on_drop` applies.
    pub child: Child,
    /// Adapter stdin for outbound frames.
    pub stdin: ChildStdin,
    /// Adapter stdout for inbound frames.
    pub stdout: ChildStdout,
}

/// Spawn the debug adapter in `cwd`.
///
/// # Errors
///
/// Returns [`AppError::Start`] if the interpreter cannot be spawned or its
/// stdio cannot be captured.
pub fn spawn_adapter(config: &AdapterConfig, cwd: &Path) -> Result<AdapterProcess> {
    let mut cmd = Command::new(&config.python_path);
    cmd.arg("-m")
        .arg(&config.adapter_module)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Start(format!(
            "failed to spawn {} -m {}: {err}",
            config.python_path, config.adapter_module
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Start("failed to capture adapter stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Start("failed to capture adapter stdout".into()))?;
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, "adapter stderr");
    }

    info!(pid = child.id(), module = %config.adapter_module, "debug adapter spawned");

    Ok(AdapterProcess {
        child,
        stdin,
        stdout,
    })
}
