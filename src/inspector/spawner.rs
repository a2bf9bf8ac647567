//! Node.js debuggee spawner.
//!
//! Launches `node --inspect-brk=0 <program>` so the runtime picks a free
//! inspector port and halts before the first statement, then scrapes the
//! `ws://` endpoint it announces on stderr.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::InspectorConfig;
use crate::driver::LaunchTarget;
use crate::process::forward_lines;
use crate::{AppError, Result};

/// A launched debuggee and the inspector endpoint it announced.
#[derive(Debug)]
pub struct NodeProcess {
    /// Child handle; `kill_on_drop` is set.
    pub child: Child,
    /// Inspector WebSocket URL.
    pub ws_url: String,
}

fn ws_url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"ws://[^\s]+").ok())
        .as_ref()
}

/// Extract an inspector URL from one stderr line.
#[must_use]
pub fn find_ws_url(line: &str) -> Option<&str> {
    ws_url_pattern()?.find(line).map(|m| m.as_str())
}

/// Launch the debuggee and wait for its inspector URL.
///
/// # Errors
///
/// Returns [`AppError::Start`] if `node` cannot be spawned, exits before
/// announcing an endpoint, or stays silent past `timeout`.
pub async fn spawn_node(
    config: &InspectorConfig,
    target: &LaunchTarget,
    timeout: Duration,
) -> Result<NodeProcess> {
    let mut cmd = Command::new(&config.node_path);
    cmd.args(&config.extra_args)
        .arg("--inspect-brk=0")
        .arg(&target.program)
        .current_dir(&target.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Start(format!("failed to spawn {}: {err}", config.node_path)))?;

    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, "debuggee stdout");
    }
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Start("failed to capture node stderr".into()))?;
    let mut lines = BufReader::new(stderr).lines();

    let scan = async {
        while let Some(line) = lines.next_line().await? {
            debug!(line = line.as_str(), "node stderr");
            if let Some(url) = find_ws_url(&line) {
                return Ok::<_, std::io::Error>(Some(url.to_owned()));
            }
        }
        Ok(None)
    };

    let ws_url = match tokio::time::timeout(timeout, scan).await {
        Ok(Ok(Some(url))) => url,
        Ok(Ok(None)) => {
            let status = child.wait().await.ok();
            return Err(AppError::Start(format!(
                "node exited ({status:?}) before announcing an inspector endpoint"
            )));
        }
        Ok(Err(err)) => {
            child.kill().await.ok();
            return Err(AppError::Start(format!("failed to read node stderr: {err}")));
        }
        Err(_elapsed) => {
            child.kill().await.ok();
            return Err(AppError::Start(format!(
                "node did not announce an inspector endpoint within {}s",
                timeout.as_secs()
            )));
        }
    };

    forward_lines(lines.into_inner(), "debuggee stderr");
    info!(pid = child.id(), ws_url = ws_url.as_str(), "node debuggee launched");

    Ok(NodeProcess { child, ws_url })
}
