//! Debug adapter request builders and the initialisation handshake.
//!
//! The startup sequence is:
//!
//! 1. `initialize` (response awaited).
//! 2. `launch` (dispatched; its response is collected later).
//! 3. Wait for the `initialized` event.
//! 4. `setBreakpoints` per file, any number of times.
//! 5. `configurationDone` on the first resume, then the `launch` response.
//!
//! debugpy answers `launch` only after `configurationDone`, so awaiting it
//! in step 2 would deadlock.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::config::AdapterConfig;
use crate::driver::{DriverEvent, EventReceiver, LaunchTarget};
use crate::{AppError, Result};

/// Client identifier reported in `initialize`.
pub const CLIENT_ID: &str = "debug-bridge";

/// Serialise a request frame body.
#[must_use]
pub fn request_body(seq: u64, command: &str, arguments: &Value) -> String {
    json!({
        "seq": seq,
        "type": "request",
        "command": command,
        "arguments": arguments,
    })
    .to_string()
}

/// Arguments for the `initialize` request.
#[must_use]
pub fn initialize_arguments() -> Value {
    json!({
        "clientID": CLIENT_ID,
        "clientName": CLIENT_ID,
        "adapterID": "debugpy",
        "pathFormat": "path",
        "linesStartAt1": true,
        "columnsStartAt1": true,
        "supportsVariableType": true,
        "supportsRunInTerminalRequest": false,
    })
}

/// Arguments for the `launch` request.
#[must_use]
pub fn launch_arguments(target: &LaunchTarget, config: &AdapterConfig) -> Value {
    json!({
        "type": "debugpy",
        "request": "launch",
        "program": target.program.to_string_lossy(),
        "cwd": target.cwd.to_string_lossy(),
        "console": "internalConsole",
        "justMyCode": config.just_my_code,
        "stopOnEntry": false,
    })
}

/// Arguments for `setBreakpoints`: the complete line set for one file.
#[must_use]
pub fn set_breakpoints_arguments(file: &Path, lines: &[u32]) -> Value {
    let breakpoints: Vec<Value> = lines.iter().map(|line| json!({ "line": line })).collect();
    json!({
        "source": { "path": file.to_string_lossy() },
        "breakpoints": breakpoints,
        "lines": lines,
    })
}

/// Wait for the adapter's `initialized` event, keeping any output.
///
/// # Errors
///
/// Returns [`AppError::Start`] if the adapter terminates first or the
/// event does not arrive within `timeout`.
pub async fn wait_for_initialized(
    events: &mut EventReceiver,
    output: &mut Vec<String>,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(DriverEvent::Initialized)) => return Ok(()),
            Ok(Some(DriverEvent::Output(text))) => output.push(text),
            Ok(Some(DriverEvent::Terminated(reason))) => {
                return Err(AppError::Start(format!(
                    "adapter exited during handshake: {reason}"
                )))
            }
            Ok(Some(other)) => debug!(?other, "ignoring event before initialized"),
            Ok(None) => {
                return Err(AppError::Start(
                    "adapter closed the connection during handshake".into(),
                ))
            }
            Err(_elapsed) => {
                return Err(AppError::Start(format!(
                    "adapter did not report initialized within {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}
