//! Wire types for the session daemon.
//!
//! Every message is a single line of JSON terminated by `\n`.
//!
//! | Direction          | Shape                                            |
//! |--------------------|--------------------------------------------------|
//! | caller → daemon    | `{"action":"breakpoint","file":"…","line":12}`  |
//! | daemon → caller    | `{"result":"…"}` or `{"error":"<kind>: …"}`     |
//! | daemon → spawner   | `{"ready":true,"port":N}` or `{"error":"…"}`    |
//!
//! The readiness line is written once on the daemon's stdout; everything
//! else travels over the loopback socket.

use serde::{Deserialize, Serialize};

use crate::models::stack::StepMode;
use crate::{AppError, Result};

/// One command sent to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Register a breakpoint at a 1-based line.
    Breakpoint {
        /// Source file, absolute or relative to the daemon's directory.
        file: String,
        /// 1-based line.
        line: u32,
    },
    /// Resume until the next pause or termination.
    #[serde(alias = "resume")]
    Continue,
    /// Execute one step.
    Step {
        /// Step granularity.
        #[serde(default, alias = "step_action")]
        mode: StepMode,
    },
    /// Evaluate an expression in a paused frame.
    #[serde(alias = "inspect")]
    Evaluate {
        /// Expression text.
        expression: String,
        /// Frame index, innermost when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<usize>,
    },
    /// Call stack of the paused thread.
    Stack,
    /// Locals of the innermost frame.
    Variables,
    /// Children of a compound variable.
    Expand {
        /// Nested-reference handle from a previous listing.
        reference: i64,
    },
    /// Session state summary.
    Status,
    /// Tear down the session and shut the daemon down.
    Stop,
}

impl DaemonRequest {
    /// Action name, as it appears on the wire.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Breakpoint { .. } => "breakpoint",
            Self::Continue => "continue",
            Self::Step { .. } => "step",
            Self::Evaluate { .. } => "evaluate",
            Self::Stack => "stack",
            Self::Variables => "variables",
            Self::Expand { .. } => "expand",
            Self::Status => "status",
            Self::Stop => "stop",
        }
    }
}

/// Reply to one [`DaemonRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonResponse {
    /// Rendered result text.
    Result(String),
    /// Error display text, including its kind prefix.
    Error(String),
}

impl DaemonResponse {
    /// Wrap an operation result for the wire.
    #[must_use]
    pub fn from_result(result: Result<String>) -> Self {
        match result {
            Ok(text) => Self::Result(text),
            Err(err) => Self::Error(err.to_string()),
        }
    }

    /// Unwrap a reply, re-tagging errors by their prefix.
    ///
    /// # Errors
    ///
    /// Returns the error variant named by the reply's prefix.
    pub fn into_result(self) -> Result<String> {
        match self {
            Self::Result(text) => Ok(text),
            Self::Error(text) => Err(AppError::from_wire(&text)),
        }
    }
}

/// First stdout line of a freshly spawned daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DaemonReady {
    /// The session started and the daemon is listening.
    Ready {
        /// Always `true`.
        ready: bool,
        /// Loopback port.
        port: u16,
        /// Rendered start result.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        message: String,
    },
    /// The session could not be started; the daemon exits.
    Failed {
        /// Error display text, including its kind prefix.
        error: String,
    },
}

/// Serialise a message as one newline-terminated JSON line.
///
/// # Errors
///
/// Returns `AppError::Protocol` if the value cannot be serialised.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
