//! Target runtime kind: which wire protocol a session speaks.
//!
//! `RuntimeKind` is the `--runtime` CLI flag value and the `runtime_kind`
//! field of the persisted session record.

use std::fmt::{Display, Formatter};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Supported debuggee runtimes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// Node.js, driven through the V8 inspector over a WebSocket.
    Node,
    /// Python, driven through `debugpy` speaking the debug adapter protocol.
    Python,
}

impl Display for RuntimeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Python => write!(f, "python"),
        }
    }
}
