//! Persisted identity of a daemon-hosted session.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeKind;

/// On-disk record that lets a later invocation find its daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionRecord {
    /// Runtime the daemon is driving.
    pub runtime_kind: RuntimeKind,
    /// Absolute program path.
    pub program: String,
    /// Absolute file path to registered 1-based lines.
    #[serde(default)]
    pub breakpoints: BTreeMap<String, Vec<u32>>,
    /// Loopback port the daemon listens on.
    pub daemon_port: u16,
    /// Process identifier of the daemon.
    pub daemon_pid: u32,
    /// When the daemon became ready.
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Record `line` for `file`, keeping each file's lines sorted and unique.
    pub fn add_breakpoint(&mut self, file: &str, line: u32) {
        let lines = self.breakpoints.entry(file.to_owned()).or_default();
        if let Err(pos) = lines.binary_search(&line) {
            lines.insert(pos, line);
        }
    }
}
