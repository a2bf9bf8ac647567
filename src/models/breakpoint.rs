//! Breakpoint model and the per-session breakpoint registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A registered stop location.
///
/// `line` is always the 1-based line the caller asked for; protocol
/// variants convert on the wire and never write their own numbering back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Breakpoint {
    /// Absolute source file path.
    pub file: PathBuf,
    /// 1-based line number as supplied by the caller.
    pub line: u32,
    /// Identifier assigned by the runtime.
    pub id: String,
    /// Whether the runtime confirmed the location is reachable.
    pub verified: bool,
}

impl Breakpoint {
    /// Raise the verified flag. A verified breakpoint never reverts.
    pub fn mark_verified(&mut self, verified: bool) {
        self.verified |= verified;
    }
}

/// Runtime acknowledgement for one requested line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointAck {
    /// 1-based line the acknowledgement refers to (caller numbering).
    pub line: u32,
    /// Runtime-assigned identifier.
    pub id: String,
    /// Runtime verification status.
    pub verified: bool,
}

/// Breakpoints keyed by `(file, line)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointSet {
    entries: BTreeMap<(PathBuf, u32), Breakpoint>,
}

impl BreakpointSet {
    /// Look up the breakpoint registered at `file:line`.
    #[must_use]
    pub fn get(&self, file: &Path, line: u32) -> Option<&Breakpoint> {
        self.entries.get(&(file.to_path_buf(), line))
    }

    /// Record `acks` for `file`.
    ///
    /// New keys are inserted; existing keys only have their verified flag
    /// raised, their identifier is left untouched.
    pub fn apply_acks(&mut self, file: &Path, acks: &[BreakpointAck]) {
        for ack in acks {
            self.entries
                .entry((file.to_path_buf(), ack.line))
                .and_modify(|bp| bp.mark_verified(ack.verified))
                .or_insert_with(|| Breakpoint {
                    file: file.to_path_buf(),
                    line: ack.line,
                    id: ack.id.clone(),
                    verified: ack.verified,
                });
        }
    }

    /// All breakpoints, ordered by file then line.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.entries.values()
    }

    /// Number of registered breakpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no breakpoint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered lines grouped by file, in the session-record shape.
    #[must_use]
    pub fn lines_by_file(&self) -> BTreeMap<String, Vec<u32>> {
        let mut map: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for bp in self.entries.values() {
            map.entry(bp.file.to_string_lossy().into_owned())
                .or_default()
                .push(bp.line);
        }
        map
    }
}
