//! Stack frames, scopes, variables and stop notifications.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Why the debuggee halted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Initial pause before any user code ran.
    Entry,
    /// A registered breakpoint was hit.
    Breakpoint,
    /// A step request completed.
    Step,
    /// An exception was raised.
    Exception,
    /// Any other runtime-reported reason.
    Other,
}

impl PauseReason {
    /// Map a runtime reason string onto a pause reason.
    #[must_use]
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "entry" => Self::Entry,
            "breakpoint" | "function breakpoint" | "data breakpoint" => Self::Breakpoint,
            "step" | "goto" => Self::Step,
            "exception" | "promiseRejection" => Self::Exception,
            _ => Self::Other,
        }
    }

    /// Lowercase label used in reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Breakpoint => "breakpoint",
            Self::Step => "step",
            Self::Exception => "exception",
            Self::Other => "other",
        }
    }
}

/// Step granularity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// Step over the current line.
    #[default]
    #[serde(alias = "next")]
    Over,
    /// Step into the call on the current line.
    #[serde(alias = "step_in")]
    Into,
}

/// What a protocol client observed after an execution command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopEvent {
    /// The debuggee paused again.
    Paused(PauseReason),
    /// The debuggee exited or the transport closed.
    Terminated(String),
}

/// One call-stack entry; index 0 is the innermost frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StackFrame {
    /// Position in the stack, innermost first.
    pub index: usize,
    /// Function or context name.
    pub name: String,
    /// Source file, when the runtime reports one.
    pub file: Option<PathBuf>,
    /// 1-based line number.
    pub line: u32,
}

/// A variable container attached to a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Scope label (`Locals`, `Local`, `Closure`, `Global`, …).
    pub name: String,
    /// Handle passed to a variables query.
    pub reference: i64,
}

impl Scope {
    /// Whether this scope holds the frame's local variables.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.name.to_ascii_lowercase().as_str(), "locals" | "local")
    }
}

/// A named value as reported by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Display type tag; empty when the runtime has none.
    pub type_name: String,
    /// Display value.
    pub value: String,
    /// Handle for expanding a compound value.
    pub reference: Option<i64>,
}

/// Result of an expression evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalResult {
    /// Display value.
    pub value: String,
    /// Display type tag; empty when the runtime has none.
    pub type_name: String,
    /// Handle for expanding a compound result.
    pub reference: Option<i64>,
}

/// Where the debuggee ended up after `resume` or `step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Halted again; `location` is the innermost frame when known.
    Paused {
        /// Why it halted.
        reason: PauseReason,
        /// Innermost frame.
        location: Option<StackFrame>,
    },
    /// Ran to completion or was killed.
    Terminated {
        /// Runtime-reported reason.
        reason: String,
    },
}

impl StopOutcome {
    /// Whether the debuggee has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}
