//! Session model and lifecycle helpers.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::models::breakpoint::BreakpointSet;
use crate::models::stack::{PauseReason, StackFrame, Variable};
use crate::runtime::RuntimeKind;
use crate::{AppError, Result};

/// Lifecycle state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No debuggee attached.
    Disconnected,
    /// Debuggee launching, handshake in progress.
    Connecting,
    /// Debuggee halted; queries are allowed.
    Paused(PauseReason),
    /// Debuggee executing after a resume or step.
    Running,
    /// Debuggee exited or the session was stopped. Absorbing.
    Terminated,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Paused(_) | Self::Terminated)
                | (Self::Paused(_), Self::Running | Self::Terminated)
                | (Self::Running, Self::Paused(_) | Self::Terminated)
        )
    }

    /// Whether the debuggee is currently halted.
    #[must_use]
    pub fn is_paused(self) -> bool {
        matches!(self, Self::Paused(_))
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Paused(reason) => write!(f, "paused ({})", reason.as_str()),
            Self::Running => write!(f, "running"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Root entity owned by exactly one orchestrator.
#[derive(Debug, Clone)]
pub struct Session {
    /// Target runtime.
    pub runtime: RuntimeKind,
    /// Absolute path of the debuggee program.
    pub program: PathBuf,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Registered breakpoints.
    pub breakpoints: BreakpointSet,
    /// Stack captured at the most recent pause, innermost first.
    pub stack: Vec<StackFrame>,
    /// Local variables of frame 0, fetched lazily once per pause.
    pub locals: Option<Vec<Variable>>,
    /// Creation timestamp.
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Construct a session that has not been connected yet.
    #[must_use]
    pub fn new(runtime: RuntimeKind, program: PathBuf) -> Self {
        Self {
            runtime,
            program,
            state: SessionState::Disconnected,
            breakpoints: BreakpointSet::default(),
            stack: Vec::new(),
            locals: None,
            started_at: Utc::now(),
        }
    }

    /// Move to `next`, failing with a state error when the lifecycle forbids it.
    ///
    /// Any transition away from a pause drops the cached stack and locals.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` if the transition is not permitted.
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::State(format!(
                "cannot move from {} to {next}",
                self.state
            )));
        }
        if !next.is_paused() {
            self.stack.clear();
        }
        self.locals = None;
        self.state = next;
        Ok(())
    }

    /// Fail unless the session is paused.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` naming the expected and actual states.
    pub fn require_paused(&self) -> Result<()> {
        if self.state.is_paused() {
            Ok(())
        } else {
            Err(AppError::State(format!(
                "expected paused, session is {}",
                self.state
            )))
        }
    }

    /// Fail once the session has reached `Terminated` or was never started.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` naming the actual state.
    pub fn require_live(&self) -> Result<()> {
        match self.state {
            SessionState::Disconnected | SessionState::Terminated => Err(AppError::State(
                format!("expected a live session, session is {}", self.state),
            )),
            _ => Ok(()),
        }
    }

    /// Top-of-stack frame, when paused.
    #[must_use]
    pub fn location(&self) -> Option<&StackFrame> {
        self.stack.first()
    }
}
