//! Protocol-agnostic debugger driver abstraction.
//!
//! The [`DebugDriver`] trait decouples the session orchestrator from the
//! wire protocol spoken by the debuggee (V8 inspector or debug adapter).
//! Every execution command and state query the orchestrator issues routes
//! through this trait; the concrete variant is chosen once, in
//! [`build_driver`], and never switched afterwards.

pub mod adapter_driver;
pub mod inspector_driver;
pub mod pending;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::DebugConfig;
use crate::models::breakpoint::BreakpointAck;
use crate::models::stack::{
    EvalResult, PauseReason, Scope, StackFrame, StepMode, StopEvent, Variable,
};
use crate::runtime::RuntimeKind;
use crate::{AppError, Result};

/// Boxed future returned by every [`DebugDriver`] method.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Program to launch under the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    /// Absolute path of the program.
    pub program: PathBuf,
    /// Working directory for the debuggee.
    pub cwd: PathBuf,
}

impl LaunchTarget {
    /// Target `program`, running in the program's own directory.
    #[must_use]
    pub fn new(program: &Path) -> Self {
        let cwd = program
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            program: program.to_path_buf(),
            cwd,
        }
    }
}

/// Unsolicited notifications forwarded from a reader task to its driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Adapter finished initialising and accepts configuration requests.
    Initialized,
    /// Debuggee halted.
    Paused {
        /// Classified pause reason.
        reason: PauseReason,
        /// Adapter thread that stopped; `None` for the inspector.
        thread_id: Option<i64>,
        /// Raw inspector call frames; empty for the adapter.
        call_frames: Vec<Value>,
    },
    /// A line of debuggee output.
    Output(String),
    /// Debuggee exited or the transport closed.
    Terminated(String),
}

/// Sending half used by reader tasks.
pub type EventSender = mpsc::UnboundedSender<DriverEvent>;
/// Receiving half owned by a driver.
pub type EventReceiver = mpsc::UnboundedReceiver<DriverEvent>;

/// Uniform capability surface over both debugger wire protocols.
///
/// Lines are 1-based at this boundary in both directions; variants convert
/// internally. Methods take `&mut self` because each driver serialises its
/// own commands: one request is in flight at a time.
pub trait DebugDriver: Send {
    /// Launch the debuggee and complete the protocol handshake.
    ///
    /// Resolves once the debuggee is halted before user code runs.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Start`] if the runtime cannot be launched or the
    /// transport is not established within the launch timeout.
    fn connect<'a>(&'a mut self, target: &'a LaunchTarget) -> DriverFuture<'a, ()>;

    /// Register a breakpoint at `file:line`.
    ///
    /// Returns acknowledgements for every line the runtime reported on
    /// during this registration (the requested line included).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on a malformed or failed response.
    fn set_breakpoint<'a>(
        &'a mut self,
        file: &'a Path,
        line: u32,
    ) -> DriverFuture<'a, Vec<BreakpointAck>>;

    /// Continue execution and wait for the next pause or termination.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if neither arrives within the resume timeout.
    fn resume(&mut self) -> DriverFuture<'_, StopEvent>;

    /// Advance one step and wait for the next pause or termination.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if neither arrives within the resume timeout.
    fn step(&mut self, mode: StepMode) -> DriverFuture<'_, StopEvent>;

    /// Evaluate `expression` in the frame at `frame_index`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Evaluation`] when the runtime reports the
    /// expression failed, [`AppError::Protocol`] on transport faults.
    fn evaluate<'a>(
        &'a mut self,
        expression: &'a str,
        frame_index: usize,
    ) -> DriverFuture<'a, EvalResult>;

    /// Call stack at the current pause, innermost first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on a failed query.
    fn stack_trace(&mut self) -> DriverFuture<'_, Vec<StackFrame>>;

    /// Variable scopes of the frame at `frame_index`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on a failed query.
    fn scopes(&mut self, frame_index: usize) -> DriverFuture<'_, Vec<Scope>>;

    /// Children of the container identified by `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidArgument`] for an unknown handle,
    /// [`AppError::Protocol`] on a failed query.
    fn variables(&mut self, reference: i64) -> DriverFuture<'_, Vec<Variable>>;

    /// Close the transport and terminate the debuggee. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] only if the debuggee cannot be killed.
    fn disconnect(&mut self) -> DriverFuture<'_, ()>;

    /// Drain debuggee output captured since the previous call.
    fn take_output(&mut self) -> Vec<String>;
}

/// Constructor used by the orchestrator to obtain a driver for a runtime.
pub type DriverFactory =
    Arc<dyn Fn(RuntimeKind, &DebugConfig) -> Box<dyn DebugDriver> + Send + Sync>;

/// Build the protocol driver for `kind`.
///
/// This is the only place that maps a runtime kind onto a wire protocol.
#[must_use]
pub fn build_driver(kind: RuntimeKind, config: &DebugConfig) -> Box<dyn DebugDriver> {
    match kind {
        RuntimeKind::Node => Box::new(inspector_driver::InspectorDriver::new(
            config.inspector.clone(),
            config.timeouts.clone(),
        )),
        RuntimeKind::Python => Box::new(adapter_driver::AdapterDriver::new(
            config.adapter.clone(),
            config.timeouts.clone(),
        )),
    }
}

/// Factory that defers to [`build_driver`].
#[must_use]
pub fn default_factory() -> DriverFactory {
    Arc::new(build_driver)
}

// ── Event helpers shared by both variants ────────────────────────────────────

/// State of the most recent resume or step wait.
///
/// A wait that times out leaves its command outstanding: the debuggee may
/// still halt later, and that pause belongs to the caller's next resume or
/// step rather than being discarded as stale.
#[derive(Debug, Default)]
pub(crate) struct StopWait {
    outstanding: bool,
    held: Option<DriverEvent>,
}

impl StopWait {
    /// Whether a previous resume or step is still waiting for its stop.
    pub(crate) fn is_outstanding(&self) -> bool {
        self.outstanding
    }

    /// Forget any outstanding wait; the debuggee has been resumed afresh.
    pub(crate) fn reset(&mut self) {
        self.outstanding = false;
        self.held = None;
    }
}

/// Discard notifications left over from before the next command.
///
/// Output lines are kept, and so is the first pause that answers an
/// outstanding wait. Returns the termination reason if the debuggee exited
/// while the session was idle.
pub(crate) fn drain_stale(
    events: &mut EventReceiver,
    output: &mut Vec<String>,
    wait: &mut StopWait,
) -> Option<String> {
    let mut terminated = None;
    while let Ok(event) = events.try_recv() {
        match event {
            DriverEvent::Output(text) => output.push(text),
            DriverEvent::Terminated(reason) => terminated = Some(reason),
            stop @ DriverEvent::Paused { .. } if wait.outstanding && wait.held.is_none() => {
                debug!("holding late pause for the outstanding wait");
                wait.held = Some(stop);
            }
            other => debug!(?other, "discarding stale driver event"),
        }
    }
    terminated
}

/// Wait for the next pause or termination, collecting output on the way.
///
/// A pause held back by [`drain_stale`] is returned first. A closed channel
/// counts as termination. On timeout the wait stays outstanding so the
/// next call picks up where this one gave up.
///
/// # Errors
///
/// Returns `AppError::Protocol` when nothing arrives within `timeout`.
pub(crate) async fn next_stop(
    events: &mut EventReceiver,
    output: &mut Vec<String>,
    wait: &mut StopWait,
    timeout: Duration,
) -> Result<DriverEvent> {
    if let Some(stop) = wait.held.take() {
        wait.outstanding = false;
        return Ok(stop);
    }
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                wait.outstanding = false;
                return Ok(DriverEvent::Terminated("connection closed".into()));
            }
            Err(_elapsed) => {
                wait.outstanding = true;
                return Err(AppError::Protocol(format!(
                    "timed out after {}s waiting for the debuggee to pause or exit",
                    timeout.as_secs()
                )));
            }
        };
        match event {
            DriverEvent::Output(text) => output.push(text),
            DriverEvent::Initialized => debug!("ignoring initialized event while waiting for stop"),
            stop @ (DriverEvent::Paused { .. } | DriverEvent::Terminated(_)) => {
                wait.outstanding = false;
                return Ok(stop);
            }
        }
    }
}
