//! Debug session orchestration: the single owner of one driver and its
//! debuggee.
//!
//! [`DebugSession`] enforces the lifecycle
//! `Disconnected → Connecting → Paused → Running → Paused … → Terminated`,
//! caches the stack captured at each pause, and wraps driver errors with
//! the command and location they occurred at.

use std::path::{Path, PathBuf};

use tracing::{info, info_span, warn, Instrument};

use crate::config::DebugConfig;
use crate::driver::{default_factory, DebugDriver, DriverFactory, LaunchTarget};
use crate::models::breakpoint::Breakpoint;
use crate::models::session::{Session, SessionState};
use crate::models::stack::{
    EvalResult, PauseReason, StackFrame, StepMode, StopEvent, StopOutcome, Variable,
};
use crate::runtime::RuntimeKind;
use crate::{AppError, Result};

/// Snapshot returned by [`DebugSession::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Current lifecycle state.
    pub state: SessionState,
    /// Runtime, once started.
    pub runtime: Option<RuntimeKind>,
    /// Program, once started.
    pub program: Option<PathBuf>,
    /// Registered breakpoints, ordered by file then line.
    pub breakpoints: Vec<Breakpoint>,
    /// Innermost frame, when paused.
    pub location: Option<StackFrame>,
}

/// One debugging session: one driver, one debuggee.
pub struct DebugSession {
    config: DebugConfig,
    factory: DriverFactory,
    driver: Option<Box<dyn DebugDriver>>,
    session: Option<Session>,
    terminal_reason: Option<String>,
    /// A resume or step failed while running; the next one may retry it.
    stop_pending: bool,
}

impl DebugSession {
    /// Create an idle session using the built-in drivers.
    #[must_use]
    pub fn new(config: DebugConfig) -> Self {
        Self::with_factory(config, default_factory())
    }

    /// Create an idle session whose driver comes from `factory`.
    #[must_use]
    pub fn with_factory(config: DebugConfig, factory: DriverFactory) -> Self {
        Self {
            config,
            factory,
            driver: None,
            session: None,
            terminal_reason: None,
            stop_pending: false,
        }
    }

    /// Configuration this session was created with.
    #[must_use]
    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Disconnected, |s| s.state)
    }

    /// Launch `program` under `runtime` and wait for the initial pause.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` if a session is already live and
    /// `AppError::Start` if the program is missing or the runtime cannot be
    /// launched and attached.
    pub async fn start(&mut self, program: &Path, runtime: RuntimeKind) -> Result<StopOutcome> {
        if let Some(session) = &self.session {
            if session.state != SessionState::Terminated {
                return Err(AppError::State(format!(
                    "expected no active session, session is {}",
                    session.state
                )));
            }
        }

        let program = std::fs::canonicalize(program)
            .ok()
            .filter(|p| p.is_file())
            .ok_or_else(|| {
                AppError::Start(format!("program not found: {}", program.display()))
            })?;

        // A previous run that exited on its own still holds its driver.
        self.stop().await?;

        let span = info_span!("start", runtime = %runtime, program = %program.display());
        async {
            let mut session = Session::new(runtime, program.clone());
            session.transition(SessionState::Connecting)?;
            self.terminal_reason = None;
            self.stop_pending = false;
            self.session = Some(session);

            let mut driver = (self.factory)(runtime, &self.config);
            if let Err(err) = driver.connect(&LaunchTarget::new(&program)).await {
                warn!(%err, "debuggee failed to start");
                if let Err(cleanup) = driver.disconnect().await {
                    warn!(%cleanup, "cleanup after failed start");
                }
                self.mark_terminated(format!("start failed: {}", err.message()));
                let err = match err {
                    AppError::Start(_) => err,
                    other => AppError::Start(other.to_string()),
                };
                return Err(err.context(format!("start {}", program.display())));
            }
            self.driver = Some(driver);

            info!("debuggee paused at entry");
            self.on_paused(PauseReason::Entry).await
        }
        .instrument(span)
        .await
    }

    /// Register a breakpoint at `file:line` (1-based).
    ///
    /// Repeating a `(file, line)` pair is a no-op once it is verified.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` without a live session,
    /// `AppError::InvalidArgument` for line 0, and driver errors wrapped
    /// with the location.
    pub async fn add_breakpoint(&mut self, file: &Path, line: u32) -> Result<Breakpoint> {
        self.session()?.require_live()?;
        if line == 0 {
            return Err(AppError::InvalidArgument("line numbers start at 1".into()));
        }
        let file = absolutize(file);

        if let Some(existing) = self.session()?.breakpoints.get(&file, line) {
            if existing.verified {
                return Ok(existing.clone());
            }
        }

        let acks = self
            .driver_mut()?
            .set_breakpoint(&file, line)
            .await
            .map_err(|e| e.context(format!("breakpoint {}:{line}", file.display())))?;

        let session = self.session_mut()?;
        session.breakpoints.apply_acks(&file, &acks);
        let bp = session.breakpoints.get(&file, line).cloned().ok_or_else(|| {
            AppError::Protocol(format!(
                "breakpoint {}:{line}: runtime did not acknowledge the line",
                file.display()
            ))
        })?;
        info!(file = %file.display(), line, verified = bp.verified, "breakpoint registered");
        Ok(bp)
    }

    /// Continue until the next pause or program exit.
    ///
    /// After the debuggee has exited this keeps returning the terminal
    /// outcome without touching the runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` unless paused, `AppError::Protocol` if no
    /// pause or exit arrives within the resume timeout. The session then
    /// stays `Running`; calling `resume` or `step` again waits for the same
    /// stop without re-issuing the command.
    pub async fn resume(&mut self) -> Result<StopOutcome> {
        self.run("continue", None).await
    }

    /// Step over or into the current line.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::resume`].
    pub async fn step(&mut self, mode: StepMode) -> Result<StopOutcome> {
        self.run("step", Some(mode)).await
    }

    /// Evaluate `expression` in `frame` (default: innermost).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Evaluation` when the expression fails in the
    /// debuggee; the session remains paused.
    pub async fn inspect(&mut self, expression: &str, frame: Option<usize>) -> Result<EvalResult> {
        self.session()?.require_paused()?;
        let context = self.context(&format!("evaluate {expression:?}"));
        self.driver_mut()?
            .evaluate(expression, frame.unwrap_or(0))
            .await
            .map_err(|e| e.context(context))
    }

    /// Stack captured at the current pause, innermost first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` unless paused.
    pub fn get_stack(&self) -> Result<Vec<StackFrame>> {
        let session = self.session()?;
        session.require_paused()?;
        Ok(session.stack.clone())
    }

    /// Local variables of the innermost frame.
    ///
    /// Fetched once per pause; later calls during the same pause reuse it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` unless paused.
    pub async fn get_local_variables(&mut self) -> Result<Vec<Variable>> {
        let session = self.session()?;
        session.require_paused()?;
        if let Some(locals) = &session.locals {
            return Ok(locals.clone());
        }
        if session.stack.is_empty() {
            return Ok(Vec::new());
        }

        let context = self.context("variables");
        let driver = self.driver_mut()?;
        let scopes = driver.scopes(0).await.map_err(|e| e.context(&context))?;
        let Some(scope) = scopes
            .iter()
            .find(|s| s.is_local())
            .or_else(|| scopes.first())
        else {
            return Ok(Vec::new());
        };
        let locals = driver
            .variables(scope.reference)
            .await
            .map_err(|e| e.context(&context))?;

        self.session_mut()?.locals = Some(locals.clone());
        Ok(locals)
    }

    /// Children of the compound value behind `reference`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` unless paused and
    /// `AppError::InvalidArgument` for an unknown handle.
    pub async fn expand_variable(&mut self, reference: i64) -> Result<Vec<Variable>> {
        self.session()?.require_paused()?;
        let context = self.context(&format!("expand {reference}"));
        self.driver_mut()?
            .variables(reference)
            .await
            .map_err(|e| e.context(context))
    }

    /// Current state, breakpoints and location. Valid in every state.
    #[must_use]
    pub fn status(&self) -> StatusReport {
        match &self.session {
            None => StatusReport {
                state: SessionState::Disconnected,
                runtime: None,
                program: None,
                breakpoints: Vec::new(),
                location: None,
            },
            Some(session) => StatusReport {
                state: session.state,
                runtime: Some(session.runtime),
                program: Some(session.program.clone()),
                breakpoints: session.breakpoints.iter().cloned().collect(),
                location: session.location().cloned(),
            },
        }
    }

    /// Debuggee output captured since the last call.
    pub fn take_output(&mut self) -> Vec<String> {
        self.driver
            .as_mut()
            .map(|driver| driver.take_output())
            .unwrap_or_default()
    }

    /// Disconnect and terminate the debuggee. Idempotent.
    ///
    /// # Errors
    ///
    /// Never fails in practice; teardown problems are logged.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut driver) = self.driver.take() {
            if let Err(err) = driver.disconnect().await {
                warn!(%err, "driver disconnect failed during stop");
            }
            info!("debug session stopped");
        }
        if self.session.is_some() {
            self.mark_terminated("session stopped".into());
        }
        Ok(())
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    async fn run(&mut self, command: &str, mode: Option<StepMode>) -> Result<StopOutcome> {
        let session = self.session()?;
        if session.state == SessionState::Terminated {
            return Ok(StopOutcome::Terminated {
                reason: self
                    .terminal_reason
                    .clone()
                    .unwrap_or_else(|| "debuggee terminated".into()),
            });
        }
        let retrying = self.stop_pending && session.state == SessionState::Running;
        if !retrying {
            session.require_paused()?;
        }
        let previous = (session.state, session.stack.clone());
        let context = self.context(command);

        if retrying {
            info!(command, "waiting again for the stop of an earlier command");
        } else {
            self.session_mut()?.transition(SessionState::Running)?;
        }
        let driver = self.driver_mut()?;
        let result = match mode {
            Some(mode) => driver.step(mode).await,
            None => driver.resume().await,
        };

        self.stop_pending = result.is_err();
        match result {
            Ok(StopEvent::Paused(reason)) => self.on_paused(reason).await,
            Ok(StopEvent::Terminated(reason)) => {
                info!(reason = reason.as_str(), "debuggee terminated");
                self.mark_terminated(reason.clone());
                Ok(StopOutcome::Terminated { reason })
            }
            Err(err) => {
                if matches!(err, AppError::State(_)) && !retrying {
                    // Rejected before anything was sent to the runtime.
                    self.stop_pending = false;
                    let session = self.session_mut()?;
                    (session.state, session.stack) = previous;
                }
                Err(err.context(context))
            }
        }
    }

    async fn on_paused(&mut self, reason: PauseReason) -> Result<StopOutcome> {
        let stack = match self.driver_mut()?.stack_trace().await {
            Ok(stack) => stack,
            Err(err) => {
                warn!(%err, "failed to capture stack at pause");
                Vec::new()
            }
        };
        let session = self.session_mut()?;
        session.transition(SessionState::Paused(reason))?;
        session.stack = stack;
        Ok(StopOutcome::Paused {
            reason,
            location: session.location().cloned(),
        })
    }

    fn mark_terminated(&mut self, reason: String) {
        if let Some(session) = self.session.as_mut() {
            if session.state != SessionState::Terminated {
                session.state = SessionState::Terminated;
                session.stack.clear();
                session.locals = None;
                self.terminal_reason = Some(reason);
            }
        }
    }

    fn context(&self, command: &str) -> String {
        match self.session.as_ref().and_then(Session::location) {
            Some(StackFrame {
                file: Some(file),
                line,
                ..
            }) => format!("{command} at {}:{line}", file.display()),
            _ => command.to_owned(),
        }
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| AppError::State("expected an active session, none started".into()))
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| AppError::State("expected an active session, none started".into()))
    }

    fn driver_mut(&mut self) -> Result<&mut Box<dyn DebugDriver>> {
        self.driver
            .as_mut()
            .ok_or_else(|| AppError::State("debuggee is not connected".into()))
    }
}

/// Absolute form of `path`: canonical when it exists, else joined to the
/// working directory.
pub fn absolutize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}
