//! Shared test helpers for session-level integration tests.
//!
//! Provides a scripted [`DebugDriver`] so orchestrator, probe and daemon
//! tests can drive a [`DebugSession`] without launching a real runtime.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use debug_bridge::config::DebugConfig;
use debug_bridge::driver::{DebugDriver, DriverFactory, DriverFuture, LaunchTarget};
use debug_bridge::models::breakpoint::BreakpointAck;
use debug_bridge::models::stack::{
    EvalResult, PauseReason, Scope, StackFrame, StepMode, StopEvent, Variable,
};
use debug_bridge::orchestrator::debug_session::DebugSession;
use debug_bridge::runtime::RuntimeKind;
use debug_bridge::{AppError, Result};
use tempfile::TempDir;

/// One scripted reply to `resume` or `step`.
pub struct ScriptedStop {
    pub event: Result<StopEvent>,
    /// Stack reported after the stop.
    pub stack: Vec<StackFrame>,
}

/// Behaviour and call log shared between a test and its mock drivers.
#[derive(Default)]
pub struct Script {
    pub connect_error: Option<AppError>,
    pub entry_stack: Vec<StackFrame>,
    pub stops: VecDeque<ScriptedStop>,
    pub verify_breakpoints: bool,
    pub evaluations: HashMap<String, EvalResult>,
    pub locals: Vec<Variable>,
    pub children: HashMap<i64, Vec<Variable>>,
    pub output: Vec<String>,

    pub calls: Vec<String>,
    pub disconnects: usize,
    current_stack: Vec<StackFrame>,
    next_breakpoint: u32,
}

pub type SharedScript = Arc<Mutex<Script>>;

impl Script {
    /// Script for a program paused at `entry_line` of `program`.
    pub fn paused_at(program: &Path, entry_line: u32) -> Self {
        Self {
            entry_stack: vec![frame(0, "<module>", program, entry_line)],
            verify_breakpoints: true,
            ..Self::default()
        }
    }

    pub fn push_pause(&mut self, reason: PauseReason, stack: Vec<StackFrame>) {
        self.stops.push_back(ScriptedStop {
            event: Ok(StopEvent::Paused(reason)),
            stack,
        });
    }

    pub fn push_exit(&mut self, reason: &str) {
        self.stops.push_back(ScriptedStop {
            event: Ok(StopEvent::Terminated(reason.to_owned())),
            stack: Vec::new(),
        });
    }

    pub fn push_error(&mut self, err: AppError) {
        self.stops.push_back(ScriptedStop {
            event: Err(err),
            stack: Vec::new(),
        });
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(call)).count()
    }

    fn next_stop(&mut self, call: String) -> Result<StopEvent> {
        self.calls.push(call);
        let stop = self.stops.pop_front().unwrap_or(ScriptedStop {
            event: Ok(StopEvent::Terminated("exited with code 0".into())),
            stack: Vec::new(),
        });
        self.current_stack = stop.stack;
        stop.event
    }
}

/// Scripted driver; every call is answered from the shared [`Script`].
pub struct MockDriver {
    script: SharedScript,
}

impl DebugDriver for MockDriver {
    fn connect<'a>(&'a mut self, target: &'a LaunchTarget) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            script
                .calls
                .push(format!("connect {}", target.program.display()));
            if let Some(err) = script.connect_error.take() {
                return Err(err);
            }
            script.current_stack = script.entry_stack.clone();
            Ok(())
        })
    }

    fn set_breakpoint<'a>(
        &'a mut self,
        file: &'a Path,
        line: u32,
    ) -> DriverFuture<'a, Vec<BreakpointAck>> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            script
                .calls
                .push(format!("breakpoint {}:{line}", file.display()));
            script.next_breakpoint += 1;
            Ok(vec![BreakpointAck {
                line,
                id: script.next_breakpoint.to_string(),
                verified: script.verify_breakpoints,
            }])
        })
    }

    fn resume(&mut self) -> DriverFuture<'_, StopEvent> {
        Box::pin(async move { self.script.lock().unwrap().next_stop("resume".into()) })
    }

    fn step(&mut self, mode: StepMode) -> DriverFuture<'_, StopEvent> {
        Box::pin(async move {
            self.script
                .lock()
                .unwrap()
                .next_stop(format!("step {mode:?}"))
        })
    }

    fn evaluate<'a>(
        &'a mut self,
        expression: &'a str,
        frame_index: usize,
    ) -> DriverFuture<'a, EvalResult> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            script
                .calls
                .push(format!("evaluate {expression} @{frame_index}"));
            script.evaluations.get(expression).cloned().ok_or_else(|| {
                AppError::Evaluation(format!("NameError: name '{expression}' is not defined"))
            })
        })
    }

    fn stack_trace(&mut self) -> DriverFuture<'_, Vec<StackFrame>> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            script.calls.push("stack".into());
            Ok(script.current_stack.clone())
        })
    }

    fn scopes(&mut self, frame_index: usize) -> DriverFuture<'_, Vec<Scope>> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            script.calls.push(format!("scopes {frame_index}"));
            Ok(vec![
                Scope {
                    name: "Globals".into(),
                    reference: 2,
                },
                Scope {
                    name: "Locals".into(),
                    reference: 1,
                },
            ])
        })
    }

    fn variables(&mut self, reference: i64) -> DriverFuture<'_, Vec<Variable>> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            script.calls.push(format!("variables {reference}"));
            if reference == 1 {
                return Ok(script.locals.clone());
            }
            script.children.get(&reference).cloned().ok_or_else(|| {
                AppError::InvalidArgument(format!("unknown variable reference {reference}"))
            })
        })
    }

    fn disconnect(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            script.calls.push("disconnect".into());
            script.disconnects += 1;
            Ok(())
        })
    }

    fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.script.lock().unwrap().output)
    }
}

/// Factory that hands out mock drivers sharing `script`.
pub fn mock_factory(script: &SharedScript) -> DriverFactory {
    let script = Arc::clone(script);
    Arc::new(move |_kind: RuntimeKind, _config: &DebugConfig| {
        Box::new(MockDriver {
            script: Arc::clone(&script),
        }) as Box<dyn DebugDriver>
    })
}

/// Session wired to a mock driver.
pub fn mock_session(script: Script) -> (DebugSession, SharedScript) {
    let shared = Arc::new(Mutex::new(script));
    let session = DebugSession::with_factory(DebugConfig::default(), mock_factory(&shared));
    (session, shared)
}

/// Write a throwaway program file and return its canonical path.
pub fn program_file(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, "// test program\n").expect("write program");
    std::fs::canonicalize(&path).expect("canonical program path")
}

pub fn frame(index: usize, name: &str, file: &Path, line: u32) -> StackFrame {
    StackFrame {
        index,
        name: name.into(),
        file: Some(file.to_path_buf()),
        line,
    }
}

pub fn variable(name: &str, type_name: &str, value: &str, reference: Option<i64>) -> Variable {
    Variable {
        name: name.into(),
        type_name: type_name.into(),
        value: value.into(),
        reference,
    }
}
