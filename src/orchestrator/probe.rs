//! One-shot probe: start, break once, capture, tear down.

use std::path::{Path, PathBuf};

use tracing::{info, info_span, warn, Instrument};

use crate::models::session::SessionState;
use crate::models::stack::{StackFrame, StopOutcome, Variable};
use crate::orchestrator::debug_session::DebugSession;
use crate::runtime::RuntimeKind;
use crate::{AppError, Result};

/// Everything captured by a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Probed file, as requested.
    pub file: PathBuf,
    /// Probed line, as requested (1-based).
    pub line: u32,
    /// Where the run stopped.
    pub outcome: StopOutcome,
    /// Stack at the stop; empty if the program ran to completion.
    pub stack: Vec<StackFrame>,
    /// Locals of the innermost frame; empty if the program ran to completion.
    pub variables: Vec<Variable>,
    /// Debuggee output captured during the run.
    pub output: Vec<String>,
}

impl ProbeReport {
    /// Whether the debuggee halted before exiting.
    #[must_use]
    pub fn hit(&self) -> bool {
        !self.outcome.is_terminated()
    }
}

impl DebugSession {
    /// Run `program` to `file:line`, capture stack and locals, then stop.
    ///
    /// `stop` runs whatever happens, so no debuggee outlives the call.
    ///
    /// # Errors
    ///
    /// Propagates the first failure of start, breakpoint registration,
    /// resume or capture. Reaching the end of the program without hitting
    /// the line is not an error.
    pub async fn probe(
        &mut self,
        program: &Path,
        runtime: RuntimeKind,
        file: &Path,
        line: u32,
    ) -> Result<ProbeReport> {
        let state = self.state();
        if !matches!(state, SessionState::Disconnected | SessionState::Terminated) {
            return Err(AppError::State(format!(
                "expected an idle session for probe, session is {state}"
            )));
        }

        let span = info_span!("probe", runtime = %runtime, file = %file.display(), line);
        async {
            let result = self.probe_inner(program, runtime, file, line).await;
            let output = self.take_output();
            if let Err(err) = self.stop().await {
                warn!(%err, "stop after probe failed");
            }
            let mut report = result?;
            report.output.extend(output);
            info!(hit = report.hit(), "probe finished");
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn probe_inner(
        &mut self,
        program: &Path,
        runtime: RuntimeKind,
        file: &Path,
        line: u32,
    ) -> Result<ProbeReport> {
        self.start(program, runtime).await?;
        self.add_breakpoint(file, line).await?;
        let outcome = self.resume().await?;

        let (stack, variables) = if outcome.is_terminated() {
            (Vec::new(), Vec::new())
        } else {
            (self.get_stack()?, self.get_local_variables().await?)
        };

        Ok(ProbeReport {
            file: file.to_path_buf(),
            line,
            outcome,
            stack,
            variables,
            output: Vec::new(),
        })
    }
}

/// Split a `file:line` probe target.
///
/// The last colon separates the line, so Windows drive letters survive.
///
/// # Errors
///
/// Returns `AppError::InvalidArgument` if there is no colon, the file part
/// is empty, or the line is not a positive integer.
pub fn parse_location(target: &str) -> Result<(PathBuf, u32)> {
    let (file, line) = target.rsplit_once(':').ok_or_else(|| {
        AppError::InvalidArgument(format!("expected <file>:<line>, got {target:?}"))
    })?;
    if file.is_empty() {
        return Err(AppError::InvalidArgument(format!(
            "missing file in {target:?}"
        )));
    }
    let line: u32 = line
        .trim()
        .parse()
        .map_err(|_| AppError::InvalidArgument(format!("invalid line number in {target:?}")))?;
    if line == 0 {
        return Err(AppError::InvalidArgument(
            "line numbers start at 1".into(),
        ));
    }
    Ok((PathBuf::from(file), line))
}
