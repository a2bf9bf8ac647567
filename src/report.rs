//! Plain-text rendering of session results.
//!
//! The daemon replies with these strings and the CLI prints them verbatim.

use std::fmt::Write as _;
use std::path::Path;

use crate::models::breakpoint::Breakpoint;
use crate::models::stack::{EvalResult, StackFrame, StopOutcome, Variable};
use crate::orchestrator::debug_session::StatusReport;
use crate::orchestrator::probe::ProbeReport;
use crate::runtime::RuntimeKind;

/// Session started.
#[must_use]
pub fn started(runtime: RuntimeKind, program: &Path, outcome: &StopOutcome) -> String {
    format!(
        "Started {runtime} session for {}\n{}",
        program.display(),
        outcome_line(outcome)
    )
}

/// Breakpoint registration.
#[must_use]
pub fn breakpoint(bp: &Breakpoint) -> String {
    format!(
        "Breakpoint {} at {}:{} ({})",
        bp.id,
        bp.file.display(),
        bp.line,
        if bp.verified { "verified" } else { "pending" }
    )
}

/// Result of `continue` or `step`, with any output produced on the way.
#[must_use]
pub fn stop_outcome(outcome: &StopOutcome, output: &[String]) -> String {
    let mut text = outcome_line(outcome);
    push_output(&mut text, output);
    text
}

/// One-line summary of a stop.
#[must_use]
pub fn outcome_line(outcome: &StopOutcome) -> String {
    match outcome {
        StopOutcome::Paused {
            reason,
            location: Some(frame),
        } => format!("Paused ({}) at {}", reason.as_str(), frame_location(frame)),
        StopOutcome::Paused {
            reason,
            location: None,
        } => format!("Paused ({})", reason.as_str()),
        StopOutcome::Terminated { reason } => format!("Program terminated: {reason}"),
    }
}

/// Call stack, one frame per line.
#[must_use]
pub fn stack(frames: &[StackFrame]) -> String {
    if frames.is_empty() {
        return "(no frames)".into();
    }
    frames
        .iter()
        .map(|f| format!("#{:<2} {}", f.index, frame_location(f)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Variables, one per line.
#[must_use]
pub fn variables(vars: &[Variable]) -> String {
    if vars.is_empty() {
        return "(no variables)".into();
    }
    vars.iter().map(variable_line).collect::<Vec<_>>().join("\n")
}

/// Expression result.
#[must_use]
pub fn evaluation(result: &EvalResult) -> String {
    let mut text = result.value.clone();
    if !result.type_name.is_empty() {
        let _ = write!(text, " ({})", result.type_name);
    }
    if let Some(reference) = result.reference {
        let _ = write!(text, " [ref {reference}]");
    }
    text
}

/// Session status.
#[must_use]
pub fn status(report: &StatusReport) -> String {
    let mut text = format!("State: {}", report.state);
    if let (Some(runtime), Some(program)) = (report.runtime, &report.program) {
        let _ = write!(text, "\nProgram: {} ({runtime})", program.display());
    }
    if let Some(frame) = &report.location {
        let _ = write!(text, "\nLocation: {}", frame_location(frame));
    }
    if report.breakpoints.is_empty() {
        text.push_str("\nBreakpoints: none");
    } else {
        text.push_str("\nBreakpoints:");
        for bp in &report.breakpoints {
            let _ = write!(text, "\n  {}", breakpoint(bp));
        }
    }
    text
}

/// Probe snapshot.
#[must_use]
pub fn probe(report: &ProbeReport) -> String {
    let mut text = format!("Probe {}:{}\n", report.file.display(), report.line);
    text.push_str(&outcome_line(&report.outcome));
    if report.hit() {
        text.push_str("\n\nStack:\n");
        text.push_str(&stack(&report.stack));
        text.push_str("\n\nLocals:\n");
        text.push_str(&variables(&report.variables));
    } else {
        text.push_str("\nThe line was not reached before the program exited.");
    }
    push_output(&mut text, &report.output);
    text
}

fn frame_location(frame: &StackFrame) -> String {
    match &frame.file {
        Some(file) => format!("{} ({}:{})", frame.name, file.display(), frame.line),
        None => format!("{} (line {})", frame.name, frame.line),
    }
}

fn variable_line(var: &Variable) -> String {
    let mut line = if var.type_name.is_empty() {
        format!("{} = {}", var.name, var.value)
    } else {
        format!("{}: {} = {}", var.name, var.type_name, var.value)
    };
    if let Some(reference) = var.reference {
        let _ = write!(line, " [ref {reference}]");
    }
    line
}

fn push_output(text: &mut String, output: &[String]) {
    if output.is_empty() {
        return;
    }
    text.push_str("\n\nOutput:");
    for line in output {
        text.push('\n');
        text.push_str(line);
    }
}
