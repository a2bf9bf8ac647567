//! V8 inspector implementation of [`DebugDriver`] (Node.js).
//!
//! The debuggee is started with `--inspect-brk=0`, so it is already halted
//! before the first statement when the socket opens. Every `Debugger.paused`
//! event carries the full call stack; the driver keeps the raw frames of the
//! latest pause and answers stack, scope and evaluate queries from them.
//! Object ids are exposed to callers as small integer handles that stay
//! valid until the next resume.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{InspectorConfig, TimeoutConfig};
use crate::driver::pending::expect_success;
use crate::driver::{
    drain_stale, next_stop, DebugDriver, DriverEvent, DriverFuture, EventReceiver, LaunchTarget,
    StopWait,
};
use crate::inspector::protocol::{self, ObjectHandles};
use crate::inspector::socket::InspectorSocket;
use crate::inspector::spawner;
use crate::models::breakpoint::BreakpointAck;
use crate::models::stack::{EvalResult, Scope, StackFrame, StepMode, StopEvent, Variable};
use crate::process::terminate_child;
use crate::{AppError, Result};

/// Live transport state, present between `connect` and `disconnect`.
struct InspectorLink {
    socket: InspectorSocket,
    events: EventReceiver,
    call_frames: Vec<Value>,
    handles: ObjectHandles,
    /// `(file, line)` to `(breakpointId, verified)`.
    breakpoints: HashMap<(PathBuf, u32), (String, bool)>,
    stop_wait: StopWait,
    terminated: Option<String>,
}

/// Inspector protocol driver.
pub struct InspectorDriver {
    config: InspectorConfig,
    timeouts: TimeoutConfig,
    link: Option<InspectorLink>,
    child: Option<Child>,
    output: Vec<String>,
}

impl InspectorDriver {
    /// Create a disconnected driver.
    #[must_use]
    pub fn new(config: InspectorConfig, timeouts: TimeoutConfig) -> Self {
        Self {
            config,
            timeouts,
            link: None,
            child: None,
            output: Vec::new(),
        }
    }

    /// Attach to an inspector endpoint whose debuggee waits for a debugger.
    ///
    /// Enables the debugger and runtime domains, releases the debuggee and
    /// waits for its initial pause.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Start`] if the socket cannot be opened, a domain
    /// cannot be enabled, or the initial pause does not arrive in time.
    pub async fn connect_with_url(&mut self, url: &str) -> Result<()> {
        let launch = self.timeouts.launch();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let socket = InspectorSocket::connect(url, event_tx, launch).await?;

        for method in [
            "Debugger.enable",
            "Runtime.enable",
            "Runtime.runIfWaitingForDebugger",
        ] {
            let reply = socket
                .call(method, &json!({}), launch)
                .await
                .map_err(|e| AppError::Start(e.message().to_owned()))?;
            if let Err(msg) = reply {
                return Err(AppError::Start(format!("{method} rejected: {msg}")));
            }
        }

        let mut stop_wait = StopWait::default();
        let call_frames = match next_stop(&mut events, &mut self.output, &mut stop_wait, launch).await
        {
            Ok(DriverEvent::Paused { call_frames, .. }) => call_frames,
            Ok(DriverEvent::Terminated(reason)) => {
                return Err(AppError::Start(format!(
                    "debuggee exited before its initial pause: {reason}"
                )))
            }
            Ok(other) => {
                return Err(AppError::Start(format!("unexpected event {other:?}")));
            }
            Err(err) => return Err(AppError::Start(err.message().to_owned())),
        };

        info!(url, frames = call_frames.len(), "inspector attached, debuggee paused");
        self.link = Some(InspectorLink {
            socket,
            events,
            call_frames,
            handles: ObjectHandles::default(),
            breakpoints: HashMap::new(),
            stop_wait,
            terminated: None,
        });
        Ok(())
    }

    fn link_mut(&mut self) -> Result<&mut InspectorLink> {
        self.link
            .as_mut()
            .ok_or_else(|| AppError::State("inspector is not connected".into()))
    }

    async fn execute(&mut self, method: &str) -> Result<StopEvent> {
        let request_timeout = self.timeouts.request();
        let resume_timeout = self.timeouts.resume();
        let output = &mut self.output;
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| AppError::State("inspector is not connected".into()))?;

        if let Some(reason) = &link.terminated {
            return Ok(StopEvent::Terminated(reason.clone()));
        }
        if let Some(reason) = drain_stale(&mut link.events, output, &mut link.stop_wait) {
            link.terminated = Some(reason.clone());
            return Ok(StopEvent::Terminated(reason));
        }

        // A timed-out resume or step is still in flight: wait for its stop.
        if !link.stop_wait.is_outstanding() {
            let reply = link.socket.call(method, &json!({}), request_timeout).await?;
            expect_success(reply, method)?;
            link.call_frames.clear();
            link.handles.clear();
        }

        match next_stop(&mut link.events, output, &mut link.stop_wait, resume_timeout).await? {
            DriverEvent::Paused {
                reason,
                call_frames,
                ..
            } => {
                link.call_frames = call_frames;
                Ok(StopEvent::Paused(reason))
            }
            DriverEvent::Terminated(reason) => {
                link.terminated = Some(reason.clone());
                Ok(StopEvent::Terminated(reason))
            }
            other => Err(AppError::Protocol(format!("unexpected event {other:?}"))),
        }
    }

    fn frame(&self, frame_index: usize) -> Result<&Value> {
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| AppError::State("inspector is not connected".into()))?;
        if link.call_frames.is_empty() {
            return Err(AppError::State("debuggee is not paused".into()));
        }
        link.call_frames.get(frame_index).ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "frame {frame_index} out of range ({} frames)",
                link.call_frames.len()
            ))
        })
    }
}

impl DebugDriver for InspectorDriver {
    fn connect<'a>(&'a mut self, target: &'a LaunchTarget) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            if self.link.is_some() {
                return Err(AppError::State("inspector already connected".into()));
            }
            let node = spawner::spawn_node(&self.config, target, self.timeouts.launch()).await?;
            self.child = Some(node.child);
            if let Err(err) = self.connect_with_url(&node.ws_url).await {
                if let Some(mut child) = self.child.take() {
                    terminate_child(&mut child, self.timeouts.disconnect(), "node").await;
                }
                return Err(err);
            }
            Ok(())
        })
    }

    fn set_breakpoint<'a>(
        &'a mut self,
        file: &'a Path,
        line: u32,
    ) -> DriverFuture<'a, Vec<BreakpointAck>> {
        Box::pin(async move {
            let wire_line = protocol::to_wire_line(line)?;
            let timeout = self.timeouts.request();
            let link = self.link_mut()?;

            let key = (file.to_path_buf(), line);
            if let Some((id, verified)) = link.breakpoints.get_mut(&key) {
                // Set before its script loaded; bound once the script parsed.
                *verified = *verified || link.socket.is_resolved(id);
                return Ok(vec![BreakpointAck {
                    line,
                    id: id.clone(),
                    verified: *verified,
                }]);
            }

            let params = json!({
                "lineNumber": wire_line,
                "url": protocol::file_url(file),
                "columnNumber": 0,
            });
            let reply = link
                .socket
                .call("Debugger.setBreakpointByUrl", &params, timeout)
                .await?;
            let body = expect_success(reply, "Debugger.setBreakpointByUrl")?;
            let id = body
                .get("breakpointId")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    AppError::Protocol("setBreakpointByUrl response has no breakpointId".into())
                })?
                .to_owned();
            let verified = body
                .get("locations")
                .and_then(Value::as_array)
                .is_some_and(|locations| !locations.is_empty());

            debug!(id = id.as_str(), verified, "inspector breakpoint registered");
            link.breakpoints.insert(key, (id.clone(), verified));
            Ok(vec![BreakpointAck { line, id, verified }])
        })
    }

    fn resume(&mut self) -> DriverFuture<'_, StopEvent> {
        Box::pin(self.execute("Debugger.resume"))
    }

    fn step(&mut self, mode: StepMode) -> DriverFuture<'_, StopEvent> {
        let method = match mode {
            StepMode::Over => "Debugger.stepOver",
            StepMode::Into => "Debugger.stepInto",
        };
        Box::pin(self.execute(method))
    }

    fn evaluate<'a>(
        &'a mut self,
        expression: &'a str,
        frame_index: usize,
    ) -> DriverFuture<'a, EvalResult> {
        Box::pin(async move {
            let call_frame_id = self
                .frame(frame_index)?
                .get("callFrameId")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::Protocol("call frame has no callFrameId".into()))?
                .to_owned();
            let timeout = self.timeouts.request();
            let link = self.link_mut()?;

            let params = json!({
                "callFrameId": call_frame_id,
                "expression": expression,
                "generatePreview": true,
            });
            let reply = link
                .socket
                .call("Debugger.evaluateOnCallFrame", &params, timeout)
                .await?;
            let body = expect_success(reply, "Debugger.evaluateOnCallFrame")?;

            if let Some(details) = body.get("exceptionDetails") {
                let text = details
                    .pointer("/exception/description")
                    .or_else(|| details.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or("evaluation threw");
                return Err(AppError::Evaluation(text.to_owned()));
            }

            let result = body.get("result").unwrap_or(&Value::Null);
            Ok(EvalResult {
                value: protocol::display_value(result),
                type_name: protocol::type_tag(result),
                reference: result
                    .get("objectId")
                    .and_then(Value::as_str)
                    .map(|id| link.handles.intern(id)),
            })
        })
    }

    fn stack_trace(&mut self) -> DriverFuture<'_, Vec<StackFrame>> {
        Box::pin(async move {
            let link = self.link_mut()?;
            Ok(protocol::stack_frames(&link.call_frames))
        })
    }

    fn scopes(&mut self, frame_index: usize) -> DriverFuture<'_, Vec<Scope>> {
        Box::pin(async move {
            let chain: Vec<(String, String)> = self
                .frame(frame_index)?
                .get("scopeChain")
                .and_then(Value::as_array)
                .map(|chain| {
                    chain
                        .iter()
                        .filter_map(|scope| {
                            let kind = scope.get("type").and_then(Value::as_str)?;
                            let id = scope.pointer("/object/objectId").and_then(Value::as_str)?;
                            Some((capitalize(kind), id.to_owned()))
                        })
                        .collect()
                })
                .unwrap_or_default();

            let link = self.link_mut()?;
            Ok(chain
                .into_iter()
                .map(|(name, id)| Scope {
                    name,
                    reference: link.handles.intern(&id),
                })
                .collect())
        })
    }

    fn variables(&mut self, reference: i64) -> DriverFuture<'_, Vec<Variable>> {
        Box::pin(async move {
            let timeout = self.timeouts.request();
            let link = self.link_mut()?;
            let object_id = link
                .handles
                .resolve(reference)
                .ok_or_else(|| {
                    AppError::InvalidArgument(format!(
                        "variable reference {reference} is unknown or expired"
                    ))
                })?
                .to_owned();

            let params = json!({
                "objectId": object_id,
                "ownProperties": true,
                "generatePreview": true,
            });
            let reply = link
                .socket
                .call("Runtime.getProperties", &params, timeout)
                .await?;
            let body = expect_success(reply, "Runtime.getProperties")?;
            let vars = body
                .get("result")
                .and_then(Value::as_array)
                .map(|props| {
                    props
                        .iter()
                        .filter_map(|prop| protocol::property_variable(prop, &mut link.handles))
                        .collect()
                })
                .unwrap_or_default();
            Ok(vars)
        })
    }

    fn disconnect(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            if let Some(link) = self.link.take() {
                link.socket.close().await;
            }
            if let Some(mut child) = self.child.take() {
                terminate_child(&mut child, self.timeouts.disconnect(), "node").await;
            }
            Ok(())
        })
    }

    fn take_output(&mut self) -> Vec<String> {
        if let Some(link) = self.link.as_mut() {
            if let Some(reason) = drain_stale(&mut link.events, &mut self.output, &mut link.stop_wait)
            {
                link.terminated.get_or_insert(reason);
            }
        }
        std::mem::take(&mut self.output)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
