//! Debug adapter implementation of [`DebugDriver`] (Python via `debugpy`).
//!
//! Spawns the adapter, runs the reader and writer tasks over its stdio, and
//! correlates every request with its response through [`PendingRequests`].
//!
//! # Session lifecycle
//!
//! 1. [`DebugDriver::connect`] performs `initialize`, dispatches `launch`
//!    without awaiting it, and waits for the `initialized` event. The
//!    debuggee is configured but has not run any code: this is the
//!    driver's initial pause.
//! 2. [`DebugDriver::set_breakpoint`] re-sends the complete line set of the
//!    affected file, since `setBreakpoints` replaces a file's breakpoints.
//! 3. The first [`DebugDriver::resume`] sends `configurationDone`, then
//!    collects the deferred `launch` response, then waits for a stop.
//! 4. Stack, scope, variable and evaluate requests are keyed by the numeric
//!    frame ids of the most recent `stackTrace`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{handshake, reader, spawner, writer};
use crate::config::{AdapterConfig, TimeoutConfig};
use crate::driver::pending::{await_reply, expect_success, PendingRequests, Reply};
use crate::driver::{
    drain_stale, next_stop, DebugDriver, DriverEvent, DriverFuture, EventReceiver, LaunchTarget,
    StopWait,
};
use crate::models::breakpoint::BreakpointAck;
use crate::models::stack::{EvalResult, Scope, StackFrame, StepMode, StopEvent, Variable};
use crate::process::terminate_child;
use crate::{AppError, Result};

/// Maximum frames requested per `stackTrace`.
const STACK_LEVELS: u64 = 20;

/// Live transport state, present between `connect` and `disconnect`.
struct AdapterLink {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingRequests,
    events: EventReceiver,
    cancel: CancellationToken,
    /// Deferred `launch` response, collected after `configurationDone`.
    launch: Option<oneshot::Receiver<Reply>>,
    configured: bool,
    lines: BTreeMap<PathBuf, BTreeSet<u32>>,
    thread_id: Option<i64>,
    frame_ids: Vec<i64>,
    stop_wait: StopWait,
    terminated: Option<String>,
}

impl Drop for AdapterLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Debug adapter protocol driver.
pub struct AdapterDriver {
    config: AdapterConfig,
    timeouts: TimeoutConfig,
    link: Option<AdapterLink>,
    child: Option<Child>,
    output: Vec<String>,
}

impl AdapterDriver {
    /// Create a disconnected driver.
    #[must_use]
    pub fn new(config: AdapterConfig, timeouts: TimeoutConfig) -> Self {
        Self {
            config,
            timeouts,
            link: None,
            child: None,
            output: Vec::new(),
        }
    }

    /// Run the handshake over already-open adapter streams.
    ///
    /// [`DebugDriver::connect`] calls this with the spawned adapter's stdio;
    /// it is public so an adapter reachable by other means can be driven too.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Start`] if `initialize` or `launch` is rejected,
    /// or `initialized` does not arrive within the launch timeout.
    pub async fn connect_with_streams<R, W>(
        &mut self,
        stdout: R,
        stdin: W,
        target: &LaunchTarget,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let pending = PendingRequests::new();
        let cancel = CancellationToken::new();

        tokio::spawn(reader::run_reader(
            stdout,
            pending.clone(),
            event_tx,
            cancel.clone(),
        ));
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if let Err(err) = writer::run_writer(stdin, outbound_rx, cancel).await {
                    warn!(%err, "adapter writer stopped");
                }
            }
        });

        let mut link = AdapterLink {
            outbound,
            pending,
            events,
            cancel,
            launch: None,
            configured: false,
            lines: BTreeMap::new(),
            thread_id: None,
            frame_ids: Vec::new(),
            stop_wait: StopWait::default(),
            terminated: None,
        };

        let init = request(
            &link,
            "initialize",
            &handshake::initialize_arguments(),
            self.timeouts.launch(),
        )
        .await
        .map_err(|e| AppError::Start(e.message().to_owned()))?;
        if let Err(msg) = init {
            return Err(AppError::Start(format!("initialize rejected: {msg}")));
        }

        let launch_rx = dispatch(
            &link,
            "launch",
            &handshake::launch_arguments(target, &self.config),
        )
        .await?;

        let early_launch = wait_initialized(&mut link, &mut self.output, launch_rx, &self.timeouts)
            .await?;
        link.launch = early_launch;

        info!(program = %target.program.display(), "debug adapter initialised");
        self.link = Some(link);
        Ok(())
    }

    fn link_mut(&mut self) -> Result<&mut AdapterLink> {
        self.link
            .as_mut()
            .ok_or_else(|| AppError::State("adapter is not connected".into()))
    }

    /// Split borrow of the live link and the output buffer.
    fn parts(&mut self) -> Result<(&mut AdapterLink, &mut Vec<String>)> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| AppError::State("adapter is not connected".into()))?;
        Ok((link, &mut self.output))
    }

    /// Issue an execution command, then wait for the resulting stop.
    ///
    /// While an earlier command's wait is still outstanding nothing new is
    /// sent; the call waits for that command's stop instead.
    async fn execute(&mut self, command: &str, arguments: Value) -> Result<StopEvent> {
        let request_timeout = self.timeouts.request();
        {
            let (link, output) = self.parts()?;
            if let Some(reason) = &link.terminated {
                return Ok(StopEvent::Terminated(reason.clone()));
            }
            if let Some(reason) = drain_stale(&mut link.events, output, &mut link.stop_wait) {
                link.terminated = Some(reason.clone());
                return Ok(StopEvent::Terminated(reason));
            }

            if link.stop_wait.is_outstanding() {
                debug!(command, "waiting again for the outstanding stop");
            } else {
                let reply = request(link, command, &arguments, request_timeout).await?;
                expect_success(reply, command)?;
                link.frame_ids.clear();
            }
        }
        self.wait_stop().await
    }

    /// First resume: release the debuggee, then wait for the first stop.
    async fn start_running(&mut self) -> Result<StopEvent> {
        {
            let (link, output) = self.parts()?;
            if let Some(reason) = drain_stale(&mut link.events, output, &mut link.stop_wait) {
                link.terminated = Some(reason.clone());
                return Ok(StopEvent::Terminated(reason));
            }
        }
        self.finish_configuration().await?;
        self.wait_stop().await
    }

    async fn wait_stop(&mut self) -> Result<StopEvent> {
        let timeout = self.timeouts.resume();
        let (link, output) = self.parts()?;
        match next_stop(&mut link.events, output, &mut link.stop_wait, timeout).await? {
            DriverEvent::Paused {
                reason, thread_id, ..
            } => {
                link.thread_id = thread_id.or(link.thread_id);
                Ok(StopEvent::Paused(reason))
            }
            DriverEvent::Terminated(reason) => {
                link.terminated = Some(reason.clone());
                Ok(StopEvent::Terminated(reason))
            }
            other => Err(AppError::Protocol(format!("unexpected event {other:?}"))),
        }
    }

    /// Send `configurationDone` and collect the deferred `launch` reply.
    async fn finish_configuration(&mut self) -> Result<()> {
        let request_timeout = self.timeouts.request();
        let launch_timeout = self.timeouts.launch();
        let link = self.link_mut()?;

        let reply = request(link, "configurationDone", &json!({}), request_timeout).await?;
        expect_success(reply, "configurationDone")?;
        link.configured = true;

        if let Some(launch_rx) = link.launch.take() {
            let reply = await_reply(launch_rx, launch_timeout, "launch").await?;
            expect_success(reply, "launch")?;
        }
        debug!("adapter configuration done");
        Ok(())
    }

    fn thread_id(&self) -> Result<i64> {
        self.link
            .as_ref()
            .and_then(|link| link.thread_id)
            .ok_or_else(|| AppError::State("no stopped thread; continue to a breakpoint first".into()))
    }

    fn frame_id(&self, frame_index: usize) -> Result<i64> {
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| AppError::State("adapter is not connected".into()))?;
        link.frame_ids.get(frame_index).copied().ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "frame {frame_index} out of range ({} frames)",
                link.frame_ids.len()
            ))
        })
    }

    async fn ensure_frames(&mut self) -> Result<()> {
        let empty = self.link.as_ref().is_some_and(|link| link.frame_ids.is_empty());
        if empty {
            self.fetch_stack().await?;
        }
        Ok(())
    }

    async fn fetch_stack(&mut self) -> Result<Vec<StackFrame>> {
        let configured = self.link.as_ref().is_some_and(|link| link.configured);
        if !configured {
            return Ok(Vec::new());
        }
        let thread_id = self.thread_id()?;
        let timeout = self.timeouts.request();
        let link = self.link_mut()?;

        let reply = request(
            link,
            "stackTrace",
            &json!({ "threadId": thread_id, "startFrame": 0, "levels": STACK_LEVELS }),
            timeout,
        )
        .await?;
        let body = expect_success(reply, "stackTrace")?;
        let raw = body
            .get("stackFrames")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::Protocol("stackTrace response has no stackFrames".into()))?;

        let mut frames = Vec::with_capacity(raw.len());
        link.frame_ids.clear();
        for (index, frame) in raw.iter().enumerate() {
            let id = frame
                .get("id")
                .and_then(Value::as_i64)
                .ok_or_else(|| AppError::Protocol("stack frame without id".into()))?;
            link.frame_ids.push(id);
            frames.push(parse_frame(index, frame));
        }
        Ok(frames)
    }
}

impl DebugDriver for AdapterDriver {
    fn connect<'a>(&'a mut self, target: &'a LaunchTarget) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            if self.link.is_some() {
                return Err(AppError::State("adapter already connected".into()));
            }
            let process = spawner::spawn_adapter(&self.config, &target.cwd)?;
            self.child = Some(process.child);
            if let Err(err) = self
                .connect_with_streams(process.stdout, process.stdin, target)
                .await
            {
                self.link = None;
                if let Some(mut child) = self.child.take() {
                    terminate_child(&mut child, self.timeouts.disconnect(), "adapter").await;
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
            let timeout = self.timeouts.request();
            let link = self.link_mut()?;

            let set = link.lines.entry(file.to_path_buf()).or_default();
            let inserted = set.insert(line);
            let lines: Vec<u32> = set.iter().copied().collect();

            let result = request(
                link,
                "setBreakpoints",
                &handshake::set_breakpoints_arguments(file, &lines),
                timeout,
            )
            .await
            .and_then(|reply| expect_success(reply, "setBreakpoints"))
            .and_then(|body| parse_breakpoint_acks(file, &lines, &body));

            if result.is_err() && inserted {
                if let Some(set) = link.lines.get_mut(file) {
                    set.remove(&line);
                }
            }
            result
        })
    }

    fn resume(&mut self) -> DriverFuture<'_, StopEvent> {
        Box::pin(async move {
            let link = self.link_mut()?;
            if link.terminated.is_none() && !link.configured {
                return self.start_running().await;
            }
            let thread_id = link.thread_id.unwrap_or(0);
            self.execute("continue", json!({ "threadId": thread_id }))
                .await
        })
    }

    fn step(&mut self, mode: StepMode) -> DriverFuture<'_, StopEvent> {
        Box::pin(async move {
            let link = self.link_mut()?;
            if let Some(reason) = &link.terminated {
                return Ok(StopEvent::Terminated(reason.clone()));
            }
            if !link.configured {
                return Err(AppError::State(
                    "program has not started; continue to a breakpoint before stepping".into(),
                ));
            }
            let thread_id = self.thread_id()?;
            let command = match mode {
                StepMode::Over => "next",
                StepMode::Into => "stepIn",
            };
            self.execute(command, json!({ "threadId": thread_id })).await
        })
    }

    fn evaluate<'a>(
        &'a mut self,
        expression: &'a str,
        frame_index: usize,
    ) -> DriverFuture<'a, EvalResult> {
        Box::pin(async move {
            self.ensure_frames().await?;
            let frame_id = match self.frame_id(frame_index) {
                Ok(id) => id,
                Err(_) if self.link.as_ref().is_some_and(|l| !l.configured) => {
                    return Err(AppError::State(
                        "program has not started; no frame to evaluate in".into(),
                    ))
                }
                Err(err) => return Err(err),
            };
            let timeout = self.timeouts.request();
            let link = self.link_mut()?;
            let reply = request(
                link,
                "evaluate",
                &json!({ "expression": expression, "frameId": frame_id, "context": "repl" }),
                timeout,
            )
            .await?;
            let body = reply.map_err(AppError::Evaluation)?;
            Ok(EvalResult {
                value: str_field(&body, "result"),
                type_name: str_field(&body, "type"),
                reference: reference_field(&body),
            })
        })
    }

    fn stack_trace(&mut self) -> DriverFuture<'_, Vec<StackFrame>> {
        Box::pin(self.fetch_stack())
    }

    fn scopes(&mut self, frame_index: usize) -> DriverFuture<'_, Vec<Scope>> {
        Box::pin(async move {
            self.ensure_frames().await?;
            let frame_id = self.frame_id(frame_index)?;
            let timeout = self.timeouts.request();
            let link = self.link_mut()?;
            let reply = request(link, "scopes", &json!({ "frameId": frame_id }), timeout).await?;
            let body = expect_success(reply, "scopes")?;
            let scopes = body
                .get("scopes")
                .and_then(Value::as_array)
                .map(|raw| {
                    raw.iter()
                        .map(|scope| Scope {
                            name: str_field(scope, "name"),
                            reference: scope
                                .get("variablesReference")
                                .and_then(Value::as_i64)
                                .unwrap_or(0),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(scopes)
        })
    }

    fn variables(&mut self, reference: i64) -> DriverFuture<'_, Vec<Variable>> {
        Box::pin(async move {
            if reference <= 0 {
                return Err(AppError::InvalidArgument(format!(
                    "variable reference {reference} is not expandable"
                )));
            }
            let timeout = self.timeouts.request();
            let link = self.link_mut()?;
            let reply = request(
                link,
                "variables",
                &json!({ "variablesReference": reference }),
                timeout,
            )
            .await?;
            let body = expect_success(reply, "variables")?;
            let vars = body
                .get("variables")
                .and_then(Value::as_array)
                .map(|raw| {
                    raw.iter()
                        .map(|var| Variable {
                            name: str_field(var, "name"),
                            type_name: str_field(var, "type"),
                            value: str_field(var, "value"),
                            reference: reference_field(var),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(vars)
        })
    }

    fn disconnect(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            if let Some(link) = self.link.take() {
                if link.terminated.is_none() {
                    let args = json!({ "terminateDebuggee": true });
                    match request(&link, "disconnect", &args, self.timeouts.disconnect()).await {
                        Ok(Ok(_)) => debug!("adapter acknowledged disconnect"),
                        Ok(Err(msg)) => warn!(msg, "adapter rejected disconnect"),
                        Err(err) => warn!(%err, "disconnect request failed"),
                    }
                }
                link.pending.close().await;
                drop(link);
            }
            if let Some(mut child) = self.child.take() {
                terminate_child(&mut child, self.timeouts.disconnect(), "adapter").await;
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

// ── Private helpers ───────────────────────────────────────────────────────────

/// Register and send a request without waiting for its reply.
async fn dispatch(
    link: &AdapterLink,
    command: &str,
    arguments: &Value,
) -> Result<oneshot::Receiver<Reply>> {
    let (seq, rx) = link.pending.register().await?;
    debug!(seq, command, "-> adapter request");
    link.outbound
        .send(handshake::request_body(seq, command, arguments))
        .map_err(|_| AppError::Protocol("adapter writer closed".into()))?;
    Ok(rx)
}

/// Send a request and wait for its reply.
async fn request(
    link: &AdapterLink,
    command: &str,
    arguments: &Value,
    timeout: std::time::Duration,
) -> Result<Reply> {
    let rx = dispatch(link, command, arguments).await?;
    await_reply(rx, timeout, command).await
}

/// Wait for `initialized` while watching for an early `launch` failure.
///
/// Returns the launch receiver if its reply is still outstanding.
async fn wait_initialized(
    link: &mut AdapterLink,
    output: &mut Vec<String>,
    mut launch_rx: oneshot::Receiver<Reply>,
    timeouts: &TimeoutConfig,
) -> Result<Option<oneshot::Receiver<Reply>>> {
    let mut launch_done = false;
    let init = handshake::wait_for_initialized(&mut link.events, output, timeouts.launch());
    tokio::pin!(init);

    loop {
        tokio::select! {
            res = &mut init => {
                res?;
                break;
            }
            reply = &mut launch_rx, if !launch_done => match reply {
                Ok(Ok(_)) => launch_done = true,
                Ok(Err(msg)) => return Err(AppError::Start(format!("launch rejected: {msg}"))),
                Err(_) => return Err(AppError::Start("adapter closed during launch".into())),
            },
        }
    }

    Ok((!launch_done).then_some(launch_rx))
}

fn parse_breakpoint_acks(file: &Path, lines: &[u32], body: &Value) -> Result<Vec<BreakpointAck>> {
    let raw = body
        .get("breakpoints")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Protocol("setBreakpoints response has no breakpoints".into()))?;
    if raw.len() != lines.len() {
        return Err(AppError::Protocol(format!(
            "setBreakpoints answered {} breakpoints for {} lines",
            raw.len(),
            lines.len()
        )));
    }

    Ok(lines
        .iter()
        .zip(raw)
        .map(|(&line, bp)| BreakpointAck {
            line,
            id: bp.get("id").map_or_else(
                || format!("{}:{line}", file.display()),
                |id| id.as_str().map_or_else(|| id.to_string(), str::to_owned),
            ),
            verified: bp.get("verified").and_then(Value::as_bool).unwrap_or(false),
        })
        .collect())
}

fn parse_frame(index: usize, frame: &Value) -> StackFrame {
    StackFrame {
        index,
        name: str_field(frame, "name"),
        file: frame
            .pointer("/source/path")
            .and_then(Value::as_str)
            .map(PathBuf::from),
        line: frame
            .get("line")
            .and_then(Value::as_u64)
            .and_then(|l| u32::try_from(l).ok())
            .unwrap_or(0),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn reference_field(value: &Value) -> Option<i64> {
    value
        .get("variablesReference")
        .and_then(Value::as_i64)
        .filter(|r| *r > 0)
}
