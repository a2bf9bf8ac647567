//! Debug adapter reader task.
//!
//! Reads `Content-Length` framed JSON messages from the adapter's stdout,
//! resolves responses against the pending-request table by `request_seq`,
//! and forwards recognised events as [`DriverEvent`]s.
//!
//! # Known inbound events
//!
//! | Event                   | Maps to                          |
//! |-------------------------|----------------------------------|
//! | `initialized`           | [`DriverEvent::Initialized`]     |
//! | `stopped`               | [`DriverEvent::Paused`]          |
//! | `terminated` / `exited` | [`DriverEvent::Terminated`]      |
//! | `output`                | [`DriverEvent::Output`]          |
//! | *(any other)*           | Skipped; logged at `DEBUG`       |

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::codec::DapCodec;
use crate::driver::pending::{PendingRequests, Reply};
use crate::driver::{DriverEvent, EventSender};
use crate::models::stack::PauseReason;
use crate::{AppError, Result};

/// Output categories that carry debuggee output.
const CAPTURED_CATEGORIES: &[&str] = &["stdout", "stderr", "console"];

/// Top-level adapter message envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    request_seq: Option<u64>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    body: Value,
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to the request numbered `request_seq`.
    Response {
        /// Sequence number of the request being answered.
        request_seq: u64,
        /// Body on success, error text on failure.
        reply: Reply,
    },
    /// Unsolicited notification.
    Event(DriverEvent),
    /// Recognised framing but nothing the driver acts on.
    Ignored,
}

/// Parse one frame body into an [`Inbound`] message.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if the body is not JSON, lacks a `type`,
/// or is a response without `request_seq`.
pub fn parse_inbound_message(text: &str) -> Result<Inbound> {
    let envelope: Envelope = serde_json::from_str(text)?;

    match envelope.kind.as_str() {
        "response" => {
            let request_seq = envelope.request_seq.ok_or_else(|| {
                AppError::Protocol("missing required field: `request_seq` in response".into())
            })?;
            let reply = if envelope.success.unwrap_or(false) {
                Ok(envelope.body)
            } else {
                Err(failure_message(&envelope))
            };
            Ok(Inbound::Response { request_seq, reply })
        }
        "event" => Ok(parse_event(envelope.event.as_deref().unwrap_or(""), &envelope.body)),
        other => {
            debug!(kind = other, "adapter reader: skipping reverse request");
            Ok(Inbound::Ignored)
        }
    }
}

/// Adapter reader task.
///
/// Drives a [`FramedRead`] over `stdout` using [`DapCodec`]. Responses are
/// routed to `pending`; events are sent through `event_tx`.
///
/// On EOF or an I/O error the pending table is closed (waking every waiter)
/// and [`DriverEvent::Terminated`] is sent before returning. Malformed
/// frames are logged and skipped.
///
/// # Errors
///
/// Returns `Ok(())` on EOF or cancellation.
pub async fn run_reader<R>(
    stdout: R,
    pending: PendingRequests,
    event_tx: EventSender,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, DapCodec::new());

    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("adapter reader: cancellation received, stopping");
                pending.close().await;
                return Ok(());
            }

            item = framed.next() => match item {
                None => {
                    debug!("adapter reader: EOF detected");
                    break "adapter stream closed".to_owned();
                }
                Some(Err(AppError::Protocol(msg))) => {
                    warn!(error = msg.as_str(), "adapter reader: framing error, stopping");
                    break format!("adapter stream corrupt: {msg}");
                }
                Some(Err(e)) => {
                    warn!(error = %e, "adapter reader: IO error, stopping");
                    break format!("adapter stream error: {e}");
                }
                Some(Ok(text)) => match parse_inbound_message(&text) {
                    Ok(Inbound::Response { request_seq, reply }) => {
                        debug!(request_seq, ok = reply.is_ok(), "<- adapter response");
                        pending.resolve(request_seq, reply).await;
                    }
                    Ok(Inbound::Event(event)) => {
                        debug!(?event, "<- adapter event");
                        if event_tx.send(event).is_err() {
                            debug!("adapter reader: event channel closed, stopping");
                            pending.close().await;
                            return Ok(());
                        }
                    }
                    Ok(Inbound::Ignored) => {}
                    Err(e) => {
                        warn!(error = %e, raw = %text, "adapter reader: parse error, skipping frame");
                    }
                },
            }
        }
    };

    pending.close().await;
    if event_tx.send(DriverEvent::Terminated(reason)).is_err() {
        debug!("adapter reader: event channel closed before termination could be delivered");
    }
    Ok(())
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn failure_message(envelope: &Envelope) -> String {
    let formatted = envelope
        .body
        .pointer("/error/format")
        .and_then(Value::as_str);
    let command = envelope.command.as_deref().unwrap_or("request");
    formatted
        .or(envelope.message.as_deref())
        .map_or_else(|| format!("{command} failed"), str::to_owned)
}

fn parse_event(name: &str, body: &Value) -> Inbound {
    match name {
        "initialized" => Inbound::Event(DriverEvent::Initialized),
        "stopped" => {
            let reason = body.get("reason").and_then(Value::as_str).unwrap_or("");
            Inbound::Event(DriverEvent::Paused {
                reason: PauseReason::from_wire(reason),
                thread_id: body.get("threadId").and_then(Value::as_i64),
                call_frames: Vec::new(),
            })
        }
        "exited" => {
            let code = body.get("exitCode").and_then(Value::as_i64);
            Inbound::Event(DriverEvent::Terminated(code.map_or_else(
                || "debuggee exited".to_owned(),
                |c| format!("debuggee exited with code {c}"),
            )))
        }
        "terminated" => Inbound::Event(DriverEvent::Terminated("debuggee terminated".into())),
        "output" => {
            let category = body
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or("console");
            let text = body.get("output").and_then(Value::as_str).unwrap_or("");
            if CAPTURED_CATEGORIES.contains(&category) && !text.is_empty() {
                Inbound::Event(DriverEvent::Output(text.trim_end_matches('\n').to_owned()))
            } else {
                Inbound::Ignored
            }
        }
        other => {
            debug!(event = other, "adapter reader: skipping unknown event");
            Inbound::Ignored
        }
    }
}
