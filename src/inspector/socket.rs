//! WebSocket transport to a V8 inspector.
//!
//! The socket is split into a writer task fed by an mpsc channel and a
//! reader task that resolves replies by `id` and forwards events. The
//! client never sends keep-alive pings: the inspector does not answer them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::driver::pending::{await_reply, PendingRequests, Reply};
use crate::driver::{DriverEvent, EventSender};
use crate::inspector::protocol::{self, Inbound, ScriptTable};
use crate::{AppError, Result};

/// Open connection to an inspector endpoint.
#[derive(Debug)]
pub struct InspectorSocket {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingRequests,
    cancel: CancellationToken,
    resolved: Arc<Mutex<HashSet<String>>>,
}

impl InspectorSocket {
    /// Connect to `url` and start the reader and writer tasks.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Start`] if the handshake fails or exceeds `timeout`.
    pub async fn connect(url: &str, event_tx: EventSender, timeout: Duration) -> Result<Self> {
        let (ws, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| {
                AppError::Start(format!(
                    "inspector at {url} did not accept a connection within {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::Start(format!("failed to connect to inspector at {url}: {e}")))?;
        debug!(url, "inspector websocket connected");

        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let pending = PendingRequests::new();
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    () = writer_cancel.cancelled() => break,

                    msg = outbound_rx.recv() => {
                        let Some(text) = msg else { break };
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!(error = %e, "inspector writer: send failed, stopping");
                            break;
                        }
                    }
                }
            }
            if let Err(e) = sink.close().await {
                debug!(error = %e, "inspector writer: close failed");
            }
        });

        let resolved = Arc::new(Mutex::new(HashSet::new()));
        let reader_resolved = Arc::clone(&resolved);
        let reader_pending = pending.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut scripts = ScriptTable::default();
            let reason = loop {
                tokio::select! {
                    biased;

                    () = reader_cancel.cancelled() => {
                        reader_pending.close().await;
                        return;
                    }

                    item = stream.next() => match item {
                        None | Some(Ok(Message::Close(_))) => {
                            break "inspector connection closed".to_owned();
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "inspector reader: transport error, stopping");
                            break format!("inspector connection error: {e}");
                        }
                        Some(Ok(Message::Text(text))) => {
                            match protocol::parse_message(&text, &mut scripts) {
                                Ok(Inbound::Response { id, reply }) => {
                                    debug!(id, ok = reply.is_ok(), "<- inspector response");
                                    reader_pending.resolve(id, reply).await;
                                }
                                Ok(Inbound::Event(event)) => {
                                    if event_tx.send(event).is_err() {
                                        reader_pending.close().await;
                                        return;
                                    }
                                }
                                Ok(Inbound::BreakpointResolved(id)) => {
                                    debug!(id = id.as_str(), "<- inspector breakpoint resolved");
                                    if let Ok(mut ids) = reader_resolved.lock() {
                                        ids.insert(id);
                                    }
                                }
                                Ok(Inbound::Ignored) => {}
                                Err(e) => warn!(error = %e, "inspector reader: unparsable message"),
                            }
                        }
                        Some(Ok(_)) => {}
                    },
                }
            };
            reader_pending.close().await;
            if event_tx.send(DriverEvent::Terminated(reason)).is_err() {
                debug!("inspector reader: event channel closed before termination");
            }
        });

        Ok(Self {
            outbound,
            pending,
            cancel,
            resolved,
        })
    }

    /// Send `method` and wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the socket is closed or no reply
    /// arrives within `timeout`. A runtime error is `Ok(Err(message))`.
    pub async fn call(&self, method: &str, params: &Value, timeout: Duration) -> Result<Reply> {
        let (id, rx) = self.pending.register().await?;
        debug!(id, method, "-> inspector request");
        self.outbound
            .send(protocol::request(id, method, params))
            .map_err(|_| AppError::Protocol("inspector writer closed".into()))?;
        await_reply(rx, timeout, method).await
    }

    /// Whether the inspector has reported `breakpoint_id` as resolved.
    #[must_use]
    pub fn is_resolved(&self, breakpoint_id: &str) -> bool {
        self.resolved
            .lock()
            .is_ok_and(|ids| ids.contains(breakpoint_id))
    }

    /// Stop both tasks and fail any outstanding request.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.pending.close().await;
    }
}

impl Drop for InspectorSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
