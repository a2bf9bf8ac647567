//! Request/response correlation shared by both protocol clients.
//!
//! Each outbound request is assigned a monotonically increasing identifier
//! (inspector `id`, adapter `seq`). The reader task resolves the matching
//! oneshot when the reply arrives; callers await it under a timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::{AppError, Result};

/// Outcome of one request: the reply body, or the runtime's error message.
pub type Reply = std::result::Result<Value, String>;

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
}

/// Table of in-flight requests keyed by request identifier.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<Inner>>,
}

impl PendingRequests {
    /// Create an empty table. Identifiers start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identifier and a receiver for its reply.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` once the transport has closed.
    pub async fn register(&self) -> Result<(u64, oneshot::Receiver<Reply>)> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(AppError::Protocol("connection closed".into()));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(id, tx);
        Ok((id, rx))
    }

    /// Deliver `reply` to the waiter registered under `id`.
    ///
    /// Returns `false` when nobody is waiting (late or unsolicited reply).
    pub async fn resolve(&self, id: u64, reply: Reply) -> bool {
        let waiter = self.inner.lock().await.waiters.remove(&id);
        match waiter {
            Some(tx) => tx.send(reply).is_ok(),
            None => {
                debug!(id, "reply without a waiter, dropping");
                false
            }
        }
    }

    /// Mark the transport closed and wake every waiter with a closed channel.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.waiters.clear();
    }

    /// Number of requests still awaiting a reply.
    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.waiters.len()
    }
}

/// Await a registered reply under `timeout`.
///
/// # Errors
///
/// Returns `AppError::Protocol` when the wait expires or the transport
/// closes before the reply arrives. A runtime-reported failure is returned
/// as `Ok(Err(message))` so callers can classify it.
pub async fn await_reply(
    rx: oneshot::Receiver<Reply>,
    timeout: Duration,
    command: &str,
) -> Result<Reply> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(_closed)) => Err(AppError::Protocol(format!(
            "connection closed before {command} reply"
        ))),
        Err(_elapsed) => Err(AppError::Protocol(format!(
            "timed out after {}s waiting for {command} reply",
            timeout.as_secs()
        ))),
    }
}

/// Treat a runtime-reported failure as a protocol error.
///
/// # Errors
///
/// Returns `AppError::Protocol` carrying the runtime's message.
pub fn expect_success(reply: Reply, command: &str) -> Result<Value> {
    reply.map_err(|msg| AppError::Protocol(format!("{command} rejected: {msg}")))
}
