//! Debug adapter writer task.
//!
//! Receives serialised request bodies from a tokio [`mpsc`] channel and
//! writes each as one `Content-Length` framed message to the adapter's
//! stdin through a [`FramedWrite`] backed by [`DapCodec`].

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::codec::DapCodec;
use crate::{AppError, Result};

/// Adapter writer task.
///
/// Exits cleanly when `cancel` fires or every sender of `msg_rx` is dropped.
///
/// # Errors
///
/// Returns [`AppError::Protocol`]`("write failed: …")` if the adapter's
/// stdin is no longer writable (e.g. the adapter process exited).
pub async fn run_writer<W>(
    stdin: W,
    mut msg_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(stdin, DapCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("adapter writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(body) = msg else {
                    debug!("adapter writer: message channel closed, stopping");
                    break;
                };
                framed.send(body).await.map_err(|e| {
                    warn!(error = %e, "adapter writer: write to stdin failed");
                    AppError::Protocol(format!("write failed: {e}"))
                })?;
            }
        }
    }

    Ok(())
}
