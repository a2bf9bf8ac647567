//! Caller side of the daemon socket.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::daemon::protocol::{encode_line, DaemonRequest, DaemonResponse};
use crate::models::record::SessionRecord;
use crate::process::is_process_alive;
use crate::{AppError, Result};

/// Connection details for one recorded daemon.
#[derive(Debug, Clone, Copy)]
pub struct DaemonClient {
    port: u16,
    pid: u32,
    timeout: Duration,
}

impl DaemonClient {
    /// Client for the daemon described by `record`.
    #[must_use]
    pub fn new(record: &SessionRecord, timeout: Duration) -> Self {
        Self {
            port: record.daemon_port,
            pid: record.daemon_pid,
            timeout,
        }
    }

    /// Whether the recorded daemon process still exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        is_process_alive(self.pid)
    }

    /// Send one request and wait for its reply.
    ///
    /// # Errors
    ///
    /// - `AppError::DaemonUnavailable` if the daemon process is gone or its
    ///   port refuses the connection.
    /// - `AppError::Protocol` if no well-formed reply arrives in time.
    /// - Whatever error the daemon reported, re-tagged by its prefix.
    pub async fn send(&self, request: &DaemonRequest) -> Result<String> {
        if !self.is_alive() {
            return Err(AppError::DaemonUnavailable(format!(
                "daemon process {} is not running",
                self.pid
            )));
        }

        let stream = TcpStream::connect(("127.0.0.1", self.port))
            .await
            .map_err(|err| {
                AppError::DaemonUnavailable(format!(
                    "cannot reach daemon on port {}: {err}",
                    self.port
                ))
            })?;
        let (reader, mut writer) = stream.into_split();

        let line = encode_line(request)?;
        debug!(action = request.action(), port = self.port, "sending daemon request");
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|err| AppError::DaemonUnavailable(format!("failed to send request: {err}")))?;

        let mut reply = String::new();
        let mut reader = BufReader::new(reader);
        let read = tokio::time::timeout(self.timeout, reader.read_line(&mut reply))
            .await
            .map_err(|_| {
                AppError::Protocol(format!(
                    "no reply from daemon within {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| AppError::Protocol(format!("failed to read daemon reply: {err}")))?;
        if read == 0 {
            return Err(AppError::Protocol(
                "daemon closed the connection without replying".into(),
            ));
        }

        let response: DaemonResponse = serde_json::from_str(reply.trim())
            .map_err(|err| AppError::Protocol(format!("malformed daemon reply: {err}")))?;
        response.into_result()
    }
}
