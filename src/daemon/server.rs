//! Loopback TCP server hosting one [`DebugSession`].
//!
//! The daemon binds `127.0.0.1` on an ephemeral port, announces it on
//! stdout, and then serves newline-delimited JSON commands until a `stop`
//! command or a shutdown signal arrives. Commands from concurrent
//! connections are serialised by the session mutex, so the session sees
//! them one at a time in arrival order.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::DebugConfig;
use crate::daemon::protocol::{encode_line, DaemonReady, DaemonRequest, DaemonResponse};
use crate::orchestrator::debug_session::DebugSession;
use crate::report;
use crate::runtime::RuntimeKind;
use crate::{AppError, Result};

/// Session shared by every connection.
pub type SharedSession = Arc<Mutex<DebugSession>>;

/// Start a session for `program`, announce readiness, and serve commands.
///
/// The readiness line is the only thing ever written to stdout. When the
/// session cannot be started the failure is announced instead and returned.
///
/// # Errors
///
/// Returns the start failure, or `AppError::Io` if the listener cannot be
/// bound.
pub async fn run_daemon(
    config: DebugConfig,
    program: &Path,
    runtime: RuntimeKind,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut session = DebugSession::new(config.clone());

    let started = match session.start(program, runtime).await {
        Ok(outcome) => report::started(runtime, program, &outcome),
        Err(err) => {
            announce(&DaemonReady::Failed {
                error: err.to_string(),
            });
            return Err(err);
        }
    };

    let listener = match TcpListener::bind(("127.0.0.1", 0)).await {
        Ok(listener) => listener,
        Err(err) => {
            let err = AppError::Io(format!("failed to bind loopback listener: {err}"));
            announce(&DaemonReady::Failed {
                error: err.to_string(),
            });
            if let Err(stop_err) = session.stop().await {
                warn!(%stop_err, "stop after bind failure failed");
            }
            return Err(err);
        }
    };
    let port = listener.local_addr()?.port();

    info!(port, program = %program.display(), %runtime, "daemon ready");
    announce(&DaemonReady::Ready {
        ready: true,
        port,
        message: started,
    });

    let session = Arc::new(Mutex::new(session));
    serve(
        Arc::clone(&session),
        listener,
        config.timeouts.daemon_command(),
        shutdown,
    )
    .await;

    let mut session = session.lock().await;
    session.stop().await
}

/// Accept connections until `cancel` fires.
///
/// A `stop` command cancels the token after its reply has been written.
pub async fn serve(
    session: SharedSession,
    listener: TcpListener,
    read_timeout: Duration,
    cancel: CancellationToken,
) {
    let span = info_span!("daemon_server");
    async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("daemon server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "connection accepted");
                            tokio::spawn(handle_connection(
                                stream,
                                Arc::clone(&session),
                                read_timeout,
                                cancel.clone(),
                            ));
                        }
                        Err(err) => warn!(%err, "accept failed"),
                    }
                }
            }
        }
    }
    .instrument(span)
    .await;
}

/// Serve one connection: read request lines, answer each in order.
async fn handle_connection(
    stream: TcpStream,
    session: SharedSession,
    read_timeout: Duration,
    cancel: CancellationToken,
) {
    let span = info_span!("daemon_conn");
    async move {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                () = cancel.cancelled() => break,
                read = tokio::time::timeout(read_timeout, reader.read_line(&mut line)) => read,
            };
            match read {
                Err(_) => {
                    warn!("no request within {}s; closing", read_timeout.as_secs());
                    break;
                }
                Ok(Ok(0)) => break,
                Ok(Err(err)) => {
                    warn!(%err, "read failed");
                    break;
                }
                Ok(Ok(_)) => {}
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let (response, stop) = match serde_json::from_str::<DaemonRequest>(trimmed) {
                Ok(request) => {
                    let stop = request == DaemonRequest::Stop;
                    let mut session = session.lock().await;
                    (handle_request(&mut session, request).await, stop)
                }
                Err(err) => (
                    DaemonResponse::Error(
                        AppError::InvalidArgument(format!("malformed request: {err}")).to_string(),
                    ),
                    false,
                ),
            };

            let reply = encode_line(&response).unwrap_or_else(|_| {
                "{\"error\":\"protocol: reply serialisation failed\"}\n".to_owned()
            });
            if let Err(err) = writer.write_all(reply.as_bytes()).await {
                warn!(%err, "failed to write reply");
                break;
            }

            if stop {
                cancel.cancel();
                break;
            }
        }

        debug!("connection closed");
    }
    .instrument(span)
    .await;
}

/// Run one request against the session and render the reply.
pub async fn handle_request(session: &mut DebugSession, request: DaemonRequest) -> DaemonResponse {
    let span = info_span!("daemon_command", action = request.action());
    let result = dispatch(session, request).instrument(span).await;
    if let Err(err) = &result {
        warn!(%err, "command failed");
    }
    DaemonResponse::from_result(result)
}

async fn dispatch(session: &mut DebugSession, request: DaemonRequest) -> Result<String> {
    match request {
        DaemonRequest::Breakpoint { file, line } => {
            let bp = session.add_breakpoint(Path::new(&file), line).await?;
            Ok(report::breakpoint(&bp))
        }
        DaemonRequest::Continue => {
            let outcome = session.resume().await?;
            Ok(report::stop_outcome(&outcome, &session.take_output()))
        }
        DaemonRequest::Step { mode } => {
            let outcome = session.step(mode).await?;
            Ok(report::stop_outcome(&outcome, &session.take_output()))
        }
        DaemonRequest::Evaluate { expression, frame } => {
            let result = session.inspect(&expression, frame).await?;
            Ok(report::evaluation(&result))
        }
        DaemonRequest::Stack => Ok(report::stack(&session.get_stack()?)),
        DaemonRequest::Variables => Ok(report::variables(&session.get_local_variables().await?)),
        DaemonRequest::Expand { reference } => {
            Ok(report::variables(&session.expand_variable(reference).await?))
        }
        DaemonRequest::Status => Ok(report::status(&session.status())),
        DaemonRequest::Stop => {
            session.stop().await?;
            Ok("Debug session ended.".into())
        }
    }
}

/// Write the readiness line to stdout.
fn announce(ready: &DaemonReady) {
    let line = match encode_line(ready) {
        Ok(line) => line,
        Err(err) => {
            warn!(%err, "failed to encode readiness line");
            return;
        }
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = stdout
        .write_all(line.as_bytes())
        .and_then(|()| stdout.flush())
    {
        warn!(%err, "failed to write readiness line");
    }
}
