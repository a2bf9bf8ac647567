//! Daemon socket tests: a mock-driven session served on loopback.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use debug_bridge::daemon::client::DaemonClient;
use debug_bridge::daemon::protocol::{DaemonRequest, DaemonResponse};
use debug_bridge::daemon::server::{handle_request, serve};
use debug_bridge::models::record::SessionRecord;
use debug_bridge::models::stack::{EvalResult, PauseReason, StepMode};
use debug_bridge::runtime::RuntimeKind;
use debug_bridge::AppError;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{frame, mock_session, program_file, variable, Script, SharedScript};

pub struct RunningDaemon {
    pub port: u16,
    pub cancel: CancellationToken,
    pub server: JoinHandle<()>,
    pub script: SharedScript,
    pub program: PathBuf,
    _dir: TempDir,
}

impl RunningDaemon {
    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            runtime_kind: RuntimeKind::Python,
            program: self.program.display().to_string(),
            breakpoints: std::collections::BTreeMap::new(),
            daemon_port: self.port,
            daemon_pid: std::process::id(),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn client(&self) -> DaemonClient {
        DaemonClient::new(&self.record(), Duration::from_secs(5))
    }
}

/// Start a mock session paused at entry and serve it on an ephemeral port.
pub async fn spawn_daemon(configure: impl FnOnce(&mut Script, &std::path::Path)) -> RunningDaemon {
    let dir = tempfile::tempdir().unwrap();
    let program = program_file(&dir, "main.py");
    let mut script = Script::paused_at(&program, 1);
    configure(&mut script, &program);
    let (mut session, script) = mock_session(script);
    session.start(&program, RuntimeKind::Python).await.unwrap();

    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(serve(
        Arc::new(Mutex::new(session)),
        listener,
        Duration::from_secs(5),
        cancel.clone(),
    ));

    RunningDaemon {
        port,
        cancel,
        server,
        script,
        program,
        _dir: dir,
    }
}

#[tokio::test]
async fn full_conversation_over_the_socket() {
    let daemon = spawn_daemon(|script, program| {
        script.push_pause(
            PauseReason::Breakpoint,
            vec![frame(0, "compute", program, 4), frame(1, "<module>", program, 9)],
        );
        script.locals = vec![variable("n", "int", "10", None)];
        script.evaluations.insert(
            "n * 2".into(),
            EvalResult {
                value: "20".into(),
                type_name: "int".into(),
                reference: None,
            },
        );
    })
    .await;
    let client = daemon.client();
    let file = daemon.program.display().to_string();

    let reply = client
        .send(&DaemonRequest::Breakpoint {
            file: file.clone(),
            line: 4,
        })
        .await
        .unwrap();
    assert_eq!(reply, format!("Breakpoint 1 at {file}:4 (verified)"));

    let reply = client.send(&DaemonRequest::Continue).await.unwrap();
    assert_eq!(reply, format!("Paused (breakpoint) at compute ({file}:4)"));

    let reply = client.send(&DaemonRequest::Stack).await.unwrap();
    assert_eq!(reply.lines().count(), 2);

    let reply = client.send(&DaemonRequest::Variables).await.unwrap();
    assert_eq!(reply, "n: int = 10");

    let reply = client
        .send(&DaemonRequest::Evaluate {
            expression: "n * 2".into(),
            frame: None,
        })
        .await
        .unwrap();
    assert_eq!(reply, "20 (int)");

    let err = client
        .send(&DaemonRequest::Evaluate {
            expression: "undefined_name".into(),
            frame: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Evaluation(ref m) if m.contains("NameError")));

    let reply = client.send(&DaemonRequest::Status).await.unwrap();
    assert!(reply.starts_with("State: paused (breakpoint)"), "{reply}");

    let reply = client.send(&DaemonRequest::Stop).await.unwrap();
    assert_eq!(reply, "Debug session ended.");

    tokio::time::timeout(Duration::from_secs(5), daemon.server)
        .await
        .expect("server exits after stop")
        .unwrap();
    assert!(daemon.cancel.is_cancelled());
    assert_eq!(daemon.script.lock().unwrap().disconnects, 1);
}

#[tokio::test]
async fn one_connection_may_carry_several_requests() {
    let daemon = spawn_daemon(|_, _| {}).await;
    let stream = TcpStream::connect(("127.0.0.1", daemon.port)).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer
        .write_all(b"{\"action\":\"status\"}\n\n{\"action\":\"stack\"}\n")
        .await
        .unwrap();

    let first: DaemonResponse =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    let second: DaemonResponse =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(matches!(first, DaemonResponse::Result(ref t) if t.starts_with("State: paused (entry)")));
    assert!(matches!(second, DaemonResponse::Result(ref t) if t.starts_with("#0")));

    daemon.cancel.cancel();
}

#[tokio::test]
async fn malformed_request_gets_an_error_reply() {
    let daemon = spawn_daemon(|_, _| {}).await;
    let stream = TcpStream::connect(("127.0.0.1", daemon.port)).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer.write_all(b"{\"action\":\"rewind\"}\n").await.unwrap();
    let reply: DaemonResponse =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    let err = reply.into_result().unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(ref m) if m.contains("malformed request")));

    // The connection stays usable.
    writer.write_all(b"{\"action\":\"resume\"}\n").await.unwrap();
    let reply: DaemonResponse =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(
        reply,
        DaemonResponse::Result("Program terminated: exited with code 0".into())
    );
    assert!(!daemon.cancel.is_cancelled());
    daemon.cancel.cancel();
}

#[tokio::test]
async fn requests_are_rejected_in_the_wrong_state() {
    let (mut session, _script) = mock_session(Script::default());

    let reply = handle_request(&mut session, DaemonRequest::Stack).await;
    assert!(matches!(reply, DaemonResponse::Error(ref t) if t.starts_with("state: ")));

    let reply = handle_request(
        &mut session,
        DaemonRequest::Step {
            mode: StepMode::Over,
        },
    )
    .await;
    assert!(matches!(reply, DaemonResponse::Error(ref t) if t.starts_with("state: ")));

    let reply = handle_request(&mut session, DaemonRequest::Status).await;
    assert_eq!(
        reply,
        DaemonResponse::Result("State: disconnected\nBreakpoints: none".into())
    );
}

#[tokio::test]
async fn client_reports_unreachable_daemons() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut record = SessionRecord {
        runtime_kind: RuntimeKind::Node,
        program: "/app/main.js".into(),
        breakpoints: std::collections::BTreeMap::new(),
        daemon_port: port,
        daemon_pid: std::process::id(),
        started_at: chrono::Utc::now(),
    };
    let err = DaemonClient::new(&record, Duration::from_secs(1))
        .send(&DaemonRequest::Status)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DaemonUnavailable(_)), "{err:?}");

    record.daemon_pid = u32::MAX;
    let client = DaemonClient::new(&record, Duration::from_secs(1));
    assert!(!client.is_alive());
    let err = client.send(&DaemonRequest::Status).await.unwrap_err();
    assert!(matches!(err, AppError::DaemonUnavailable(ref m) if m.contains("not running")));
}

#[tokio::test]
async fn silent_daemon_is_a_protocol_error() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hold = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let record = SessionRecord {
        runtime_kind: RuntimeKind::Node,
        program: "/app/main.js".into(),
        breakpoints: std::collections::BTreeMap::new(),
        daemon_port: port,
        daemon_pid: std::process::id(),
        started_at: chrono::Utc::now(),
    };
    let err = DaemonClient::new(&record, Duration::from_millis(100))
        .send(&DaemonRequest::Status)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Protocol(ref m) if m.contains("no reply")));
    hold.abort();
}
