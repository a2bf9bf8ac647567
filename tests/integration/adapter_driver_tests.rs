//! `AdapterDriver` against an in-process fake debug adapter.
//!
//! The fake speaks framed JSON over a duplex pipe and, like debugpy,
//! answers `launch` only after `configurationDone`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use debug_bridge::adapter::codec::DapCodec;
use debug_bridge::config::{AdapterConfig, TimeoutConfig};
use debug_bridge::driver::adapter_driver::AdapterDriver;
use debug_bridge::driver::{DebugDriver, LaunchTarget};
use debug_bridge::models::stack::{PauseReason, StepMode, StopEvent};
use debug_bridge::AppError;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

const PROGRAM: &str = "/app/main.py";

/// How the fake adapter behaves.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Peer {
    Normal,
    RejectInitialize,
    RejectLaunch,
    /// Acknowledges `continue` but never stops or exits.
    SilentContinue,
    /// Acknowledges `continue`, then stops only after a delay.
    LateStop,
}

type RequestLog = Arc<Mutex<Vec<Value>>>;

fn response(request_seq: i64, command: &str, success: bool, body: Value) -> String {
    let mut msg = json!({
        "seq": 0,
        "type": "response",
        "request_seq": request_seq,
        "success": success,
        "command": command,
        "body": body,
    });
    if !success {
        msg["message"] = json!(format!("{command} failed"));
    }
    msg.to_string()
}

fn event(name: &str, body: Value) -> String {
    json!({ "seq": 0, "type": "event", "event": name, "body": body }).to_string()
}

async fn fake_adapter(stream: DuplexStream, mode: Peer, log: RequestLog) {
    let (read, write) = tokio::io::split(stream);
    let mut requests = FramedRead::new(read, DapCodec::new());
    let mut out = FramedWrite::new(write, DapCodec::new());
    let mut deferred_launch = None;
    let mut line = 12;

    while let Some(Ok(text)) = requests.next().await {
        let req: Value = serde_json::from_str(&text).unwrap();
        log.lock().unwrap().push(req.clone());
        let seq = req["seq"].as_i64().unwrap();
        let command = req["command"].as_str().unwrap().to_owned();
        let args = &req["arguments"];

        let mut replies = Vec::new();
        match command.as_str() {
            "initialize" => replies.push(response(
                seq,
                "initialize",
                mode != Peer::RejectInitialize,
                json!({ "supportsConfigurationDoneRequest": true }),
            )),
            "launch" if mode == Peer::RejectLaunch => {
                replies.push(response(seq, "launch", false, json!({})));
            }
            "launch" => {
                deferred_launch = Some(seq);
                replies.push(event("initialized", json!({})));
            }
            "setBreakpoints" => {
                let breakpoints: Vec<Value> = args["lines"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|l| json!({ "id": l.as_i64().unwrap() * 10, "verified": true, "line": l }))
                    .collect();
                replies.push(response(
                    seq,
                    "setBreakpoints",
                    true,
                    json!({ "breakpoints": breakpoints }),
                ));
            }
            "configurationDone" => {
                replies.push(response(seq, "configurationDone", true, json!({})));
                if let Some(launch) = deferred_launch.take() {
                    replies.push(response(launch, "launch", true, json!({})));
                }
                replies.push(event(
                    "output",
                    json!({ "category": "stdout", "output": "hello from debuggee\n" }),
                ));
                replies.push(event(
                    "stopped",
                    json!({ "reason": "breakpoint", "threadId": 1 }),
                ));
            }
            "stackTrace" => replies.push(response(
                seq,
                "stackTrace",
                true,
                json!({ "stackFrames": [
                    { "id": 100, "name": "compute", "source": { "path": PROGRAM }, "line": line },
                    { "id": 101, "name": "<module>", "source": { "path": PROGRAM }, "line": 30 },
                ]}),
            )),
            "scopes" => replies.push(response(
                seq,
                "scopes",
                true,
                json!({ "scopes": [
                    { "name": "Locals", "variablesReference": 5 },
                    { "name": "Globals", "variablesReference": 6 },
                ]}),
            )),
            "variables" => {
                let vars = match args["variablesReference"].as_i64() {
                    Some(5) => json!([
                        { "name": "total", "value": "42", "type": "int", "variablesReference": 0 },
                        { "name": "items", "value": "[1, 2]", "type": "list", "variablesReference": 7 },
                    ]),
                    Some(7) => json!([
                        { "name": "0", "value": "1", "type": "int", "variablesReference": 0 },
                        { "name": "1", "value": "2", "type": "int", "variablesReference": 0 },
                    ]),
                    _ => json!([]),
                };
                replies.push(response(seq, "variables", true, json!({ "variables": vars })));
            }
            "evaluate" => {
                if args["expression"] == "total * 2" {
                    replies.push(response(
                        seq,
                        "evaluate",
                        true,
                        json!({ "result": "84", "type": "int", "variablesReference": 0 }),
                    ));
                } else {
                    replies.push(response(
                        seq,
                        "evaluate",
                        false,
                        json!({ "error": { "format": "NameError: name 'nope' is not defined" } }),
                    ));
                }
            }
            "next" | "stepIn" => {
                line += 1;
                replies.push(response(seq, &command, true, json!({})));
                replies.push(event("stopped", json!({ "reason": "step", "threadId": 1 })));
            }
            "continue" if mode == Peer::SilentContinue => {
                replies.push(response(seq, "continue", true, json!({})));
            }
            "continue" if mode == Peer::LateStop => {
                let ack = response(seq, "continue", true, json!({}));
                if out.send(ack).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1500)).await;
                replies.push(event("stopped", json!({ "reason": "breakpoint", "threadId": 1 })));
            }
            "continue" => {
                replies.push(response(seq, "continue", true, json!({ "allThreadsContinued": true })));
                replies.push(event("exited", json!({ "exitCode": 0 })));
                replies.push(event("terminated", json!({})));
            }
            "disconnect" => {
                let _ = out.send(response(seq, "disconnect", true, json!({}))).await;
                break;
            }
            _ => replies.push(response(seq, &command, false, json!({}))),
        }

        for reply in replies {
            if out.send(reply).await.is_err() {
                return;
            }
        }
    }
}

async fn connected(mode: Peer) -> (Result<AdapterDriver, AppError>, RequestLog, JoinHandle<()>) {
    connected_with(mode, TimeoutConfig::default()).await
}

async fn connected_with(
    mode: Peer,
    timeouts: TimeoutConfig,
) -> (Result<AdapterDriver, AppError>, RequestLog, JoinHandle<()>) {
    let (driver_end, adapter_end) = tokio::io::duplex(64 * 1024);
    let log = RequestLog::default();
    let adapter = tokio::spawn(fake_adapter(adapter_end, mode, Arc::clone(&log)));

    let (read, write) = tokio::io::split(driver_end);
    let mut driver = AdapterDriver::new(AdapterConfig::default(), timeouts);
    let target = LaunchTarget::new(Path::new(PROGRAM));
    let result = driver.connect_with_streams(read, write, &target).await;
    (result.map(|()| driver), log, adapter)
}

fn commands(log: &RequestLog) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .map(|r| r["command"].as_str().unwrap_or_default().to_owned())
        .collect()
}

#[tokio::test]
async fn full_session_against_fake_adapter() {
    let (driver, log, adapter) = connected(Peer::Normal).await;
    let mut driver = driver.unwrap();
    let file = PathBuf::from(PROGRAM);

    // Configured but not yet running: no frames to look at.
    assert!(driver.stack_trace().await.unwrap().is_empty());
    assert!(matches!(
        driver.step(StepMode::Over).await,
        Err(AppError::State(_))
    ));
    assert!(matches!(
        driver.evaluate("total", 0).await,
        Err(AppError::State(_))
    ));

    let acks = driver.set_breakpoint(&file, 12).await.unwrap();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].id, "120");
    assert!(acks[0].verified);

    let acks = driver.set_breakpoint(&file, 4).await.unwrap();
    assert_eq!(
        acks.iter().map(|a| a.line).collect::<Vec<_>>(),
        vec![4, 12],
        "the whole file batch is re-sent"
    );

    assert_eq!(
        driver.resume().await.unwrap(),
        StopEvent::Paused(PauseReason::Breakpoint)
    );
    assert_eq!(driver.take_output(), vec!["hello from debuggee"]);

    let stack = driver.stack_trace().await.unwrap();
    assert_eq!(stack.len(), 2);
    assert_eq!(stack[0].name, "compute");
    assert_eq!(stack[0].file.as_deref(), Some(file.as_path()));
    assert_eq!(stack[0].line, 12);

    let scopes = driver.scopes(0).await.unwrap();
    assert!(scopes[0].is_local());
    let locals = driver.variables(scopes[0].reference).await.unwrap();
    assert_eq!(locals[0].name, "total");
    assert_eq!(locals[0].reference, None);
    assert_eq!(locals[1].reference, Some(7));
    assert_eq!(driver.variables(7).await.unwrap().len(), 2);
    assert!(matches!(
        driver.variables(0).await,
        Err(AppError::InvalidArgument(_))
    ));

    let ok = driver.evaluate("total * 2", 0).await.unwrap();
    assert_eq!((ok.value.as_str(), ok.type_name.as_str()), ("84", "int"));
    let err = driver.evaluate("nope", 0).await.unwrap_err();
    assert!(matches!(err, AppError::Evaluation(ref m) if m.contains("NameError")));
    assert!(matches!(
        driver.evaluate("total", 9).await,
        Err(AppError::InvalidArgument(_))
    ));

    assert_eq!(
        driver.step(StepMode::Over).await.unwrap(),
        StopEvent::Paused(PauseReason::Step)
    );
    assert_eq!(driver.stack_trace().await.unwrap()[0].line, 13);

    let stop = driver.resume().await.unwrap();
    assert_eq!(
        stop,
        StopEvent::Terminated("debuggee exited with code 0".into())
    );
    assert_eq!(driver.resume().await.unwrap(), stop, "termination is sticky");

    driver.disconnect().await.unwrap();
    driver.disconnect().await.unwrap();
    drop(driver);
    adapter.await.unwrap();

    let sent = commands(&log);
    let configured = sent.iter().position(|c| c == "configurationDone").unwrap();
    let launched = sent.iter().position(|c| c == "launch").unwrap();
    assert!(launched < configured);
    let last_batch = sent.iter().rposition(|c| c == "setBreakpoints").unwrap();
    assert!(
        last_batch < configured,
        "breakpoints registered before the first resume are configured before the program runs"
    );
    assert_eq!(sent.iter().filter(|c| *c == "continue").count(), 1);
    assert!(!sent.contains(&"disconnect".to_owned()), "terminated debuggee needs no disconnect");

    let log = log.lock().unwrap();
    let second_batch = log
        .iter()
        .filter(|r| r["command"] == "setBreakpoints")
        .nth(1)
        .unwrap();
    assert_eq!(second_batch["arguments"]["lines"], json!([4, 12]));
}

#[tokio::test]
async fn disconnect_while_paused_terminates_the_debuggee() {
    let (driver, log, adapter) = connected(Peer::Normal).await;
    let mut driver = driver.unwrap();
    driver.resume().await.unwrap();

    driver.disconnect().await.unwrap();
    adapter.await.unwrap();

    let log = log.lock().unwrap();
    let disconnect = log.iter().find(|r| r["command"] == "disconnect").unwrap();
    assert_eq!(disconnect["arguments"]["terminateDebuggee"], true);
}

#[tokio::test]
async fn rejected_initialize_is_a_start_error() {
    let (result, _log, _adapter) = connected(Peer::RejectInitialize).await;
    let err = result.err().unwrap();
    assert!(matches!(err, AppError::Start(ref m) if m.contains("initialize rejected")));
}

#[tokio::test]
async fn rejected_launch_is_a_start_error() {
    let (result, _log, _adapter) = connected(Peer::RejectLaunch).await;
    let err = result.err().unwrap();
    assert!(matches!(err, AppError::Start(ref m) if m.contains("launch rejected")));
}

#[tokio::test]
async fn commands_before_connect_are_state_errors() {
    let mut driver = AdapterDriver::new(AdapterConfig::default(), TimeoutConfig::default());
    assert!(matches!(driver.resume().await, Err(AppError::State(_))));
    assert!(matches!(
        driver.set_breakpoint(Path::new(PROGRAM), 1).await,
        Err(AppError::State(_))
    ));
    driver.disconnect().await.unwrap();
}

fn short_resume() -> TimeoutConfig {
    TimeoutConfig {
        resume_seconds: 1,
        ..TimeoutConfig::default()
    }
}

#[tokio::test]
async fn resume_wait_times_out_and_disconnect_still_works() {
    let (driver, log, adapter) = connected_with(Peer::SilentContinue, short_resume()).await;
    let mut driver = driver.unwrap();
    driver.resume().await.unwrap();

    let err = driver.resume().await.unwrap_err();
    assert!(matches!(err, AppError::Protocol(ref m) if m.contains("timed out")));

    driver.disconnect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), adapter)
        .await
        .expect("fake adapter exits after disconnect")
        .unwrap();
    assert!(commands(&log).contains(&"disconnect".to_owned()));
}

#[tokio::test]
async fn retried_resume_collects_the_late_stop_without_resending() {
    let (driver, log, _adapter) = connected_with(Peer::LateStop, short_resume()).await;
    let mut driver = driver.unwrap();
    driver.resume().await.unwrap();

    assert!(matches!(driver.resume().await, Err(AppError::Protocol(_))));
    assert_eq!(
        driver.resume().await.unwrap(),
        StopEvent::Paused(PauseReason::Breakpoint)
    );
    assert_eq!(
        commands(&log).iter().filter(|c| *c == "continue").count(),
        1,
        "the timed-out continue is not sent twice"
    );
    assert_eq!(driver.stack_trace().await.unwrap()[0].name, "compute");

    driver.disconnect().await.unwrap();
}
