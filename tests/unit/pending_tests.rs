//! Unit tests for request/response correlation.

use std::time::Duration;

use debug_bridge::driver::pending::{await_reply, expect_success, PendingRequests};
use debug_bridge::AppError;
use serde_json::json;

#[tokio::test]
async fn identifiers_start_at_one_and_increase() {
    let pending = PendingRequests::new();
    let (first, _a) = pending.register().await.unwrap();
    let (second, _b) = pending.register().await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 2);
    assert_eq!(pending.in_flight().await, 2);
}

#[tokio::test]
async fn replies_reach_their_own_waiter_out_of_order() {
    let pending = PendingRequests::new();
    let (first, rx_first) = pending.register().await.unwrap();
    let (second, rx_second) = pending.register().await.unwrap();

    assert!(pending.resolve(second, Ok(json!("two"))).await);
    assert!(pending.resolve(first, Err("one failed".into())).await);

    assert_eq!(rx_second.await.unwrap(), Ok(json!("two")));
    assert_eq!(rx_first.await.unwrap(), Err("one failed".into()));
    assert_eq!(pending.in_flight().await, 0);
}

#[tokio::test]
async fn unsolicited_reply_is_dropped() {
    let pending = PendingRequests::new();
    assert!(!pending.resolve(42, Ok(json!({}))).await);
}

#[tokio::test]
async fn close_wakes_waiters_and_rejects_new_requests() {
    let pending = PendingRequests::new();
    let (_, rx) = pending.register().await.unwrap();
    pending.close().await;

    let err = await_reply(rx, Duration::from_secs(1), "stackTrace")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Protocol(ref m) if m.contains("connection closed")));
    assert!(matches!(
        pending.register().await.unwrap_err(),
        AppError::Protocol(_)
    ));
}

#[tokio::test]
async fn missing_reply_times_out_as_protocol_error() {
    let pending = PendingRequests::new();
    let (_, rx) = pending.register().await.unwrap();
    let err = await_reply(rx, Duration::from_millis(50), "continue")
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::Protocol(ref m) if m.starts_with("timed out") && m.ends_with("continue reply")),
        "got {err:?}"
    );
}

#[test]
fn runtime_failure_becomes_protocol_error_naming_the_command() {
    let err = expect_success(Err("not paused".into()), "next").unwrap_err();
    assert_eq!(err, AppError::Protocol("next rejected: not paused".into()));
    assert_eq!(expect_success(Ok(json!(1)), "next").unwrap(), json!(1));
}
