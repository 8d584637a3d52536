//! Concurrency tests for the approval gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dasi::conversation::{ApprovalDecision, ToolCallGateway};
use dasi::types::ToolCall;

fn call(id: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: "terminal_command".to_string(),
        arguments: serde_json::json!({"command": "ls"}),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_reports_resolve_exactly_once() {
    let gateway = ToolCallGateway::new();
    gateway.request(&call("call_race")).unwrap();

    let wins = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for i in 0..16 {
        let gateway = gateway.clone();
        let wins = wins.clone();
        handles.push(tokio::spawn(async move {
            let decision = if i % 2 == 0 {
                ApprovalDecision::Approve
            } else {
                ApprovalDecision::Reject
            };
            if gateway.report("call_race", decision, None) {
                wins.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    let reply = gateway
        .await_outcome("call_race", Duration::from_secs(5))
        .await
        .unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert!(reply.is_some());
    assert!(gateway.pending().is_empty());
}

#[tokio::test]
async fn concurrent_calls_are_independent() {
    let gateway = ToolCallGateway::new();
    gateway.request(&call("call_a")).unwrap();
    gateway.request(&call("call_b")).unwrap();
    assert_eq!(gateway.pending().len(), 2);

    assert!(gateway.reject("call_b"));
    assert!(gateway.is_pending("call_a"));

    let b = gateway
        .await_outcome("call_b", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b.decision, ApprovalDecision::Reject);

    assert!(gateway.report(
        "call_a",
        ApprovalDecision::Approve,
        Some(serde_json::json!("done"))
    ));
    let a = gateway
        .await_outcome("call_a", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a.decision, ApprovalDecision::Approve);
    assert_eq!(a.result, Some(serde_json::json!("done")));
}

#[tokio::test]
async fn awaiting_an_unknown_call_is_an_error() {
    let gateway = ToolCallGateway::new();
    assert!(gateway
        .await_outcome("call_missing", Duration::from_millis(10))
        .await
        .is_err());
}
