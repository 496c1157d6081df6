//! Integration tests for disconnect behavior.
//!
//! A closed channel only drops the association: the session is retained with
//! its history until a client resumes it or the sweeper reclaims it.

use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use serde_json::json;

use chorus::agent::AgentResponse;
use chorus::rpc::{CloseMode, RpcHandler, run_connection};
use chorus::session::StartOptions;
use chorus_protocol::{NotificationPayload, Request, RequestId, SessionStatus, methods};

mod common;

use common::{RecordingChannel, ScriptedInvoker, agent, as_channel, continuation, registry_with};

fn frame(id: i64, method: &str, params: serde_json::Value) -> String {
    serde_json::to_string(&Request::new(RequestId::Number(id), method, params)).unwrap()
}

// ============================================================================
// Connection Close
// ============================================================================

#[tokio::test]
async fn closing_connection_retains_session() {
    let registry = registry_with(vec![agent(
        "a",
        ScriptedInvoker::new(AgentResponse::text("noted")),
        continuation(3, true),
    )]);
    let handler = Arc::new(RpcHandler::new(registry.clone()));
    let channel = RecordingChannel::new("ch-1");

    let inbound = stream::iter(vec![frame(1, methods::START_SESSION, json!({"userId": "u"}))]);
    run_connection(handler.clone(), as_channel(&channel), inbound, CloseMode::Drain).await;

    let responses = channel.responses();
    assert_eq!(responses.len(), 1);
    let session_id = responses[0].result.as_ref().unwrap()["sessionId"]
        .as_str()
        .unwrap()
        .to_string();

    let session = registry.get_session(&session_id).unwrap();
    assert!(!session.metadata().attached);
    assert!(registry.get_session_by_channel("ch-1").is_none());

    // A turn on the detached session still runs; its output is dropped.
    let outcome = session.send_user_message("while away").await.unwrap();
    assert_eq!(outcome.content, "noted");
    assert_eq!(session.agent_history("a").await.unwrap().len(), 2);
}

#[tokio::test]
async fn detached_close_unbinds_session_started_in_flight() {
    let registry = registry_with(vec![agent(
        "a",
        ScriptedInvoker::new(AgentResponse::text("hi")),
        continuation(3, true),
    )]);
    let handler = Arc::new(RpcHandler::new(registry.clone()));
    let channel = RecordingChannel::new("ch-ws");

    // The start is still queued when the stream ends and the close runs.
    let inbound = stream::iter(vec![frame(1, methods::START_SESSION, json!({"userId": "u"}))]);
    run_connection(handler, as_channel(&channel), inbound, CloseMode::Detach).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sessions = registry.list();
    assert_eq!(sessions.len(), 1);
    let session_id = sessions[0].id.clone();
    assert!(registry.get_session_by_channel("ch-ws").is_none());
    assert!(!registry.get_session(&session_id).unwrap().metadata().attached);
    assert_eq!(channel.responses().len(), 1);

    let swept = registry.sweep_detached(Duration::from_millis(10)).await;
    assert_eq!(swept, vec![session_id]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn malformed_frames_get_parse_errors() {
    let registry = registry_with(vec![]);
    let handler = Arc::new(RpcHandler::new(registry));
    let channel = RecordingChannel::new("ch-bad");

    let inbound = stream::iter(vec![
        "{not json".to_string(),
        r#"{"id": 9, "params": {}}"#.to_string(),
    ]);
    run_connection(handler, as_channel(&channel), inbound, CloseMode::Drain).await;

    let responses = channel.responses();
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r.error.as_ref().unwrap().code == "parse_error"));
    assert_eq!(responses[0].id, None);
    assert_eq!(responses[1].id, Some(RequestId::Number(9)));
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn resume_rebinds_session_to_new_channel() {
    let registry = registry_with(vec![agent(
        "a",
        ScriptedInvoker::new(AgentResponse::text("hi")),
        continuation(3, true),
    )]);
    let handler = Arc::new(RpcHandler::new(registry.clone()));

    let old = RecordingChannel::new("ch-old");
    let session_id = registry.create_session(Some(&as_channel(&old)));
    registry
        .start_session(&session_id, StartOptions::default())
        .await
        .unwrap();
    registry.detach_channel("ch-old");

    let new = RecordingChannel::new("ch-new");
    let inbound = stream::iter(vec![
        frame(1, methods::RESUME_SESSION, json!({"sessionId": session_id})),
        frame(2, methods::CURRENT_AGENT, json!({})),
    ]);
    run_connection(handler, as_channel(&new), inbound, CloseMode::Drain).await;

    let mut responses = new.responses();
    responses.sort_by_key(|r| match r.id {
        Some(RequestId::Number(n)) => n,
        _ => 0,
    });
    let resumed = responses[0].result.clone().unwrap();
    assert_eq!(resumed["sessionId"], session_id.as_str());
    assert_eq!(resumed["status"], "Active");
    assert_eq!(resumed["currentAgent"], "a");

    let resumed_status = new.notifications().into_iter().any(|n| {
        matches!(n, NotificationPayload::SessionStatus(s)
            if s.status == SessionStatus::Active && s.reason.as_deref() == Some("resumed"))
    });
    assert!(resumed_status);
    assert!(registry.get_session(&session_id).is_some());
}

#[tokio::test]
async fn resume_rejects_unknown_and_stopped_sessions() {
    let registry = registry_with(vec![agent(
        "a",
        ScriptedInvoker::new(AgentResponse::text("hi")),
        continuation(3, true),
    )]);
    let handler = RpcHandler::new(registry.clone());
    let channel = RecordingChannel::new("ch-r");
    let dyn_channel = as_channel(&channel);

    let response = handler
        .handle(
            &dyn_channel,
            Request::new(
                RequestId::Number(1),
                methods::RESUME_SESSION,
                json!({"sessionId": "session_gone"}),
            ),
        )
        .await;
    assert_eq!(response.error.unwrap().code, "session_not_found");

    let session_id = registry.create_session(None);
    registry.stop_session(&session_id).await;
    let response = handler
        .handle(
            &dyn_channel,
            Request::new(
                RequestId::Number(2),
                methods::RESUME_SESSION,
                json!({"sessionId": session_id}),
            ),
        )
        .await;
    assert_eq!(response.error.unwrap().code, "invalid_state");
}

// ============================================================================
// Sweep
// ============================================================================

#[tokio::test(start_paused = true)]
async fn sweeper_reclaims_sessions_detached_too_long() {
    let registry = registry_with(vec![agent(
        "a",
        ScriptedInvoker::new(AgentResponse::text("hi")),
        continuation(3, true),
    )]);
    let stale = RecordingChannel::new("ch-stale");
    let live = RecordingChannel::new("ch-live");

    let stale_id = registry.create_session(Some(&as_channel(&stale)));
    let live_id = registry.create_session(Some(&as_channel(&live)));
    registry.detach_channel("ch-stale");

    registry
        .spawn_sweeper(Duration::from_secs(10), Duration::from_secs(60))
        .await;

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert!(registry.get_session(&stale_id).is_some());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(registry.get_session(&stale_id).is_none());
    assert!(registry.get_session(&live_id).is_some());

    registry.shutdown().await;
    assert!(registry.is_empty());
}
