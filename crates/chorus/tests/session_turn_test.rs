//! Integration tests for user turns driven through the session registry.
//!
//! Covers the continuation loop end to end: invocation counts, notification
//! order, tool call ids, progress reporting and invocation failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use chorus::agent::{
    AgentDefinition, AgentInvoker, AgentResponse, ChunkSink, ContinuationSignal, InvocationError, Progress,
    ToolCallRequest,
};
use chorus::continuation::{ContinuationConfig, TerminationReason};
use chorus::session::{Role, SessionError, SessionRegistry, StartOptions, Turn};
use chorus_protocol::{NotificationPayload, SessionStatus};

mod common;

use common::{RecordingChannel, ScriptedInvoker, agent, as_channel, continuation, registry_with};

fn final_status(channel: &RecordingChannel) -> Option<(SessionStatus, Option<String>)> {
    channel.notifications().into_iter().rev().find_map(|n| match n {
        NotificationPayload::SessionStatus(s) => Some((s.status, s.reason)),
        _ => None,
    })
}

// ============================================================================
// Continuation Loop
// ============================================================================

#[tokio::test]
async fn iteration_limit_allows_three_continuations() {
    let invoker = ScriptedInvoker::always_continue();
    let registry = registry_with(vec![agent("a", invoker.clone(), continuation(3, true))]);
    let channel = RecordingChannel::new("ch-a");

    let id = registry.create_session(Some(&as_channel(&channel)));
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    let session = registry.get_session(&id).unwrap();

    let outcome = session.send_user_message("do it").await.unwrap();

    // max_iterations bounds re-invocations: the strategy answers CONTINUE
    // exactly three times, so the turn is the first invocation plus three
    // continuations. Capping total invocations at three instead would leave
    // the strategy only two CONTINUE answers; the two readings conflict and
    // this one keeps the strategy's count exact.
    assert_eq!(invoker.calls(), 4);
    assert_eq!(
        invoker.messages(),
        vec!["do it", "continue", "continue", "continue"]
    );
    assert_eq!(outcome.termination, Some(TerminationReason::IterationLimit));
    assert_eq!(outcome.status, SessionStatus::Paused);
    assert_eq!(
        final_status(&channel),
        Some((SessionStatus::Paused, Some("iteration_limit".to_string())))
    );
}

#[tokio::test]
async fn response_without_signal_ends_turn_after_one_invocation() {
    let invoker = ScriptedInvoker::new(AgentResponse::text("hello there"));
    let registry = registry_with(vec![agent("a", invoker.clone(), continuation(5, true))]);
    let channel = RecordingChannel::new("ch-b");

    let id = registry.create_session(Some(&as_channel(&channel)));
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    let session = registry.get_session(&id).unwrap();

    let outcome = session.send_user_message("hi").await.unwrap();

    assert_eq!(invoker.calls(), 1);
    assert_eq!(outcome.invocations, 1);
    assert_eq!(outcome.termination, Some(TerminationReason::NoSignal));
    assert_eq!(outcome.content, "hello there");
    assert_eq!(channel.streamed_text(), "hello there");

    let chunks: Vec<_> = channel
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            NotificationPayload::AiMessageChunk(c) => Some(c),
            _ => None,
        })
        .collect();
    let last = chunks.last().unwrap();
    assert!(last.is_final);
    assert!(chunks[..chunks.len() - 1].iter().all(|c| !c.is_final));
    assert_eq!(final_status(&channel), Some((SessionStatus::Active, None)));
}

#[tokio::test]
async fn termination_pattern_stops_heuristic_continuation() {
    let config = ContinuationConfig::new(5, 300.0, false)
        .unwrap()
        .with_patterns(["next step"], ["all done"])
        .unwrap();
    let invoker = ScriptedInvoker::new(AgentResponse::text("idle"));
    invoker.push(Ok(AgentResponse::text("On to the next step.")
        .with_tool_call(ToolCallRequest::new("read", serde_json::json!({})))));
    invoker.push(Ok(AgentResponse::text("All done, nothing left.")
        .with_tool_call(ToolCallRequest::new("write", serde_json::json!({})))));
    let registry = registry_with(vec![agent("a", invoker.clone(), config)]);

    let id = registry.create_session(None);
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    let session = registry.get_session(&id).unwrap();

    let outcome = session.send_user_message("go").await.unwrap();

    assert_eq!(invoker.calls(), 2);
    assert_eq!(outcome.termination, Some(TerminationReason::TerminationPattern));
    assert_eq!(outcome.content, "On to the next step.\n\nAll done, nothing left.");
}

#[tokio::test]
async fn explicit_terminate_after_continue() {
    let invoker = ScriptedInvoker::new(AgentResponse::text("unused"));
    invoker.push(Ok(
        AgentResponse::text("step 1").with_continuation(ContinuationSignal::proceed())
    ));
    invoker.push(Ok(
        AgentResponse::text("step 2").with_continuation(ContinuationSignal::terminate())
    ));
    let registry = registry_with(vec![agent("a", invoker.clone(), continuation(5, true))]);

    let id = registry.create_session(None);
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    let session = registry.get_session(&id).unwrap();

    let outcome = session.send_user_message("go").await.unwrap();
    assert_eq!(outcome.invocations, 2);
    assert_eq!(outcome.termination, Some(TerminationReason::ExplicitTerminate));
    assert_eq!(outcome.status, SessionStatus::Active);

    // A new turn starts from a fresh budget.
    let outcome = session.send_user_message("again").await.unwrap();
    assert_eq!(outcome.invocations, 1);
    assert_eq!(invoker.calls(), 3);
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn tool_calls_are_announced_with_stable_ids() {
    let invoker = ScriptedInvoker::new(AgentResponse::text("done"));
    invoker.push(Ok(AgentResponse::text("looking")
        .with_tool_call(ToolCallRequest::new("search", serde_json::json!({"q": "rust"})))
        .with_tool_call(ToolCallRequest::new("open", serde_json::json!({})).with_id("call_7"))
        .with_continuation(ContinuationSignal::proceed())));
    invoker.push(Ok(AgentResponse::text("again")
        .with_tool_call(ToolCallRequest::new("search", serde_json::json!({})))
        .with_continuation(ContinuationSignal::terminate())));
    let registry = registry_with(vec![agent("a", invoker, continuation(5, true))]);
    let channel = RecordingChannel::new("ch-tools");

    let id = registry.create_session(Some(&as_channel(&channel)));
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    registry
        .get_session(&id)
        .unwrap()
        .send_user_message("find it")
        .await
        .unwrap();

    let calls: Vec<_> = channel
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            NotificationPayload::ToolCall(t) => Some(t),
            _ => None,
        })
        .collect();

    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].tool_call_id, format!("tool-{id}-0"));
    assert_eq!(calls[0].tool_name, "search");
    assert_eq!(calls[0].arguments, serde_json::json!({"q": "rust"}));
    assert_eq!(calls[1].tool_call_id, "call_7");
    // Synthesized ids keep counting across iterations.
    assert_eq!(calls[2].tool_call_id, format!("tool-{id}-1"));
    assert!(calls.iter().all(|c| c.session_id == id));
}

#[tokio::test]
async fn progress_is_reported_per_iteration() {
    let progress = |step| Progress {
        current_step: Some(step),
        total_steps: Some(2),
        ..Default::default()
    };
    let invoker = ScriptedInvoker::new(AgentResponse::text("unused"));
    invoker.push(Ok(AgentResponse::text("one")
        .with_continuation(ContinuationSignal::proceed().with_progress(progress(1)))));
    invoker.push(Ok(AgentResponse::text("two")
        .with_continuation(ContinuationSignal::terminate().with_progress(progress(2)))));
    let registry = registry_with(vec![agent("planner", invoker, continuation(5, true))]);
    let channel = RecordingChannel::new("ch-progress");

    let id = registry.create_session(Some(&as_channel(&channel)));
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    let session = registry.get_session(&id).unwrap();
    session.send_user_message("plan").await.unwrap();

    let reports: Vec<_> = channel
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            NotificationPayload::ContinuationProgress(p) => Some(p),
            _ => None,
        })
        .collect();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].agent_id, "planner");
    assert_eq!(reports[0].iteration, 0);
    assert_eq!(reports[0].progress, progress(1));
    assert_eq!(reports[1].iteration, 1);
    assert_eq!(reports[1].progress.current_step, Some(2));
}

#[tokio::test]
async fn final_chunk_is_last_chunk_of_turn() {
    let invoker = ScriptedInvoker::new(AgentResponse::text("a b c"));
    invoker.push(Ok(
        AgentResponse::text("x y").with_continuation(ContinuationSignal::proceed())
    ));
    let registry = registry_with(vec![agent("a", invoker, continuation(5, true))]);
    let channel = RecordingChannel::new("ch-order");

    let id = registry.create_session(Some(&as_channel(&channel)));
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    registry
        .get_session(&id)
        .unwrap()
        .send_user_message("go")
        .await
        .unwrap();

    let chunks: Vec<_> = channel
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            NotificationPayload::AiMessageChunk(c) => Some((c.chunk, c.is_final)),
            _ => None,
        })
        .collect();

    assert_eq!(
        chunks,
        vec![
            ("x ".to_string(), false),
            ("y".to_string(), false),
            ("a ".to_string(), false),
            ("b ".to_string(), false),
            ("c".to_string(), false),
            (String::new(), true),
        ]
    );
}

// ============================================================================
// Cutoffs
// ============================================================================

#[tokio::test(start_paused = true)]
async fn timeout_pauses_turn_and_flushes_final_chunk() {
    let invoker = ScriptedInvoker::slow(
        AgentResponse::text("still going").with_continuation(ContinuationSignal::proceed()),
        Duration::from_secs(2),
    );
    let config = ContinuationConfig::new(10, 5.0, true).unwrap();
    let registry = registry_with(vec![agent("a", invoker.clone(), config)]);
    let channel = RecordingChannel::new("ch-slow");

    let id = registry.create_session(Some(&as_channel(&channel)));
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    let session = registry.get_session(&id).unwrap();

    let outcome = session.send_user_message("take your time").await.unwrap();

    // Decisions at 2s and 4s continue; at 6s the 5s budget is spent.
    assert_eq!(invoker.calls(), 3);
    assert_eq!(outcome.termination, Some(TerminationReason::TimeoutExceeded));
    assert_eq!(outcome.status, SessionStatus::Paused);
    assert_eq!(
        final_status(&channel),
        Some((SessionStatus::Paused, Some("timeout_exceeded".to_string())))
    );

    let finals = channel
        .notifications()
        .into_iter()
        .filter(|n| matches!(n, NotificationPayload::AiMessageChunk(c) if c.is_final))
        .count();
    assert_eq!(finals, 1);
}

/// Keeps asking to continue and stops its own session on the second call.
struct StoppingInvoker {
    target: OnceLock<(SessionRegistry, String)>,
    calls: AtomicUsize,
}

#[async_trait]
impl AgentInvoker for StoppingInvoker {
    async fn invoke(
        &self,
        _message: &str,
        _history: &[Turn],
        on_chunk: &dyn ChunkSink,
    ) -> Result<AgentResponse, InvocationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == 2
            && let Some((registry, id)) = self.target.get()
        {
            registry.stop_session(id).await;
        }
        on_chunk.chunk("tick").await;
        Ok(AgentResponse::text("tick").with_continuation(ContinuationSignal::proceed()))
    }
}

#[tokio::test]
async fn stop_mid_turn_ends_loop_without_termination_reason() {
    let invoker = Arc::new(StoppingInvoker {
        target: OnceLock::new(),
        calls: AtomicUsize::new(0),
    });
    let registry = registry_with(vec![
        AgentDefinition::new("a", "scripted/a", invoker.clone())
            .with_continuation(continuation(10, true)),
    ]);
    let channel = RecordingChannel::new("ch-stop");

    let id = registry.create_session(Some(&as_channel(&channel)));
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    let _ = invoker.target.set((registry.clone(), id.clone()));
    let session = registry.get_session(&id).unwrap();

    let outcome = session.send_user_message("loop").await.unwrap();

    assert_eq!(invoker.calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.invocations, 2);
    assert_eq!(outcome.termination, None);
    assert_eq!(outcome.status, SessionStatus::Stopped);
    assert_eq!(final_status(&channel), Some((SessionStatus::Stopped, None)));

    let last_chunk = channel.notifications().into_iter().rev().find_map(|n| match n {
        NotificationPayload::AiMessageChunk(c) => Some(c),
        _ => None,
    });
    assert!(last_chunk.unwrap().is_final);

    let err = session.send_user_message("again").await.unwrap_err();
    assert!(matches!(err, SessionError::NotStarted));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn invocation_error_aborts_turn_without_history() {
    let invoker = ScriptedInvoker::new(AgentResponse::text("fine"));
    invoker.push(Err(InvocationError::Api {
        status: 503,
        message: "overloaded".into(),
    }));
    let registry = registry_with(vec![agent("a", invoker.clone(), continuation(5, true))]);
    let channel = RecordingChannel::new("ch-err");

    let id = registry.create_session(Some(&as_channel(&channel)));
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    let session = registry.get_session(&id).unwrap();

    let err = session.send_user_message("hi").await.unwrap_err();
    assert!(matches!(err, SessionError::Invocation(InvocationError::Api { status: 503, .. })));
    assert_eq!(err.code(), "invocation_error");

    let (status, reason) = final_status(&channel).unwrap();
    assert_eq!(status, SessionStatus::Error);
    assert!(reason.unwrap().contains("overloaded"));
    assert!(session.agent_history("a").await.unwrap().is_empty());

    // The session stays usable.
    let outcome = session.send_user_message("retry").await.unwrap();
    assert_eq!(outcome.content, "fine");
    let history = session.agent_history("a").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "retry");
}

#[tokio::test]
async fn message_before_start_has_no_side_effects() {
    let invoker = ScriptedInvoker::new(AgentResponse::text("hi"));
    let registry = registry_with(vec![agent("a", invoker.clone(), continuation(5, true))]);
    let channel = RecordingChannel::new("ch-early");

    let id = registry.create_session(Some(&as_channel(&channel)));
    let session = registry.get_session(&id).unwrap();

    let err = session.send_user_message("too soon").await.unwrap_err();
    assert!(matches!(err, SessionError::NotStarted));
    assert_eq!(invoker.calls(), 0);
    assert!(channel.frames().is_empty());
    assert!(session.agent_history("a").await.is_none());
}

#[tokio::test]
async fn switched_agent_receives_next_turn() {
    let first = ScriptedInvoker::new(AgentResponse::text("from x"));
    let second = ScriptedInvoker::new(AgentResponse::text("from y"));
    let registry = registry_with(vec![
        agent("x", first.clone(), continuation(5, true)),
        agent("y", second.clone(), continuation(5, true)),
    ]);

    let id = registry.create_session(None);
    registry.start_session(&id, StartOptions::default()).await.unwrap();
    let session = registry.get_session(&id).unwrap();

    session.switch_agent("x").unwrap();
    session.switch_agent("y").unwrap();
    assert_eq!(session.current_agent().as_deref(), Some("y"));

    let outcome = session.send_user_message("hello").await.unwrap();
    assert_eq!(outcome.content, "from y");
    assert_eq!(first.calls(), 0);
    assert_eq!(second.calls(), 1);
    // Histories are private to each agent.
    assert!(session.agent_history("x").await.unwrap().is_empty());
    assert_eq!(session.agent_history("y").await.unwrap().len(), 2);
}
