//! Common test utilities.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use chorus::agent::{
    AgentCatalog, AgentDefinition, AgentInvoker, AgentRegistry, AgentResponse, ChunkSink,
    ContinuationSignal, InvocationError,
};
use chorus::continuation::ContinuationConfig;
use chorus::notify::{Channel, ChannelError};
use chorus::session::{SessionConfig, SessionRegistry, Turn};
use chorus_protocol::{Notification, NotificationPayload, Response, ServerMessage};

// ============================================================================
// Scripted Invoker
// ============================================================================

/// Invoker that replays queued results, then repeats a fallback response.
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<Result<AgentResponse, InvocationError>>>,
    fallback: AgentResponse,
    delay: Duration,
    calls: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

impl ScriptedInvoker {
    pub fn new(fallback: AgentResponse) -> Arc<Self> {
        Self::slow(fallback, Duration::ZERO)
    }

    /// Like `new`, but every invocation takes `delay` of (tokio) time.
    pub fn slow(fallback: AgentResponse, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay,
            calls: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        })
    }

    /// Always answers with an explicit CONTINUE.
    pub fn always_continue() -> Arc<Self> {
        Self::new(AgentResponse::text("working").with_continuation(ContinuationSignal::proceed()))
    }

    pub fn push(&self, result: Result<AgentResponse, InvocationError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages received, in invocation order.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        message: &str,
        _history: &[Turn],
        on_chunk: &dyn ChunkSink,
    ) -> Result<AgentResponse, InvocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(message.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let response = next.unwrap_or_else(|| Ok(self.fallback.clone()))?;
        for word in response.content.split_inclusive(' ') {
            on_chunk.chunk(word).await;
        }
        Ok(response)
    }
}

// ============================================================================
// Recording Channel
// ============================================================================

/// Channel that keeps every frame it is asked to send.
pub struct RecordingChannel {
    id: String,
    frames: Mutex<Vec<ServerMessage>>,
}

impl RecordingChannel {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn frames(&self) -> Vec<ServerMessage> {
        self.frames.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<NotificationPayload> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                ServerMessage::Notification(n) => Some(decode(&n)),
                ServerMessage::Response(_) => None,
            })
            .collect()
    }

    pub fn responses(&self) -> Vec<Response> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                ServerMessage::Response(r) => Some(r),
                ServerMessage::Notification(_) => None,
            })
            .collect()
    }

    /// Text of every non-final chunk, concatenated.
    pub fn streamed_text(&self) -> String {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                NotificationPayload::AiMessageChunk(c) if !c.is_final => Some(c.chunk),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, message: ServerMessage) -> Result<(), ChannelError> {
        self.frames.lock().unwrap().push(message);
        Ok(())
    }
}

fn decode(notification: &Notification) -> NotificationPayload {
    notification.payload().unwrap()
}

/// Coerce a recording channel into the trait object the registry expects.
pub fn as_channel(channel: &Arc<RecordingChannel>) -> Arc<dyn Channel> {
    channel.clone()
}

// ============================================================================
// Builders
// ============================================================================

pub fn continuation(max_iterations: u32, require_explicit: bool) -> ContinuationConfig {
    ContinuationConfig::new(max_iterations, 300.0, require_explicit).unwrap()
}

pub fn agent(id: &str, invoker: Arc<ScriptedInvoker>, config: ContinuationConfig) -> AgentDefinition {
    AgentDefinition::new(id, format!("scripted/{id}"), invoker).with_continuation(config)
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        continuation_prompt: "continue".to_string(),
        error_flush_grace: Duration::from_millis(1),
        default_agent: None,
    }
}

/// Registry over the given agents; the first one is the default.
pub fn registry_with(agents: Vec<AgentDefinition>) -> SessionRegistry {
    let catalog = agents
        .into_iter()
        .fold(AgentCatalog::new(), |catalog, agent| catalog.with_agent(agent));
    let agents: Arc<dyn AgentRegistry> = Arc::new(catalog);
    SessionRegistry::new(agents, session_config())
}
