//! Notification dispatch to whatever channel a session is attached to.
//!
//! Delivery is best-effort: with no attached channel a notification is
//! dropped, and a failed send is logged rather than raised so it can never
//! abort an in-flight turn.

mod channel;

pub use channel::{CHANNEL_ID_PREFIX, Channel, ChannelError, MpscChannel};

use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};

use chorus_protocol::{
    AiMessageChunk, ContinuationProgress, Notification, NotificationPayload, SessionStatus,
    SessionStatusChange, ToolCallNotice,
};

use crate::agent::{ChunkSink, Progress};

struct Binding {
    channel_id: String,
    channel: Weak<dyn Channel>,
}

/// Per-session notification emitter.
///
/// Holds only a weak reference to the channel; the transport owns it.
pub struct Notifier {
    session_id: String,
    // Lock is never held across .await points.
    binding: RwLock<Option<Binding>>,
}

impl Notifier {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            binding: RwLock::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // ------------------------------------------------------------------------
    // Channel binding
    // ------------------------------------------------------------------------

    /// Point notifications at `channel`, replacing any previous binding.
    pub fn attach(&self, channel: &Arc<dyn Channel>) {
        let mut binding = self.binding.write().expect("notifier lock poisoned");
        *binding = Some(Binding {
            channel_id: channel.id().to_string(),
            channel: Arc::downgrade(channel),
        });
    }

    /// Clear the binding, returning the id of the channel that was attached.
    pub fn detach(&self) -> Option<String> {
        let mut binding = self.binding.write().expect("notifier lock poisoned");
        binding.take().map(|b| b.channel_id)
    }

    pub fn channel_id(&self) -> Option<String> {
        let binding = self.binding.read().expect("notifier lock poisoned");
        binding.as_ref().map(|b| b.channel_id.clone())
    }

    /// Whether a live channel is attached.
    pub fn is_attached(&self) -> bool {
        self.channel().is_some()
    }

    fn channel(&self) -> Option<Arc<dyn Channel>> {
        let binding = self.binding.read().expect("notifier lock poisoned");
        binding.as_ref().and_then(|b| b.channel.upgrade())
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    pub async fn chunk(&self, text: &str, is_final: bool) {
        self.send(NotificationPayload::AiMessageChunk(AiMessageChunk {
            session_id: self.session_id.clone(),
            chunk: text.to_string(),
            is_final,
        }))
        .await;
    }

    pub async fn tool_call(&self, tool_call_id: &str, tool_name: &str, arguments: serde_json::Value) {
        self.send(NotificationPayload::ToolCall(ToolCallNotice {
            session_id: self.session_id.clone(),
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments,
        }))
        .await;
    }

    pub async fn status(&self, status: SessionStatus, reason: Option<&str>) {
        self.send(NotificationPayload::SessionStatus(SessionStatusChange {
            session_id: self.session_id.clone(),
            status,
            reason: reason.map(str::to_string),
        }))
        .await;
    }

    pub async fn progress(&self, agent_id: &str, iteration: u32, progress: &Progress) {
        self.send(NotificationPayload::ContinuationProgress(ContinuationProgress {
            session_id: self.session_id.clone(),
            agent_id: agent_id.to_string(),
            iteration,
            progress: progress.clone(),
        }))
        .await;
    }

    /// Send an arbitrary notification payload.
    pub async fn send(&self, payload: NotificationPayload) {
        let Some(channel) = self.channel() else {
            debug!(
                session_id = %self.session_id,
                method = payload.method(),
                "No channel attached, dropping notification"
            );
            return;
        };

        let method = payload.method();
        if let Err(e) = channel.send(Notification::new(payload).into()).await {
            warn!(
                session_id = %self.session_id,
                channel_id = %channel.id(),
                method,
                error = %e,
                "Failed to send notification"
            );
        }
    }

    /// Chunk sink that forwards non-final chunks of the current turn.
    pub fn chunk_sink(&self) -> NotifierSink<'_> {
        NotifierSink { notifier: self }
    }
}

/// [`ChunkSink`] adapter over a [`Notifier`].
pub struct NotifierSink<'a> {
    notifier: &'a Notifier,
}

#[async_trait]
impl ChunkSink for NotifierSink<'_> {
    async fn chunk(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.notifier.chunk(text, false).await;
    }
}
