//! Agent invocation capability and the structured response it produces.
//!
//! The session core never builds prompts or runs tools. It hands a message,
//! the agent's private history and a chunk sink to an [`AgentInvoker`] and
//! gets back an [`AgentResponse`].

mod catalog;
mod echo;
mod error;

pub use catalog::{AgentCatalog, AgentDefinition, AgentRegistry};
pub use chorus_protocol::Progress;
pub use echo::EchoInvoker;
pub use error::InvocationError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::Turn;

// ============================================================================
// Invocation Capability
// ============================================================================

/// Receives streamed output while an invocation is in flight.
///
/// Chunks must be delivered in generation order; implementations await each
/// send so ordering is preserved end to end.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn chunk(&self, text: &str);
}

/// A sink that discards everything.
pub struct NullSink;

#[async_trait]
impl ChunkSink for NullSink {
    async fn chunk(&self, _text: &str) {}
}

/// Invokes one agent: `invoke(message, history, onChunk) -> response`.
///
/// Tool execution, retries and prompt construction all live behind this trait.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(
        &self,
        message: &str,
        history: &[Turn],
        on_chunk: &dyn ChunkSink,
    ) -> Result<AgentResponse, InvocationError>;
}

// ============================================================================
// Response Types
// ============================================================================

/// Structured result of a single agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<ContinuationSignal>,
}

impl AgentResponse {
    /// Plain text response with no tool calls and no continuation signal.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_call(mut self, call: ToolCallRequest) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn with_continuation(mut self, signal: ContinuationSignal) -> Self {
        self.continuation = Some(signal);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Progress payload carried by the continuation signal, if any.
    pub fn progress(&self) -> Option<&Progress> {
        self.continuation.as_ref().and_then(|c| c.progress.as_ref())
    }
}

/// A tool invocation reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned id. The session synthesizes one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Explicit continuation directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContinuationStatus {
    Continue,
    Terminate,
}

/// Continuation field of an agent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationSignal {
    pub status: ContinuationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

impl ContinuationSignal {
    pub fn proceed() -> Self {
        Self {
            status: ContinuationStatus::Continue,
            reason: None,
            progress: None,
        }
    }

    pub fn terminate() -> Self {
        Self {
            status: ContinuationStatus::Terminate,
            reason: None,
            progress: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }
}
