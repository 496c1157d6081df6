use async_trait::async_trait;

use super::{AgentInvoker, AgentResponse, ChunkSink, InvocationError};
use crate::session::Turn;

/// Offline invoker that streams the message back word by word.
///
/// Never signals continuation, so every turn ends after one invocation.
#[derive(Debug, Default, Clone)]
pub struct EchoInvoker {
    prefix: Option<String>,
}

impl EchoInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `prefix` to every reply (handy for telling agents apart).
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

#[async_trait]
impl AgentInvoker for EchoInvoker {
    async fn invoke(
        &self,
        message: &str,
        _history: &[Turn],
        on_chunk: &dyn ChunkSink,
    ) -> Result<AgentResponse, InvocationError> {
        let content = match &self.prefix {
            Some(prefix) => format!("{prefix}{message}"),
            None => message.to_string(),
        };

        for word in content.split_inclusive(' ') {
            on_chunk.chunk(word).await;
        }

        Ok(AgentResponse::text(content))
    }
}
