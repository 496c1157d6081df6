use std::sync::Arc;

use crate::agent::{AgentDefinition, AgentInvoker, AgentResponse, ChunkSink, InvocationError};
use crate::continuation::{ContinuationContext, ContinuationDecision, ContinuationStrategy};

use super::history::Turn;

/// One agent bound to its invoker, private history and continuation strategy.
///
/// Owned by exactly one session. The session wraps each runtime in an async
/// mutex, so a single turn at a time appends to `history`.
pub struct AgentRuntime {
    agent_id: String,
    display_model: String,
    invoker: Arc<dyn AgentInvoker>,
    history: Vec<Turn>,
    continuation: ContinuationStrategy,
    context: ContinuationContext,
}

impl AgentRuntime {
    /// Materialize a runtime, seeding the history with a system prompt.
    ///
    /// `system_prompt` overrides the agent's configured prompt.
    pub fn new(definition: AgentDefinition, system_prompt: Option<&str>) -> Self {
        let prompt = system_prompt
            .map(str::to_string)
            .or(definition.system_prompt);
        let history = prompt.map(Turn::system).into_iter().collect();

        Self {
            agent_id: definition.id,
            display_model: definition.model,
            invoker: definition.invoker,
            history,
            continuation: ContinuationStrategy::new(definition.continuation),
            context: ContinuationContext::default(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn display_model(&self) -> &str {
        &self.display_model
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn continuation(&self) -> &ContinuationStrategy {
        &self.continuation
    }

    /// Continuation context of the current (or last) turn.
    pub fn context(&self) -> &ContinuationContext {
        &self.context
    }

    pub(crate) fn begin_turn(&mut self) {
        self.continuation.reset();
        self.context = ContinuationContext::default();
    }

    pub(crate) async fn invoke(
        &self,
        message: &str,
        on_chunk: &dyn ChunkSink,
    ) -> Result<AgentResponse, InvocationError> {
        self.invoker.invoke(message, &self.history, on_chunk).await
    }

    /// Append one successful exchange to the history.
    pub(crate) fn record(&mut self, message: &str, response: &AgentResponse) {
        self.history.push(Turn::user(message));
        self.history.push(Turn::assistant(response));
    }

    /// Fold the response into the turn context and decide whether to continue.
    pub(crate) fn advance(&mut self, response: &AgentResponse) -> ContinuationDecision {
        let context = std::mem::take(&mut self.context);
        self.context = self.continuation.update_context(context, response);
        self.continuation.decide(response)
    }

    pub(crate) fn release(&mut self) {
        self.history.clear();
        self.context = ContinuationContext::default();
    }
}
