use serde::Serialize;

use crate::agent::Progress;

/// One entry of the per-turn continuation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuationEntry {
    pub iteration: u32,
    pub reason: Option<String>,
    /// Names of the tool calls seen in the response.
    pub tool_calls: Vec<String>,
}

/// Context threaded through a turn's invocations.
///
/// Updated only through [`ContinuationStrategy::update_context`], which takes
/// the context by value and hands back the new one.
///
/// [`ContinuationStrategy::update_context`]: super::ContinuationStrategy::update_context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContinuationContext {
    pub(super) continuation_history: Vec<ContinuationEntry>,
    pub(super) progress: Option<Progress>,
}

impl ContinuationContext {
    pub fn continuation_history(&self) -> &[ContinuationEntry] {
        &self.continuation_history
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }
}
