use tokio::time::Instant;
use tracing::{debug, info};

use super::config::ContinuationConfig;
use super::context::{ContinuationContext, ContinuationEntry};
use super::state::{ContinuationState, DecisionRecord};
use crate::agent::{AgentResponse, ContinuationStatus, Progress};

// ============================================================================
// Decisions
// ============================================================================

/// Why a turn was allowed to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueReason {
    ExplicitContinue,
    ContinuationPattern,
}

impl ContinueReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContinueReason::ExplicitContinue => "explicit_continue",
            ContinueReason::ContinuationPattern => "continuation_pattern",
        }
    }
}

/// Why a turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    TimeoutExceeded,
    IterationLimit,
    ExplicitTerminate,
    NoSignal,
    TerminationPattern,
    NoContinuationPattern,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::TimeoutExceeded => "timeout_exceeded",
            TerminationReason::IterationLimit => "iteration_limit",
            TerminationReason::ExplicitTerminate => "explicit_terminate",
            TerminationReason::NoSignal => "no_signal",
            TerminationReason::TerminationPattern => "termination_pattern",
            TerminationReason::NoContinuationPattern => "no_continuation_pattern",
        }
    }

    /// Safety cutoffs end a turn early rather than naturally.
    pub fn is_safety_limit(&self) -> bool {
        matches!(
            self,
            TerminationReason::TimeoutExceeded | TerminationReason::IterationLimit
        )
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationDecision {
    Continue(ContinueReason),
    Terminate(TerminationReason),
}

impl ContinuationDecision {
    pub fn is_continue(&self) -> bool {
        matches!(self, ContinuationDecision::Continue(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContinuationDecision::Continue(r) => r.as_str(),
            ContinuationDecision::Terminate(r) => r.as_str(),
        }
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Decides whether an agent is re-invoked within the same user turn.
///
/// State machine per turn: `reset()` enters `Active(0)`, each continue moves
/// `Active(n)` to `Active(n + 1)`, and any terminate is final until the next
/// `reset()`.
#[derive(Debug, Clone)]
pub struct ContinuationStrategy {
    config: ContinuationConfig,
    state: ContinuationState,
    terminated: Option<TerminationReason>,
}

impl ContinuationStrategy {
    pub fn new(config: ContinuationConfig) -> Self {
        Self {
            config,
            state: ContinuationState::default(),
            terminated: None,
        }
    }

    pub fn config(&self) -> &ContinuationConfig {
        &self.config
    }

    pub fn state(&self) -> &ContinuationState {
        &self.state
    }

    /// Start a new turn. Call once per user turn before the first invocation.
    pub fn reset(&mut self) {
        self.state.iteration_count = 0;
        self.state.start_time = Instant::now();
        self.state.progress = None;
        self.state.history_of_decisions.clear();
        self.terminated = None;
    }

    pub fn should_continue(&mut self, response: &AgentResponse) -> bool {
        self.decide(response).is_continue()
    }

    /// Decide CONTINUE vs TERMINATE for `response` and record the outcome.
    pub fn decide(&mut self, response: &AgentResponse) -> ContinuationDecision {
        if let Some(progress) = response.progress() {
            self.state.progress = Some(progress.clone());
        }

        let decision = match self.terminated {
            Some(reason) => ContinuationDecision::Terminate(reason),
            None => self.evaluate(response),
        };

        self.state.history_of_decisions.push(DecisionRecord {
            iteration: self.state.iteration_count,
            decision,
            elapsed: self.state.elapsed(),
        });

        match decision {
            ContinuationDecision::Continue(reason) => {
                self.state.iteration_count += 1;
                debug!(
                    iteration = self.state.iteration_count,
                    reason = reason.as_str(),
                    "Continuing turn"
                );
            }
            ContinuationDecision::Terminate(reason) => {
                self.terminated = Some(reason);
                if reason.is_safety_limit() {
                    info!(
                        iterations = self.state.iteration_count,
                        reason = reason.as_str(),
                        "Continuation safety limit reached"
                    );
                } else {
                    debug!(
                        iterations = self.state.iteration_count,
                        reason = reason.as_str(),
                        "Turn terminated"
                    );
                }
            }
        }

        decision
    }

    fn evaluate(&self, response: &AgentResponse) -> ContinuationDecision {
        use ContinuationDecision::{Continue, Terminate};

        if self.state.elapsed() > self.config.timeout() {
            return Terminate(TerminationReason::TimeoutExceeded);
        }
        if self.state.iteration_count >= self.config.max_iterations() {
            return Terminate(TerminationReason::IterationLimit);
        }

        if let Some(signal) = &response.continuation {
            return match signal.status {
                ContinuationStatus::Continue => Continue(ContinueReason::ExplicitContinue),
                ContinuationStatus::Terminate => {
                    Terminate(TerminationReason::ExplicitTerminate)
                }
            };
        }

        // No field and no tool calls is always terminal.
        if !response.has_tool_calls() || self.config.require_explicit_signal() {
            return Terminate(TerminationReason::NoSignal);
        }

        if self.config.matches_termination(&response.content) {
            Terminate(TerminationReason::TerminationPattern)
        } else if self.config.matches_continuation(&response.content) {
            Continue(ContinueReason::ContinuationPattern)
        } else {
            Terminate(TerminationReason::NoContinuationPattern)
        }
    }

    /// Fold `response` into `context`, returning the new context.
    pub fn update_context(
        &self,
        mut context: ContinuationContext,
        response: &AgentResponse,
    ) -> ContinuationContext {
        context.continuation_history.push(ContinuationEntry {
            iteration: self.state.iteration_count,
            reason: response
                .continuation
                .as_ref()
                .and_then(|signal| signal.reason.clone()),
            tool_calls: response.tool_calls.iter().map(|c| c.name.clone()).collect(),
        });
        if let Some(progress) = response.progress() {
            context.progress = Some(progress.clone());
        }
        context
    }

    pub fn get_progress(context: &ContinuationContext) -> Option<&Progress> {
        context.progress.as_ref()
    }
}
