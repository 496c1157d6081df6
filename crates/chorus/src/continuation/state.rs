use std::time::Duration;

use tokio::time::Instant;

use super::strategy::ContinuationDecision;
use crate::agent::Progress;

/// One logged continuation decision.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    /// Iteration count at the time of the decision (before any increment).
    pub iteration: u32,
    pub decision: ContinuationDecision,
    /// Time since the turn started.
    pub elapsed: Duration,
}

/// Per-turn counters and timestamps.
#[derive(Debug, Clone)]
pub struct ContinuationState {
    pub(super) iteration_count: u32,
    pub(super) start_time: Instant,
    pub(super) progress: Option<Progress>,
    pub(super) history_of_decisions: Vec<DecisionRecord>,
}

impl Default for ContinuationState {
    fn default() -> Self {
        Self {
            iteration_count: 0,
            start_time: Instant::now(),
            progress: None,
            history_of_decisions: Vec::new(),
        }
    }
}

impl ContinuationState {
    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }

    pub fn history_of_decisions(&self) -> &[DecisionRecord] {
        &self.history_of_decisions
    }
}
