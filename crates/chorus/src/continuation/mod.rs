//! Continuation decision engine.
//!
//! Governs how many autonomous re-invocations an agent may perform within one
//! user turn. Safety limits (timeout, iteration cap) are checked first, then
//! the explicit `continuation` field of the response, then optional text
//! heuristics.

mod config;
mod context;
mod state;
mod strategy;

pub use config::{
    ContinuationConfig, ContinuationConfigError, DEFAULT_MAX_ITERATIONS, DEFAULT_TIMEOUT_SECONDS,
};
pub use context::{ContinuationContext, ContinuationEntry};
pub use state::{ContinuationState, DecisionRecord};
pub use strategy::{ContinuationDecision, ContinuationStrategy, ContinueReason, TerminationReason};
