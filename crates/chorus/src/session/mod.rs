//! Session management.
//!
//! This module provides:
//! - `Session` for driving user turns against a set of agents
//! - `AgentRuntime` binding one agent to its history and continuation strategy
//! - `SessionRegistry` for lifecycle and channel association
//! - `Turn`/`Role` for conversation history

mod conversation;
mod error;
mod history;
mod registry;
mod runtime;

pub use conversation::{
    AgentSummary, Lifecycle, MESSAGE_ID_PREFIX, Session, SessionConfig, SessionMetadata,
    StartOptions, TurnOutcome,
};
pub use error::SessionError;
pub use history::{Role, Turn};
pub use registry::{SESSION_ID_PREFIX, SessionRegistry};
pub use runtime::AgentRuntime;
