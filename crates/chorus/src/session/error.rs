use thiserror::Error;

use chorus_protocol::error_codes;

use crate::agent::InvocationError;

/// Errors from session and registry operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation requested in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unknown agent id.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// No active agent, or the session was never started.
    #[error("session not started")]
    NotStarted,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The agent capability failed; the turn was aborted.
    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

impl SessionError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::InvalidState(_) => error_codes::INVALID_STATE,
            SessionError::AgentNotFound(_) => error_codes::AGENT_NOT_FOUND,
            SessionError::NotStarted => error_codes::NOT_STARTED,
            SessionError::SessionNotFound(_) => error_codes::SESSION_NOT_FOUND,
            SessionError::Invocation(_) => error_codes::INVOCATION_ERROR,
        }
    }
}
