//! LLM error types.

use std::time::Duration;

use thiserror::Error;

use crate::agent::InvocationError;

/// Errors that can occur when calling a chat completions API.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Request did not complete in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Stream ended without a usable completion
    #[error("malformed completion: {0}")]
    Decode(String),
}

impl From<LlmError> for InvocationError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Request(e) => InvocationError::Provider(e.to_string()),
            LlmError::Api { status, message } => InvocationError::Api { status, message },
            LlmError::Timeout(after) => InvocationError::Timeout(after),
            LlmError::Decode(message) => InvocationError::Malformed(message),
        }
    }
}
