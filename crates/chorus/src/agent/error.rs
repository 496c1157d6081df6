use std::time::Duration;

use thiserror::Error;

/// Failure of the agent capability itself.
///
/// Never retried by the session core; retry policy belongs to the invoker.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("provider request failed: {0}")]
    Provider(String),

    #[error("provider returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed agent response: {0}")]
    Malformed(String),
}
