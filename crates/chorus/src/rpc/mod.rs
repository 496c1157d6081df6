//! Request dispatch and transports.
//!
//! This module provides:
//! - `RpcHandler` mapping protocol methods onto the session registry
//! - `run_connection`, a transport-agnostic read loop for one channel
//! - the WebSocket transport used by `chorus serve`

mod connection;
mod dispatch;
pub mod ws;

pub use connection::{CloseMode, run_connection};
pub use dispatch::RpcHandler;

use thiserror::Error;

use chorus_protocol::{ErrorObject, error_codes};

use crate::session::SessionError;

/// A failed request, ready to be sent as an error object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: &'static str,
    pub message: String,
}

impl RpcError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }
}

impl From<SessionError> for RpcError {
    fn from(err: SessionError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<RpcError> for ErrorObject {
    fn from(err: RpcError) -> Self {
        ErrorObject::new(err.code, err.message)
    }
}
