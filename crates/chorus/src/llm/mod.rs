//! Chat completions client used by model-backed agents.
//!
//! The session core only sees [`crate::agent::AgentInvoker`]; this module
//! adapts an OpenAI-compatible streaming endpoint to that interface.

mod error;
mod openai;
mod signal;
mod sse;

pub use error::LlmError;
pub use openai::{DEFAULT_BASE_URL, OpenAiInvoker, OpenAiSettings};
pub use signal::{SignalFilter, extract_signal};
pub use sse::{SseEvent, SseEventStream};
