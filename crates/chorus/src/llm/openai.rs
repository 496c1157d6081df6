//! OpenAI-compatible chat completions invoker.
//!
//! Works with OpenAI, OpenRouter, Ollama, and other compatible APIs.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::LlmError;
use super::signal::{SignalFilter, extract_signal};
use super::sse::SseEventStream;
use crate::agent::{AgentInvoker, AgentResponse, ChunkSink, InvocationError, ToolCallRequest};
use crate::build_info;
use crate::session::{Role, Turn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Tells the model how to report whether it wants another step.
const SIGNAL_INSTRUCTIONS: &str = "When you finish a reply, you may append a fenced block \
tagged `continuation` holding JSON such as {\"status\": \"CONTINUE\", \"reason\": \"...\"} \
to keep working on your own, or {\"status\": \"TERMINATE\"} when the task is complete.";

/// Connection settings for one model-backed agent.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
}

pub struct OpenAiInvoker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiInvoker {
    pub fn new(settings: OpenAiSettings) -> Result<Self, LlmError> {
        let client = Client::builder()
            .user_agent(format!("chorus/{}", build_info::VERSION))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let base_url = settings
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key,
            model: settings.model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn stream_completion(
        &self,
        message: &str,
        history: &[Turn],
        on_chunk: &dyn ChunkSink,
    ) -> Result<AgentResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = StreamRequest {
            model: &self.model,
            messages: build_messages(message, history),
            stream: true,
        };

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.json(&request).send().await.map_err(classify)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let mut events = SseEventStream::new(response.bytes_stream());
        let mut completion = CompletionBuilder::default();

        while let Some(event) = events.next().await {
            let data = event.map_err(classify)?.data;
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }

            match serde_json::from_str::<StreamChunk>(&data) {
                Ok(chunk) => {
                    let visible = completion.apply(chunk);
                    if !visible.is_empty() {
                        on_chunk.chunk(&visible).await;
                    }
                }
                Err(e) => {
                    debug!(data = %data, error = %e, "Failed to parse SSE chunk");
                }
            }
        }

        let tail = completion.filter.finish();
        if !tail.is_empty() {
            on_chunk.chunk(&tail).await;
        }

        completion.finish()
    }
}

#[async_trait]
impl AgentInvoker for OpenAiInvoker {
    async fn invoke(
        &self,
        message: &str,
        history: &[Turn],
        on_chunk: &dyn ChunkSink,
    ) -> Result<AgentResponse, InvocationError> {
        Ok(self.stream_completion(message, history, on_chunk).await?)
    }
}

fn classify(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(REQUEST_TIMEOUT)
    } else {
        LlmError::Request(err)
    }
}

// ============================================================================
// Request Building
// ============================================================================

#[derive(Serialize)]
struct StreamRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, PartialEq, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// Map history plus the new message to chat messages.
///
/// Tool calls are rendered inline since no tool results are ever sent back.
fn build_messages(message: &str, history: &[Turn]) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(WireMessage {
        role: "system",
        content: SIGNAL_INSTRUCTIONS.to_string(),
    });

    for turn in history {
        let role = match turn.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let mut content = turn.content.clone();
        for call in &turn.tool_calls {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&format!("[tool call] {}({})", call.name, call.arguments));
        }
        messages.push(WireMessage { role, content });
    }

    messages.push(WireMessage {
        role: "user",
        content: message.to_string(),
    });
    messages
}

// ============================================================================
// Streaming Types
// ============================================================================

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<StreamFunctionCall>,
}

#[derive(Deserialize)]
struct StreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}

/// Tool calls arrive in pieces: first the id and name, then argument fragments.
#[derive(Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn finish(self) -> ToolCallRequest {
        let arguments = if self.arguments.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.arguments)
                .unwrap_or(serde_json::Value::String(self.arguments))
        };
        ToolCallRequest {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

#[derive(Default)]
struct CompletionBuilder {
    content: String,
    tool_calls: Vec<ToolCallAccumulator>,
    filter: SignalFilter,
    chunks_seen: usize,
}

impl CompletionBuilder {
    /// Fold one chunk in; returns the text that may be streamed.
    fn apply(&mut self, chunk: StreamChunk) -> String {
        self.chunks_seen += 1;
        let Some(choice) = chunk.choices.into_iter().next() else {
            return String::new();
        };

        if let Some(calls) = choice.delta.tool_calls {
            for tc in calls {
                while self.tool_calls.len() <= tc.index {
                    self.tool_calls.push(ToolCallAccumulator::default());
                }
                let acc = &mut self.tool_calls[tc.index];
                if let Some(id) = tc.id {
                    acc.id = Some(id);
                }
                if let Some(func) = tc.function {
                    if let Some(name) = func.name {
                        acc.name = name;
                    }
                    if let Some(args) = func.arguments {
                        acc.arguments.push_str(&args);
                    }
                }
            }
        }

        match choice.delta.content {
            Some(text) if !text.is_empty() => {
                self.content.push_str(&text);
                self.filter.push(&text)
            }
            _ => String::new(),
        }
    }

    fn finish(self) -> Result<AgentResponse, LlmError> {
        if self.chunks_seen == 0 {
            return Err(LlmError::Decode("stream ended without any completion chunks".into()));
        }

        let (content, continuation) = extract_signal(&self.content);
        let tool_calls = self
            .tool_calls
            .into_iter()
            .filter(|tc| !tc.name.is_empty())
            .map(ToolCallAccumulator::finish)
            .collect();

        Ok(AgentResponse {
            content,
            tool_calls,
            continuation,
        })
    }
}
