//! Wire protocol types for communication between chorus and its clients.
//!
//! This crate defines the messages exchanged over a chorus channel. Use it to
//! build clients in Rust without depending on the server crate.
//!
//! # Protocol Overview
//!
//! Every frame is a JSON object shaped after JSON-RPC 2.0:
//!
//! - **Requests** (Client → Server): carry an `id`, a `method` and `params`
//! - **Responses** (Server → Client): echo the request `id` with either a
//!   `result` or an `error` object `{code, message}`
//! - **Notifications** (Server → Client): carry a `method` and `params` but no
//!   `id`, and expect no reply
//!
//! # Example: Starting a Session
//!
//! ```ignore
//! use chorus_protocol::{Request, RequestId, StartSessionParams, methods};
//!
//! let request = Request::new(
//!     RequestId::Number(1),
//!     methods::START_SESSION,
//!     serde_json::to_value(StartSessionParams {
//!         user_id: "alice".to_string(),
//!         session_params: None,
//!     })?,
//! );
//! socket.send(serde_json::to_string(&request)?);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Protocol version string carried in every frame.
pub const JSONRPC_VERSION: &str = "2.0";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

// ============================================================================
// Method Names
// ============================================================================

/// Request methods understood by the server.
pub mod methods {
    pub const START_SESSION: &str = "startSession";
    pub const SEND_USER_MESSAGE: &str = "sendUserMessage";
    pub const STOP_SESSION: &str = "stopSession";
    pub const RESUME_SESSION: &str = "resumeSession";
    pub const SWITCH_AGENT: &str = "session.switch_agent";
    pub const CURRENT_AGENT: &str = "session.current_agent";
    pub const LIST_AGENTS: &str = "session.list_agents";
}

/// Notification methods emitted by the server.
pub mod notifications {
    pub const AI_MESSAGE_CHUNK: &str = "AIMessageChunk";
    pub const SESSION_STATUS: &str = "SessionStatus";
    pub const TOOL_CALL: &str = "ToolCall";
    pub const CONTINUATION_PROGRESS: &str = "ContinuationProgress";
}

// ============================================================================
// Error Codes
// ============================================================================

/// Well-known error codes carried in [`ErrorObject::code`].
pub mod error_codes {
    /// Frame was not valid JSON or not a request.
    pub const PARSE_ERROR: &str = "parse_error";
    /// Unknown request method.
    pub const METHOD_NOT_FOUND: &str = "method_not_found";
    /// Request params did not match the method's schema.
    pub const INVALID_PARAMS: &str = "invalid_params";
    /// Session id is unknown (or no session is bound to the channel).
    pub const SESSION_NOT_FOUND: &str = "session_not_found";
    /// Operation requested on a session in the wrong lifecycle state.
    pub const INVALID_STATE: &str = "invalid_state";
    /// Switch or activation referenced an unknown agent id.
    pub const AGENT_NOT_FOUND: &str = "agent_not_found";
    /// Message sent to a session that has no active agent.
    pub const NOT_STARTED: &str = "not_started";
    /// The agent capability failed while producing a response.
    pub const INVOCATION_ERROR: &str = "invocation_error";
    /// Unexpected server-side failure.
    pub const INTERNAL_ERROR: &str = "internal_error";
}

// ============================================================================
// Envelopes
// ============================================================================

/// Request identifier (number or string, echoed back verbatim).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// A request sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    /// Create a new request.
    pub fn new(id: RequestId, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Deserialize the params into a typed struct.
    ///
    /// A missing `params` field is treated as an empty object so that methods
    /// whose params are all optional accept bare requests.
    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        if self.params.is_null() {
            return serde_json::from_value(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_value(self.params.clone())
    }
}

/// Error object carried by failed responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

impl ErrorObject {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A response to a request.
///
/// Exactly one of `result` and `error` is present. `id` is `null` when the
/// server could not recover the id of a malformed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// Create a successful response.
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Create a failed response.
    pub fn failure(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// An asynchronous notification pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Notification {
    /// Build a notification frame from a typed payload.
    pub fn new(payload: NotificationPayload) -> Self {
        let (method, params) = payload.into_parts();
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.to_string(),
            params,
        }
    }

    /// Decode the params back into a typed payload.
    pub fn payload(&self) -> Result<NotificationPayload, serde_json::Error> {
        let params = self.params.clone();
        match self.method.as_str() {
            notifications::AI_MESSAGE_CHUNK => {
                serde_json::from_value(params).map(NotificationPayload::AiMessageChunk)
            }
            notifications::SESSION_STATUS => {
                serde_json::from_value(params).map(NotificationPayload::SessionStatus)
            }
            notifications::TOOL_CALL => {
                serde_json::from_value(params).map(NotificationPayload::ToolCall)
            }
            notifications::CONTINUATION_PROGRESS => {
                serde_json::from_value(params).map(NotificationPayload::ContinuationProgress)
            }
            other => Err(serde::de::Error::custom(format!(
                "unknown notification method: {other}"
            ))),
        }
    }
}

/// Any frame the server writes to a channel.
///
/// `Notification` is listed first so untagged decoding does not mistake a
/// notification for an id-less response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Notification(Notification),
    Response(Response),
}

impl From<Response> for ServerMessage {
    fn from(response: Response) -> Self {
        ServerMessage::Response(response)
    }
}

impl From<Notification> for ServerMessage {
    fn from(notification: Notification) -> Self {
        ServerMessage::Notification(notification)
    }
}

// ============================================================================
// Shared Types
// ============================================================================

/// Session status as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Session is live and accepting user turns.
    Active,
    /// A turn ended early on a safety limit; the agent awaits further input.
    Paused,
    /// Session was stopped (terminal).
    Stopped,
    /// An error ended the current turn or the session.
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Active => "Active",
            SessionStatus::Paused => "Paused",
            SessionStatus::Stopped => "Stopped",
            SessionStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Structured progress reported by an agent during autonomous continuation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub steps_completed: Vec<String>,
    #[serde(default)]
    pub steps_remaining: Vec<String>,
}

/// Agent summary in list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub agent_id: String,
    pub model: String,
}

// ============================================================================
// Request Params & Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionParams {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_params: Option<SessionParams>,
}

/// Optional overrides supplied when a session starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Agent that receives the first user turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResult {
    pub session_id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendUserMessageParams {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendUserMessageResult {
    pub message_id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdParams {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSessionResult {
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSessionResult {
    pub session_id: String,
    pub status: SessionStatus,
    pub current_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchAgentParams {
    pub agent_id: String,
    /// Falls back to the session bound to the calling channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchAgentResult {
    pub success: bool,
    pub current_agent: String,
}

/// Params for methods that act on the channel's session by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionalSessionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentAgentResult {
    pub current_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentsResult {
    pub agents: Vec<AgentInfo>,
    pub current_agent: Option<String>,
}

// ============================================================================
// Notification Payloads
// ============================================================================

/// Typed notification payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPayload {
    AiMessageChunk(AiMessageChunk),
    SessionStatus(SessionStatusChange),
    ToolCall(ToolCallNotice),
    ContinuationProgress(ContinuationProgress),
}

impl NotificationPayload {
    /// Method name for this payload.
    pub fn method(&self) -> &'static str {
        match self {
            NotificationPayload::AiMessageChunk(_) => notifications::AI_MESSAGE_CHUNK,
            NotificationPayload::SessionStatus(_) => notifications::SESSION_STATUS,
            NotificationPayload::ToolCall(_) => notifications::TOOL_CALL,
            NotificationPayload::ContinuationProgress(_) => notifications::CONTINUATION_PROGRESS,
        }
    }

    fn into_parts(self) -> (&'static str, serde_json::Value) {
        let method = self.method();
        let params = match self {
            NotificationPayload::AiMessageChunk(p) => serde_json::to_value(p),
            NotificationPayload::SessionStatus(p) => serde_json::to_value(p),
            NotificationPayload::ToolCall(p) => serde_json::to_value(p),
            NotificationPayload::ContinuationProgress(p) => serde_json::to_value(p),
        };
        // Payload structs hold only strings, numbers and JSON values.
        (method, params.unwrap_or(serde_json::Value::Null))
    }
}

/// Partial or final streamed output of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiMessageChunk {
    pub session_id: String,
    pub chunk: String,
    pub is_final: bool,
}

/// Session lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusChange {
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A tool invocation identified in an agent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallNotice {
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Progress of one continuation iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationProgress {
    pub session_id: String,
    pub agent_id: String,
    pub iteration: u32,
    pub progress: Progress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parsing() {
        let json = r#"{"jsonrpc":"2.0","id":7,"method":"sendUserMessage","params":{"sessionId":"s1","message":"hi"}}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(request.id, RequestId::Number(7));
        assert_eq!(request.method, methods::SEND_USER_MESSAGE);

        let params: SendUserMessageParams = request.parse_params().unwrap();
        assert_eq!(params.session_id, "s1");
        assert_eq!(params.message, "hi");
    }

    #[test]
    fn test_missing_params_parse_as_empty_object() {
        let json = r#"{"id":"abc","method":"session.current_agent"}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(request.jsonrpc, JSONRPC_VERSION);

        let params: OptionalSessionParams = request.parse_params().unwrap();
        assert!(params.session_id.is_none());
    }

    #[test]
    fn test_response_serialization() {
        let ok = Response::success(RequestId::Number(1), serde_json::json!({"status": "Stopped"}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains(r#""result":{"status":"Stopped"}"#));
        assert!(!json.contains("error"));

        let err = Response::failure(
            Some(RequestId::String("x".into())),
            ErrorObject::new(error_codes::AGENT_NOT_FOUND, "agent not found: ghost"),
        );
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""code":"agent_not_found""#));
        assert!(!json.contains("result"));
    }

    #[test]
    fn test_notification_round_trip_through_server_message() {
        let notification = Notification::new(NotificationPayload::AiMessageChunk(AiMessageChunk {
            session_id: "s1".into(),
            chunk: "hel".into(),
            is_final: false,
        }));
        let json = serde_json::to_string(&ServerMessage::from(notification)).unwrap();
        assert!(json.contains(r#""method":"AIMessageChunk""#));
        assert!(json.contains(r#""isFinal":false"#));

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        let ServerMessage::Notification(n) = parsed else {
            panic!("expected notification");
        };
        match n.payload().unwrap() {
            NotificationPayload::AiMessageChunk(chunk) => assert_eq!(chunk.chunk, "hel"),
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn test_response_frame_decodes_as_response() {
        let json = r#"{"jsonrpc":"2.0","id":3,"result":{"status":"Stopped"}}"#;
        let parsed: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, ServerMessage::Response(_)));
    }

    #[test]
    fn test_status_reason_omitted_when_absent() {
        let payload = SessionStatusChange {
            session_id: "s1".into(),
            status: SessionStatus::Active,
            reason: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"sessionId":"s1","status":"Active"}"#);
    }

    #[test]
    fn test_progress_uses_camel_case() {
        let progress = Progress {
            current_step: Some(2),
            total_steps: Some(4),
            steps_completed: vec!["plan".into()],
            steps_remaining: vec!["test".into(), "ship".into()],
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["currentStep"], 2);
        assert_eq!(json["stepsRemaining"][1], "ship");
    }
}
