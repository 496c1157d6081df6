use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use chorus_protocol::{
    AgentInfo, CurrentAgentResult, ListAgentsResult, OptionalSessionParams, Request, Response,
    ResumeSessionResult, SendUserMessageParams, SendUserMessageResult, SessionIdParams,
    SessionStatus, StartSessionParams, StartSessionResult, StopSessionResult, SwitchAgentParams,
    SwitchAgentResult, methods,
};

use super::RpcError;
use crate::notify::Channel;
use crate::session::{Session, SessionError, SessionRegistry, StartOptions};

/// Maps protocol methods onto the session registry.
pub struct RpcHandler {
    registry: SessionRegistry,
}

impl RpcHandler {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Handle one request arriving on `channel`.
    pub async fn handle(&self, channel: &Arc<dyn Channel>, request: Request) -> Response {
        let id = request.id.clone();
        match self.dispatch(channel, &request).await {
            Ok(result) => Response::success(id, result),
            Err(e) => {
                debug!(method = %request.method, code = e.code, error = %e.message, "Request failed");
                Response::failure(Some(id), e.into())
            }
        }
    }

    async fn dispatch(
        &self,
        channel: &Arc<dyn Channel>,
        request: &Request,
    ) -> Result<serde_json::Value, RpcError> {
        match request.method.as_str() {
            methods::START_SESSION => self.start_session(channel, params(request)?).await,
            methods::SEND_USER_MESSAGE => self.send_user_message(params(request)?).await,
            methods::STOP_SESSION => self.stop_session(params(request)?).await,
            methods::RESUME_SESSION => self.resume_session(channel, params(request)?).await,
            methods::SWITCH_AGENT => self.switch_agent(channel, params(request)?),
            methods::CURRENT_AGENT => self.current_agent(channel, params(request)?),
            methods::LIST_AGENTS => self.list_agents(channel, params(request)?),
            other => Err(RpcError::method_not_found(other)),
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn start_session(
        &self,
        channel: &Arc<dyn Channel>,
        params: StartSessionParams,
    ) -> Result<serde_json::Value, RpcError> {
        let session_params = params.session_params.unwrap_or_default();
        let options = StartOptions {
            user_id: Some(params.user_id),
            system_prompt: session_params.system_prompt,
            agent_id: session_params.agent_id,
        };

        let session_id = self.registry.create_session(Some(channel));
        if let Err(e) = self.registry.start_session(&session_id, options).await {
            // Fatal start errors are already cleaned up by the registry.
            if self.registry.get_session(&session_id).is_some() {
                self.registry.stop_session(&session_id).await;
                self.registry.cleanup_session(&session_id);
            }
            return Err(e.into());
        }

        to_result(StartSessionResult {
            session_id,
            status: SessionStatus::Active,
        })
    }

    async fn send_user_message(
        &self,
        params: SendUserMessageParams,
    ) -> Result<serde_json::Value, RpcError> {
        let session = self.session(&params.session_id)?;
        let outcome = session.send_user_message(&params.message).await?;

        to_result(SendUserMessageResult {
            message_id: outcome.message_id,
            status: outcome.status,
        })
    }

    async fn stop_session(&self, params: SessionIdParams) -> Result<serde_json::Value, RpcError> {
        self.registry.stop_session(&params.session_id).await;
        self.registry.cleanup_session(&params.session_id);

        to_result(StopSessionResult {
            status: SessionStatus::Stopped,
        })
    }

    async fn resume_session(
        &self,
        channel: &Arc<dyn Channel>,
        params: SessionIdParams,
    ) -> Result<serde_json::Value, RpcError> {
        let session = self.registry.attach_channel(&params.session_id, channel)?;
        session
            .notifier()
            .status(SessionStatus::Active, Some("resumed"))
            .await;
        info!(session_id = %session.id(), "Session resumed");

        to_result(ResumeSessionResult {
            session_id: session.id().to_string(),
            status: SessionStatus::Active,
            current_agent: session.current_agent(),
        })
    }

    // ------------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------------

    fn switch_agent(
        &self,
        channel: &Arc<dyn Channel>,
        params: SwitchAgentParams,
    ) -> Result<serde_json::Value, RpcError> {
        let session = self.resolve(channel, params.session_id.as_deref())?;
        session.switch_agent(&params.agent_id)?;

        to_result(SwitchAgentResult {
            success: true,
            current_agent: params.agent_id,
        })
    }

    fn current_agent(
        &self,
        channel: &Arc<dyn Channel>,
        params: OptionalSessionParams,
    ) -> Result<serde_json::Value, RpcError> {
        let session = self.resolve(channel, params.session_id.as_deref())?;
        to_result(CurrentAgentResult {
            current_agent: session.current_agent(),
        })
    }

    fn list_agents(
        &self,
        channel: &Arc<dyn Channel>,
        params: OptionalSessionParams,
    ) -> Result<serde_json::Value, RpcError> {
        let session = self.resolve(channel, params.session_id.as_deref())?;
        let agents = session
            .agents()
            .into_iter()
            .map(|a| AgentInfo {
                agent_id: a.agent_id,
                model: a.model,
            })
            .collect();

        to_result(ListAgentsResult {
            agents,
            current_agent: session.current_agent(),
        })
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn session(&self, session_id: &str) -> Result<Arc<Session>, RpcError> {
        self.registry
            .get_session(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()).into())
    }

    /// Explicit id first, then the session bound to the calling channel.
    fn resolve(
        &self,
        channel: &Arc<dyn Channel>,
        session_id: Option<&str>,
    ) -> Result<Arc<Session>, RpcError> {
        match session_id {
            Some(id) => self.session(id),
            None => self
                .registry
                .get_session_by_channel(channel.id())
                .ok_or_else(|| {
                    RpcError::from(SessionError::SessionNotFound(format!(
                        "no session bound to channel {}",
                        channel.id()
                    )))
                }),
        }
    }
}

fn params<T: DeserializeOwned>(request: &Request) -> Result<T, RpcError> {
    request
        .parse_params()
        .map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn to_result<T: Serialize>(value: T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal(e.to_string()))
}
