use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use chorus_protocol::{NotificationPayload, SessionStatus};

use crate::agent::{AgentRegistry, AgentResponse};
use crate::config::SessionsConfig;
use crate::continuation::{ContinuationDecision, TerminationReason};
use crate::notify::{Channel, Notifier};

use super::error::SessionError;
use super::history::Turn;
use super::runtime::AgentRuntime;

/// Prefix for generated message ids.
pub const MESSAGE_ID_PREFIX: &str = "msg_";

// ============================================================================
// Types
// ============================================================================

/// Session lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Started,
    Stopped,
}

/// Immutable per-session settings captured at creation.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Message sent to the agent on each autonomous re-invocation.
    pub continuation_prompt: String,
    /// Sleep after a fatal error notification so it can flush before cleanup.
    pub error_flush_grace: Duration,
    /// Overrides the agent registry's default agent.
    pub default_agent: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SessionsConfig::default())
    }
}

impl From<&SessionsConfig> for SessionConfig {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            continuation_prompt: config.continuation_prompt.clone(),
            error_flush_grace: Duration::from_millis(config.error_flush_grace_ms),
            default_agent: config.default_agent.clone(),
        }
    }
}

/// Options supplied when starting a session.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub user_id: Option<String>,
    /// Replaces the configured system prompt of the initially active agent.
    pub system_prompt: Option<String>,
    /// Initially active agent (defaults to the configured default).
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    pub agent_id: String,
    pub model: String,
}

/// Result of one completed user turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message_id: String,
    /// Contents of every invocation in the turn, separated by blank lines.
    pub content: String,
    /// Number of agent invocations, including the first.
    pub invocations: u32,
    /// Why the turn ended; `None` when the session was stopped mid-turn.
    pub termination: Option<TerminationReason>,
    pub status: SessionStatus,
}

/// Snapshot of session state for listings.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub id: String,
    pub user_id: Option<String>,
    pub lifecycle: Lifecycle,
    pub active_agent: Option<String>,
    pub agent_count: usize,
    pub created_at: DateTime<Utc>,
    pub channel_id: Option<String>,
    pub attached: bool,
}

struct AgentSlot {
    model: String,
    runtime: Arc<Mutex<AgentRuntime>>,
}

struct SessionState {
    lifecycle: Lifecycle,
    user_id: Option<String>,
    active_agent_id: Option<String>,
    agents: HashMap<String, AgentSlot>,
}

// ============================================================================
// Session
// ============================================================================

/// A conversation with a set of agents, one of which is active.
///
/// Lock discipline: `state` is a std lock and is never held across `.await`.
/// Each agent runtime sits behind its own async mutex, held for a whole turn.
pub struct Session {
    id: String,
    config: SessionConfig,
    state: RwLock<SessionState>,
    notifier: Notifier,
    tool_call_seq: AtomicU64,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, config: SessionConfig) -> Self {
        let id = id.into();
        Self {
            notifier: Notifier::new(id.clone()),
            id,
            config,
            state: RwLock::new(SessionState {
                lifecycle: Lifecycle::Created,
                user_id: None,
                active_agent_id: None,
                agents: HashMap::new(),
            }),
            tool_call_seq: AtomicU64::new(0),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.read().expect("session lock poisoned").lifecycle
    }

    pub fn current_agent(&self) -> Option<String> {
        self.state
            .read()
            .expect("session lock poisoned")
            .active_agent_id
            .clone()
    }

    /// Materialized agents, sorted by id.
    pub fn agents(&self) -> Vec<AgentSummary> {
        let state = self.state.read().expect("session lock poisoned");
        let mut agents: Vec<AgentSummary> = state
            .agents
            .iter()
            .map(|(id, slot)| AgentSummary {
                agent_id: id.clone(),
                model: slot.model.clone(),
            })
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Copy of one agent's history. Waits for an in-flight turn to finish.
    pub async fn agent_history(&self, agent_id: &str) -> Option<Vec<Turn>> {
        let runtime = self.runtime(agent_id)?;
        let runtime = runtime.lock().await;
        Some(runtime.history().to_vec())
    }

    pub fn metadata(&self) -> SessionMetadata {
        let state = self.state.read().expect("session lock poisoned");
        SessionMetadata {
            id: self.id.clone(),
            user_id: state.user_id.clone(),
            lifecycle: state.lifecycle,
            active_agent: state.active_agent_id.clone(),
            agent_count: state.agents.len(),
            created_at: self.created_at,
            channel_id: self.notifier.channel_id(),
            attached: self.notifier.is_attached(),
        }
    }

    fn runtime(&self, agent_id: &str) -> Option<Arc<Mutex<AgentRuntime>>> {
        let state = self.state.read().expect("session lock poisoned");
        state.agents.get(agent_id).map(|slot| slot.runtime.clone())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Transition `Created -> Started`, materializing every known agent.
    pub async fn start(
        &self,
        registry: &dyn AgentRegistry,
        options: StartOptions,
    ) -> Result<(), SessionError> {
        match self.lifecycle() {
            Lifecycle::Created => {}
            Lifecycle::Started => {
                return Err(SessionError::InvalidState("session already started".into()));
            }
            Lifecycle::Stopped => {
                return Err(SessionError::InvalidState("session is stopped".into()));
            }
        }

        let active = options
            .agent_id
            .clone()
            .or_else(|| self.config.default_agent.clone())
            .or_else(|| registry.default_agent())
            .ok_or_else(|| SessionError::AgentNotFound("no agents configured".into()))?;

        let mut agents = HashMap::new();
        for agent_id in registry.agent_ids() {
            let Some(definition) = registry.resolve(&agent_id) else {
                continue;
            };
            let prompt = if agent_id == active {
                options.system_prompt.as_deref()
            } else {
                None
            };
            let slot = AgentSlot {
                model: definition.model.clone(),
                runtime: Arc::new(Mutex::new(AgentRuntime::new(definition, prompt))),
            };
            agents.insert(agent_id, slot);
        }
        if !agents.contains_key(&active) {
            return Err(SessionError::AgentNotFound(active));
        }

        {
            let mut state = self.state.write().expect("session lock poisoned");
            if state.lifecycle != Lifecycle::Created {
                return Err(SessionError::InvalidState(
                    "session changed state while starting".into(),
                ));
            }
            state.lifecycle = Lifecycle::Started;
            state.user_id = options.user_id;
            state.active_agent_id = Some(active.clone());
            state.agents = agents;
        }

        info!(session_id = %self.id, agent = %active, "Session started");
        self.notifier.status(SessionStatus::Active, None).await;
        Ok(())
    }

    /// Transition to `Stopped`. Returns false if already stopped.
    pub async fn stop(&self) -> bool {
        let changed = {
            let mut state = self.state.write().expect("session lock poisoned");
            let changed = state.lifecycle != Lifecycle::Stopped;
            state.lifecycle = Lifecycle::Stopped;
            changed
        };

        if changed {
            info!(session_id = %self.id, "Session stopped");
            self.notifier.status(SessionStatus::Stopped, None).await;
        }
        changed
    }

    /// Drop every agent runtime. Runtimes busy with a turn are released when
    /// that turn finishes.
    pub(crate) fn release(&self) {
        let agents = {
            let mut state = self.state.write().expect("session lock poisoned");
            state.active_agent_id = None;
            std::mem::take(&mut state.agents)
        };

        for slot in agents.into_values() {
            if let Ok(mut runtime) = slot.runtime.try_lock() {
                runtime.release();
            }
        }
    }

    /// Emit an `Error` status and wait for it to flush.
    pub(crate) async fn report_fatal(&self, reason: &str) {
        self.notifier.status(SessionStatus::Error, Some(reason)).await;
        tokio::time::sleep(self.config.error_flush_grace).await;
    }

    pub(crate) fn attach_channel(&self, channel: &Arc<dyn Channel>) {
        self.notifier.attach(channel);
    }

    pub(crate) fn detach_channel(&self) -> Option<String> {
        self.notifier.detach()
    }

    // ------------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------------

    /// Make `agent_id` the active agent.
    ///
    /// Concurrent switches are not serialized: the last write wins. The new
    /// agent's continuation state is left alone; the next turn resets it.
    pub fn switch_agent(&self, agent_id: &str) -> Result<(), SessionError> {
        let previous = {
            let mut state = self.state.write().expect("session lock poisoned");
            if !state.agents.contains_key(agent_id) {
                return Err(SessionError::AgentNotFound(agent_id.to_string()));
            }
            state.active_agent_id.replace(agent_id.to_string())
        };

        info!(
            session_id = %self.id,
            from = previous.as_deref().unwrap_or("-"),
            to = %agent_id,
            "Switched agent"
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------------

    /// Drive one user turn to completion.
    ///
    /// Re-invokes the active agent with the continuation prompt while its
    /// strategy says CONTINUE. On an invocation error an `Error` status is
    /// emitted and the error is returned; the failed exchange is not recorded.
    pub async fn send_user_message(&self, text: &str) -> Result<TurnOutcome, SessionError> {
        let (agent_id, runtime) = {
            let state = self.state.read().expect("session lock poisoned");
            if state.lifecycle != Lifecycle::Started {
                return Err(SessionError::NotStarted);
            }
            let agent_id = state
                .active_agent_id
                .clone()
                .ok_or(SessionError::NotStarted)?;
            let slot = state.agents.get(&agent_id).ok_or(SessionError::NotStarted)?;
            (agent_id, slot.runtime.clone())
        };

        let mut runtime = runtime.lock().await;
        runtime.begin_turn();

        let message_id = format!("{}{}", MESSAGE_ID_PREFIX, Ulid::new());
        debug!(session_id = %self.id, agent = %agent_id, message_id = %message_id, "Turn started");

        let sink = self.notifier.chunk_sink();
        let mut message = text.to_string();
        let mut contents = Vec::new();
        let mut invocations: u32 = 0;

        let termination = loop {
            invocations += 1;
            let response = match runtime.invoke(&message, &sink).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        session_id = %self.id,
                        agent = %agent_id,
                        invocation = invocations,
                        error = %e,
                        "Agent invocation failed"
                    );
                    self.notifier
                        .status(SessionStatus::Error, Some(&e.to_string()))
                        .await;
                    return Err(SessionError::Invocation(e));
                }
            };

            runtime.record(&message, &response);
            self.emit_tool_calls(&response).await;

            let decision = runtime.advance(&response);
            if let Some(progress) = response.progress() {
                self.notifier
                    .progress(&agent_id, invocations - 1, progress)
                    .await;
            }
            contents.push(response.content);

            match decision {
                ContinuationDecision::Continue(_) => {
                    if self.lifecycle() == Lifecycle::Stopped {
                        debug!(session_id = %self.id, "Session stopped mid-turn");
                        break None;
                    }
                    message.clone_from(&self.config.continuation_prompt);
                }
                ContinuationDecision::Terminate(reason) => break Some(reason),
            }
        };
        drop(runtime);

        self.notifier.chunk("", true).await;

        let status = match termination {
            Some(reason) if reason.is_safety_limit() => {
                self.notifier
                    .status(SessionStatus::Paused, Some(reason.as_str()))
                    .await;
                SessionStatus::Paused
            }
            Some(_) => {
                self.notifier.status(SessionStatus::Active, None).await;
                SessionStatus::Active
            }
            None => SessionStatus::Stopped,
        };

        debug!(
            session_id = %self.id,
            message_id = %message_id,
            invocations,
            reason = termination.map(|r| r.as_str()).unwrap_or("stopped"),
            "Turn finished"
        );

        Ok(TurnOutcome {
            message_id,
            content: contents.join("\n\n"),
            invocations,
            termination,
            status,
        })
    }

    /// Forward a notification to the attached channel, if any.
    pub async fn send_notification(&self, payload: NotificationPayload) {
        self.notifier.send(payload).await;
    }

    async fn emit_tool_calls(&self, response: &AgentResponse) {
        for call in &response.tool_calls {
            let id = match &call.id {
                Some(id) => id.clone(),
                None => self.next_tool_call_id(),
            };
            self.notifier
                .tool_call(&id, &call.name, call.arguments.clone())
                .await;
        }
    }

    fn next_tool_call_id(&self) -> String {
        let index = self.tool_call_seq.fetch_add(1, Ordering::Relaxed);
        format!("tool-{}-{}", self.id, index)
    }
}
