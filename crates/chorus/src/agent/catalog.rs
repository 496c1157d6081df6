use std::sync::Arc;

use tracing::info;

use super::{AgentInvoker, EchoInvoker};
use crate::config::{AgentEntry, Config, ConfigError, Provider};
use crate::continuation::ContinuationConfig;
use crate::llm::{OpenAiInvoker, OpenAiSettings};

/// Everything needed to materialize an agent runtime.
#[derive(Clone)]
pub struct AgentDefinition {
    pub id: String,
    /// Model/provider label shown to clients.
    pub model: String,
    pub system_prompt: Option<String>,
    pub continuation: ContinuationConfig,
    pub invoker: Arc<dyn AgentInvoker>,
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("continuation", &self.continuation)
            .finish_non_exhaustive()
    }
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, model: impl Into<String>, invoker: Arc<dyn AgentInvoker>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            system_prompt: None,
            continuation: ContinuationConfig::default(),
            invoker,
        }
    }

    pub fn with_continuation(mut self, continuation: ContinuationConfig) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Read-only lookup from agent id to its definition.
pub trait AgentRegistry: Send + Sync {
    fn resolve(&self, agent_id: &str) -> Option<AgentDefinition>;

    /// All known agent ids, in declaration order.
    fn agent_ids(&self) -> Vec<String>;

    /// Agent that receives user turns when a session does not pick one.
    fn default_agent(&self) -> Option<String>;
}

/// In-memory agent registry, usually built from the config file.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    agents: Vec<AgentDefinition>,
    default_agent: Option<String>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent, replacing any existing one with the same id.
    pub fn with_agent(mut self, definition: AgentDefinition) -> Self {
        self.agents.retain(|a| a.id != definition.id);
        self.agents.push(definition);
        self
    }

    pub fn with_default(mut self, agent_id: impl Into<String>) -> Self {
        self.default_agent = Some(agent_id.into());
        self
    }

    /// Build the catalog described by `config`.
    ///
    /// A config without agents yields a single `echo` agent so the server is
    /// usable without credentials.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut catalog = Self::new();

        if config.agents.is_empty() {
            let continuation = config.continuation.build()?;
            catalog = catalog.with_agent(
                AgentDefinition::new("echo", "echo", Arc::new(EchoInvoker::new()))
                    .with_continuation(continuation),
            );
        }

        for entry in &config.agents {
            let continuation = config.continuation.merged(&entry.continuation).build()?;
            let mut definition = AgentDefinition::new(
                entry.id.clone(),
                entry.display_model(),
                build_invoker(entry)?,
            )
            .with_continuation(continuation);
            definition.system_prompt = entry.system_prompt.clone();
            catalog = catalog.with_agent(definition);
        }

        if let Some(default) = &config.sessions.default_agent {
            catalog = catalog.with_default(default.clone());
        }

        info!(agents = catalog.len(), "Loaded agent catalog");
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.id == agent_id)
    }
}

impl AgentRegistry for AgentCatalog {
    fn resolve(&self, agent_id: &str) -> Option<AgentDefinition> {
        self.get(agent_id).cloned()
    }

    fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id.clone()).collect()
    }

    fn default_agent(&self) -> Option<String> {
        self.default_agent
            .clone()
            .or_else(|| self.agents.first().map(|a| a.id.clone()))
    }
}

fn build_invoker(entry: &AgentEntry) -> Result<Arc<dyn AgentInvoker>, ConfigError> {
    match entry.provider {
        Provider::Echo => Ok(Arc::new(EchoInvoker::new())),
        Provider::Openai => {
            let settings = OpenAiSettings {
                base_url: entry.base_url.clone(),
                api_key: entry.api_key.clone(),
                model: entry.model.clone().ok_or_else(|| {
                    ConfigError::Invalid(format!("agent '{}': openai provider needs a model", entry.id))
                })?,
            };
            let invoker = OpenAiInvoker::new(settings)
                .map_err(|e| ConfigError::Invalid(format!("agent '{}': {e}", entry.id)))?;
            Ok(Arc::new(invoker))
        }
    }
}
