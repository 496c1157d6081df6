use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::continuation::{ContinuationConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_TIMEOUT_SECONDS};

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Continuation defaults applied to every agent.
    #[serde(default)]
    pub continuation: ContinuationSettings,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load and validate the config file. A missing file yields defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::parse(&contents)
    }

    /// Parse and validate YAML text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: Self = serde_saphyr::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.continuation.build()?;

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(ConfigError::Invalid("agent id must not be empty".into()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
            self.continuation
                .merged(&agent.continuation)
                .build()
                .map_err(|e| ConfigError::Invalid(format!("agent '{}': {e}", agent.id)))?;
        }

        if let Some(default) = &self.sessions.default_agent {
            let known = if self.agents.is_empty() {
                default == "echo"
            } else {
                seen.contains(default.as_str())
            };
            if !known {
                return Err(ConfigError::Invalid(format!(
                    "default_agent '{default}' is not a configured agent"
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_disconnect_timeout() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_error_flush_grace() -> u64 {
    200
}

fn default_continuation_prompt() -> String {
    "Continue with the next step.".to_string()
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_timeout_seconds() -> f64 {
    DEFAULT_TIMEOUT_SECONDS
}

/// Serde default for bool fields that should be `true` (serde's default is `false`).
fn default_true() -> bool {
    true
}

fn default_continuation_patterns() -> Vec<String> {
    [
        r"\bnext,? I(?:'ll| will)\b",
        r"\blet me (?:now )?(?:continue|proceed)\b",
        r"\bcontinuing with\b",
        r"\bstep \d+ of \d+\b",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_termination_patterns() -> Vec<String> {
    [
        r"\btask (?:is )?complete\b",
        r"\ball (?:steps|tasks) (?:are )?(?:done|complete)\b",
        r"\bfinal answer\b",
        r"\bI(?:'m| am) done\b",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports the following syntax (shell-compatible):
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Escaped `$`
///
/// No nested expansion: `${VAR:-${DEFAULT}}` is not supported.
///
/// ```yaml
/// api_key: ${OPENAI_API_KEY}
/// port: ${CHORUS_PORT:-8787}
/// ```
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                result.push_str(&parse_var_reference(&mut chars)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Parse a variable reference after seeing `${`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;
    let mut closed = false;

    while let Some(c) = chars.next() {
        if c == '}' {
            closed = true;
            break;
        }
        if let Some(default) = default_value.as_mut() {
            default.push(c);
        } else if c == ':' && chars.peek() == Some(&'-') {
            chars.next(); // consume '-'
            default_value = Some(String::new());
        } else {
            var_name.push(c);
        }
    }

    if !closed {
        return Err(ConfigError::UnclosedVarReference);
    }

    match std::env::var(&var_name) {
        Ok(value) => Ok(value),
        Err(_) => default_value.ok_or(ConfigError::MissingEnvVar(var_name)),
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

// ============================================================================
// SessionsConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Detached sessions older than this are stopped and cleaned up (0 disables).
    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Grace sleep after an error notification before cleanup.
    #[serde(default = "default_error_flush_grace")]
    pub error_flush_grace_ms: u64,
    /// Message sent to the agent on each autonomous re-invocation.
    #[serde(default = "default_continuation_prompt")]
    pub continuation_prompt: String,
    #[serde(default)]
    pub default_agent: Option<String>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            disconnect_timeout_seconds: default_disconnect_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            error_flush_grace_ms: default_error_flush_grace(),
            continuation_prompt: default_continuation_prompt(),
            default_agent: None,
        }
    }
}

impl SessionsConfig {
    pub fn disconnect_timeout(&self) -> Option<Duration> {
        (self.disconnect_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.disconnect_timeout_seconds))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

// ============================================================================
// ContinuationSettings
// ============================================================================

/// Raw continuation settings as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ContinuationSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default = "default_true")]
    pub require_explicit_signal: bool,
    #[serde(default = "default_continuation_patterns")]
    pub continuation_patterns: Vec<String>,
    #[serde(default = "default_termination_patterns")]
    pub termination_patterns: Vec<String>,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_seconds: default_timeout_seconds(),
            require_explicit_signal: true,
            continuation_patterns: default_continuation_patterns(),
            termination_patterns: default_termination_patterns(),
        }
    }
}

impl ContinuationSettings {
    /// Apply a per-agent override field by field.
    pub fn merged(&self, overrides: &ContinuationOverride) -> Self {
        Self {
            max_iterations: overrides.max_iterations.unwrap_or(self.max_iterations),
            timeout_seconds: overrides.timeout_seconds.unwrap_or(self.timeout_seconds),
            require_explicit_signal: overrides
                .require_explicit_signal
                .unwrap_or(self.require_explicit_signal),
            continuation_patterns: overrides
                .continuation_patterns
                .clone()
                .unwrap_or_else(|| self.continuation_patterns.clone()),
            termination_patterns: overrides
                .termination_patterns
                .clone()
                .unwrap_or_else(|| self.termination_patterns.clone()),
        }
    }

    /// Validate and compile into a runtime config.
    pub fn build(&self) -> Result<ContinuationConfig, ConfigError> {
        ContinuationConfig::new(
            self.max_iterations,
            self.timeout_seconds,
            self.require_explicit_signal,
        )
        .and_then(|c| c.with_patterns(&self.continuation_patterns, &self.termination_patterns))
        .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Partial continuation settings for one agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContinuationOverride {
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub require_explicit_signal: Option<bool>,
    #[serde(default)]
    pub continuation_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub termination_patterns: Option<Vec<String>>,
}

// ============================================================================
// Agents
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Echo,
    Openai,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub continuation: ContinuationOverride,
}

impl AgentEntry {
    /// Label shown to clients, e.g. `openai/gpt-4o-mini`.
    pub fn display_model(&self) -> String {
        match (self.provider, &self.model) {
            (Provider::Echo, _) => "echo".to_string(),
            (Provider::Openai, Some(model)) => format!("openai/{model}"),
            (Provider::Openai, None) => "openai".to_string(),
        }
    }
}
