//! CLI command implementations.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use chorus::agent::{AgentCatalog, AgentRegistry};
use chorus::config::Config;
use chorus::session::{SessionConfig, SessionRegistry};

pub mod serve;
pub mod stdio;

/// Load the config file and build the session registry it describes.
pub fn load_registry(config: &Config) -> Result<SessionRegistry> {
    let catalog = AgentCatalog::from_config(config).context("Failed to build agent catalog")?;
    info!(
        agents = catalog.len(),
        default = catalog.default_agent().as_deref().unwrap_or("-"),
        "Loaded agents"
    );

    let agents: Arc<dyn AgentRegistry> = Arc::new(catalog);
    Ok(SessionRegistry::new(agents, SessionConfig::from(&config.sessions)))
}

pub async fn load_config(config_path: &str) -> Result<Config> {
    Config::load(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))
}
