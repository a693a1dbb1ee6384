use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use whalewatch_models::agent_message::{AgentQuery, AgentResponse};
use whalewatch_models::config::{AgentBackend, AgentSpec, AgentsConfig};

use crate::claude_cli::{invoke_claude, ClaudeCliConfig};
use crate::error::AgentError;
use crate::http::HttpAgent;
use crate::parser::parse_agent_response;
use crate::prompts::{system_prompt, user_prompt};

/// One member of the consensus panel. Mockable for testing.
#[async_trait]
pub trait PanelAgent: Send + Sync {
    fn name(&self) -> &str;

    /// Ask for an opinion on one signal. A single attempt; the panel owns retries.
    async fn query(&self, query: &AgentQuery) -> Result<AgentResponse, AgentError>;
}

/// A panel agent that invokes the Claude CLI.
pub struct ClaudeCliAgent {
    pub name: String,
    pub persona: String,
    pub cli_config: ClaudeCliConfig,
}

impl ClaudeCliAgent {
    pub fn new(name: String, persona: String, model: String, timeout: Duration) -> Self {
        Self {
            name,
            persona,
            cli_config: ClaudeCliConfig {
                model,
                timeout,
                ..ClaudeCliConfig::default()
            },
        }
    }
}

#[async_trait]
impl PanelAgent for ClaudeCliAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, query: &AgentQuery) -> Result<AgentResponse, AgentError> {
        let system_prompt = system_prompt(&self.persona)
            .ok_or_else(|| AgentError::UnknownPersona(self.persona.clone()))?;

        let user_prompt = user_prompt(query)?;
        let raw_output = invoke_claude(&system_prompt, &user_prompt, &self.cli_config).await?;
        parse_agent_response(&raw_output)
    }
}

/// Build the agent described by `spec`, using `config` for defaults.
///
/// Fails for a persona without a prompt, so a misconfigured roster is caught
/// at startup rather than on every signal.
pub fn build_agent(
    spec: &AgentSpec,
    config: &AgentsConfig,
) -> Result<Arc<dyn PanelAgent>, AgentError> {
    let persona = spec.persona();
    if system_prompt(persona).is_none() {
        return Err(AgentError::UnknownPersona(persona.to_string()));
    }

    let model = spec
        .model
        .clone()
        .unwrap_or_else(|| config.default_model.clone());
    let timeout = Duration::from_secs(config.per_agent_timeout_seconds);

    let agent: Arc<dyn PanelAgent> = match spec.backend() {
        AgentBackend::ClaudeCli => Arc::new(ClaudeCliAgent::new(
            spec.name.clone(),
            persona.to_string(),
            model,
            timeout,
        )),
        AgentBackend::Http { endpoint } => Arc::new(HttpAgent::new(
            &spec.name, persona, endpoint, &model, timeout,
        )?),
    };
    Ok(agent)
}

/// Build every enabled agent on the roster, in roster order.
pub fn build_agents(config: &AgentsConfig) -> Result<Vec<Arc<dyn PanelAgent>>, AgentError> {
    config
        .enabled()
        .into_iter()
        .map(|spec| build_agent(spec, config))
        .collect()
}
