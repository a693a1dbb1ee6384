use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};
use whalewatch_models::agent_message::{AgentQuery, AgentResponse};

use crate::agent::PanelAgent;
use crate::error::AgentError;
use crate::parser::parse_agent_response;
use crate::prompts::{system_prompt, user_prompt};

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    agent: &'a str,
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
}

/// Panel agent that POSTs its prompt to an HTTP model gateway.
///
/// The gateway may answer with the opinion object itself, or wrap the model's
/// text in a `text`, `completion` or `content` field.
pub struct HttpAgent {
    name: String,
    system_prompt: String,
    endpoint: String,
    model: String,
    timeout: Duration,
    http: Client,
}

impl HttpAgent {
    pub fn new(
        name: &str,
        persona: &str,
        endpoint: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let system_prompt = system_prompt(persona)
            .ok_or_else(|| AgentError::UnknownPersona(persona.to_string()))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            system_prompt,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            timeout,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Text to hand to the response parser.
fn reply_text(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        if map.contains_key("stance") {
            return body.to_string();
        }
        for key in ["text", "completion", "content"] {
            if let Some(text) = map.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.to_string()
}

#[async_trait]
impl PanelAgent for HttpAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, query: &AgentQuery) -> Result<AgentResponse, AgentError> {
        let prompt = user_prompt(query)?;
        let request = GatewayRequest {
            agent: &self.name,
            model: &self.model,
            system: &self.system_prompt,
            prompt: &prompt,
        };

        debug!(agent = %self.name, endpoint = %self.endpoint, "Querying gateway");
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    AgentError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::Connection(e.to_string()))?;

        if !status.is_success() {
            warn!(agent = %self.name, status = %status, "Gateway error");
            return Err(AgentError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_agent_response(&reply_text(&body))
    }
}
