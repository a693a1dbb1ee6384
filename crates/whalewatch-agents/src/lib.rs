pub mod agent;
pub mod claude_cli;
pub mod error;
pub mod http;
pub mod panel;
pub mod parser;
pub mod prompts;

pub mod test_support;

pub use agent::{build_agent, build_agents, ClaudeCliAgent, PanelAgent};
pub use error::AgentError;
pub use http::HttpAgent;
pub use panel::{AgentPanel, PanelSettings, PollReport};
