use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AgentError;

/// Longest stderr excerpt carried in a CLI error.
const STDERR_EXCERPT: usize = 512;

/// How a panel agent reaches the `claude` CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    /// Executable name or path.
    pub binary: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClaudeCliConfig {
    /// One-shot, plain-text invocation with the persona as system prompt.
    fn args<'a>(&'a self, system_prompt: &'a str, user_prompt: &'a str) -> [&'a str; 8] {
        [
            "--print",
            user_prompt,
            "--system-prompt",
            system_prompt,
            "--model",
            self.model.as_str(),
            "--output-format",
            "text",
        ]
    }
}

fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Run one CLI completion and return its stdout.
///
/// The child is killed if the returned future is dropped, so an abandoned
/// panel query leaves no process behind.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<String, AgentError> {
    debug!(binary = %config.binary, model = %config.model, "Invoking claude CLI");

    let mut command = Command::new(&config.binary);
    command
        .args(config.args(system_prompt, user_prompt))
        .kill_on_drop(true);

    let output = match tokio::time::timeout(config.timeout, command.output()).await {
        Err(_) => return Err(AgentError::Timeout(config.timeout.as_millis() as u64)),
        Ok(Err(e)) => {
            return Err(AgentError::Spawn(format!(
                "could not start {}: {e}",
                config.binary
            )))
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        let stderr = excerpt(&output.stderr);
        warn!(status = %output.status, stderr = %stderr, "Claude CLI exited with failure");
        return Err(AgentError::Cli(format!("{} ({})", stderr, output.status)));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() {
        return Err(AgentError::Parse("CLI produced no output".to_string()));
    }
    Ok(stdout)
}

/// Whether `binary --version` runs successfully.
pub async fn check_cli_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
