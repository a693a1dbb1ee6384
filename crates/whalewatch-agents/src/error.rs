use thiserror::Error;
use whalewatch_models::agent_message::FailureReason;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Claude CLI error: {0}")]
    Cli(String),

    #[error("Failed to launch agent: {0}")]
    Spawn(String),

    #[error("Gateway connection error: {0}")]
    Connection(String),

    #[error("Gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Agent timed out after {0} ms")]
    Timeout(u64),

    #[error("No prompt for persona: {0}")]
    UnknownPersona(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Worth one more attempt: connection drops, 5xx, rate limits, a CLI that exited non-zero.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Cli(_) | AgentError::Connection(_) => true,
            AgentError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn failure_reason(&self) -> FailureReason {
        match self {
            AgentError::Timeout(_) => FailureReason::Timeout,
            AgentError::Parse(detail) => FailureReason::UnparseableResponse(detail.clone()),
            e if e.is_transient() => FailureReason::Connection(e.to_string()),
            e => FailureReason::Rejected(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AgentError::Connection("reset".into()).is_transient());
        assert!(AgentError::Cli("exit 1".into()).is_transient());
        assert!(AgentError::Status { status: 503, body: String::new() }.is_transient());
        assert!(AgentError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!AgentError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!AgentError::Parse("garbage".into()).is_transient());
        assert!(!AgentError::Spawn("not found".into()).is_transient());
        assert!(!AgentError::Timeout(100).is_transient());
    }

    #[test]
    fn maps_to_failure_reasons() {
        assert_eq!(AgentError::Timeout(5).failure_reason(), FailureReason::Timeout);
        assert_eq!(
            AgentError::Parse("no JSON".into()).failure_reason(),
            FailureReason::UnparseableResponse("no JSON".into())
        );
        assert!(matches!(
            AgentError::Status { status: 502, body: "bad gateway".into() }.failure_reason(),
            FailureReason::Connection(_)
        ));
        assert!(matches!(
            AgentError::Status { status: 401, body: String::new() }.failure_reason(),
            FailureReason::Rejected(_)
        ));
    }
}
