use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::Signal;
use crate::trade_event::TradeSide;

/// An agent's opinion on a whale signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stance {
    Buy,
    Sell,
    Abstain,
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stance::Buy => write!(f, "BUY"),
            Stance::Sell => write!(f, "SELL"),
            Stance::Abstain => write!(f, "ABSTAIN"),
        }
    }
}

/// Request sent to a panel agent (serialized as JSON into the user prompt).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentQuery {
    pub query_id: Uuid,
    pub signal_id: Uuid,
    pub agent_name: String,
    pub market_question: String,
    pub category: String,
    pub trade_size: Decimal,
    pub trade_side: TradeSide,
    pub outcome: String,
    pub price: Decimal,
    pub wallet: String,
}

impl AgentQuery {
    pub fn for_signal(signal: &Signal, agent_name: &str) -> Self {
        let trade = &signal.trade_event;
        Self {
            query_id: Uuid::new_v4(),
            signal_id: signal.signal_id,
            agent_name: agent_name.to_string(),
            market_question: signal.market_question.clone(),
            category: signal.category.clone(),
            trade_size: trade.size_usd,
            trade_side: trade.side,
            outcome: trade.outcome.clone(),
            price: trade.price,
            wallet: trade.wallet.clone(),
        }
    }
}

/// The structured part of an agent's reply, after parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    pub stance: Stance,
    /// 0.0 to 1.0.
    pub confidence: Decimal,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentVote {
    pub signal_id: Uuid,
    pub agent_name: String,
    pub stance: Stance,
    pub confidence: Decimal,
    pub rationale: String,
    pub responded_at: DateTime<Utc>,
}

impl AgentVote {
    pub fn from_response(signal_id: Uuid, agent_name: &str, response: AgentResponse) -> Self {
        Self {
            signal_id,
            agent_name: agent_name.to_string(),
            stance: response.stance,
            confidence: response.confidence,
            rationale: response.rationale,
            responded_at: Utc::now(),
        }
    }
}

/// Why an agent produced no vote for a signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// No answer within the per-agent or overall deadline.
    Timeout,
    /// Connection or 5xx failure, still failing after the retry budget.
    Connection(String),
    /// The agent answered but the reply did not map to a stance and confidence.
    UnparseableResponse(String),
    /// Non-retryable refusal (4xx, missing binary, bad persona).
    Rejected(String),
    /// Still outstanding when the signal resolved early.
    Cancelled,
    /// The query task itself died.
    Internal(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Connection(d) => write!(f, "connection: {d}"),
            FailureReason::UnparseableResponse(d) => write!(f, "unparseable response: {d}"),
            FailureReason::Rejected(d) => write!(f, "rejected: {d}"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Internal(d) => write!(f, "internal: {d}"),
        }
    }
}

/// Exactly one of these is recorded per configured agent per signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Vote(AgentVote),
    Failed {
        agent_name: String,
        reason: FailureReason,
    },
}

impl AgentOutcome {
    pub fn failed(agent_name: &str, reason: FailureReason) -> Self {
        AgentOutcome::Failed {
            agent_name: agent_name.to_string(),
            reason,
        }
    }

    pub fn agent_name(&self) -> &str {
        match self {
            AgentOutcome::Vote(vote) => &vote.agent_name,
            AgentOutcome::Failed { agent_name, .. } => agent_name,
        }
    }

    pub fn vote(&self) -> Option<&AgentVote> {
        match self {
            AgentOutcome::Vote(vote) => Some(vote),
            AgentOutcome::Failed { .. } => None,
        }
    }

    pub fn is_vote(&self) -> bool {
        self.vote().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stance_serialization() {
        assert_eq!(serde_json::to_string(&Stance::Abstain).unwrap(), "\"ABSTAIN\"");
        let parsed: Stance = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(parsed, Stance::Sell);
    }

    #[test]
    fn roundtrip_outcomes() {
        let vote = AgentOutcome::Vote(AgentVote {
            signal_id: Uuid::new_v4(),
            agent_name: "momentum".to_string(),
            stance: Stance::Buy,
            confidence: dec!(0.72),
            rationale: "Large size at a low price against the crowd".to_string(),
            responded_at: Utc::now(),
        });
        let failed = AgentOutcome::failed("skeptic", FailureReason::Timeout);

        for outcome in [vote, failed] {
            let json = serde_json::to_string(&outcome).unwrap();
            let parsed: AgentOutcome = serde_json::from_str(&json).unwrap();
            assert_eq!(outcome, parsed);
        }
    }

    #[test]
    fn failed_outcome_json_shape() {
        let failed = AgentOutcome::failed(
            "contrarian",
            FailureReason::UnparseableResponse("no JSON object".to_string()),
        );
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"]["kind"], "unparseable_response");
        assert_eq!(json["reason"]["detail"], "no JSON object");
        assert_eq!(failed.agent_name(), "contrarian");
        assert!(!failed.is_vote());
    }
}
