use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_message::{AgentOutcome, Stance};
use crate::signal::SignalState;

pub const DECISION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Buy,
    Sell,
    NoTrade,
}

impl DecisionOutcome {
    pub fn is_actionable(self) -> bool {
        !matches!(self, DecisionOutcome::NoTrade)
    }
}

impl From<Stance> for DecisionOutcome {
    fn from(stance: Stance) -> Self {
        match stance {
            Stance::Buy => DecisionOutcome::Buy,
            Stance::Sell => DecisionOutcome::Sell,
            Stance::Abstain => DecisionOutcome::NoTrade,
        }
    }
}

impl std::fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionOutcome::Buy => write!(f, "BUY"),
            DecisionOutcome::Sell => write!(f, "SELL"),
            DecisionOutcome::NoTrade => write!(f, "NO_TRADE"),
        }
    }
}

/// Whether decisions are paper-tracked or meant for a live executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Paper,
    Live,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Paper => "paper",
            ExecutionMode::Live => "live",
        }
    }
}

/// The terminal verdict for one signal. Written once to the decision sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub schema_version: u32,
    pub signal_id: Uuid,
    pub outcome: DecisionOutcome,
    /// Terminal state the signal reached.
    pub state: SignalState,
    /// Share of non-failed votes held by the leading stance; zero when there were none.
    pub agreement_ratio: Decimal,
    pub votes_considered: u32,
    pub votes_expected: u32,
    pub decided_at: DateTime<Utc>,
    pub mode: ExecutionMode,
    pub trade_id: String,
    pub market_id: String,
    /// Every agent's vote or failure, in roster order.
    pub agent_outcomes: Vec<AgentOutcome>,
}
