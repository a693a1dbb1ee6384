use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::trade_event::TradeEvent;

/// Namespace for deriving signal ids from trade ids (UUIDv5).
pub const SIGNAL_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2c4e_8a3b_4f70_9d15_a2c7_e0b4_3e91);

/// Derive the signal id for a trade. Re-ingesting the same trade always
/// yields the same id.
pub fn signal_id_for(trade_id: &str) -> Uuid {
    Uuid::new_v5(&SIGNAL_NAMESPACE, trade_id.as_bytes())
}

/// Question text and category of the market a trade belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketContext {
    pub market_id: String,
    pub question: String,
    pub category: String,
}

impl MarketContext {
    pub const UNCATEGORIZED: &'static str = "uncategorized";

    pub fn new(market_id: impl Into<String>, question: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            question: question.into(),
            category: category.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalState {
    Detected,
    Polling,
    ConsensusReached,
    NoConsensus,
    TimedOut,
}

impl SignalState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SignalState::ConsensusReached | SignalState::NoConsensus | SignalState::TimedOut
        )
    }

    /// DETECTED → POLLING → {CONSENSUS_REACHED, NO_CONSENSUS, TIMED_OUT}.
    pub fn can_transition_to(self, next: SignalState) -> bool {
        match self {
            SignalState::Detected => next == SignalState::Polling,
            SignalState::Polling => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SignalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalState::Detected => "DETECTED",
            SignalState::Polling => "POLLING",
            SignalState::ConsensusReached => "CONSENSUS_REACHED",
            SignalState::NoConsensus => "NO_CONSENSUS",
            SignalState::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid signal transition {from} -> {to} for {signal_id}")]
pub struct InvalidTransition {
    pub signal_id: Uuid,
    pub from: SignalState,
    pub to: SignalState,
}

/// One qualifying trade awaiting a consensus verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub signal_id: Uuid,
    pub trade_event: TradeEvent,
    pub market_question: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub state: SignalState,
}

impl Signal {
    pub fn from_trade(trade_event: TradeEvent, context: &MarketContext) -> Self {
        Self {
            signal_id: signal_id_for(&trade_event.trade_id),
            trade_event,
            market_question: context.question.clone(),
            category: context.category.clone(),
            created_at: Utc::now(),
            state: SignalState::Detected,
        }
    }

    pub fn transition(&mut self, next: SignalState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                signal_id: self.signal_id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn is_retired(&self) -> bool {
        self.state.is_terminal()
    }
}
