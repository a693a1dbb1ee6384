pub mod agent_message;
pub mod config;
pub mod decision;
pub mod signal;
pub mod trade_event;
pub mod vote_book;

pub use agent_message::{AgentOutcome, AgentQuery, AgentResponse, AgentVote, FailureReason, Stance};
pub use config::{
    AgentBackend, AgentSpec, AgentsConfig, ConfigError, ConsensusConfig, EarlyExit, FeedConfig,
    FilterConfig, IngestConfig, SinkConfig, TiePolicy, WhaleWatchConfig,
};
pub use decision::{Decision, DecisionOutcome, ExecutionMode};
pub use signal::{signal_id_for, InvalidTransition, MarketContext, Signal, SignalState};
pub use trade_event::{RawTrade, TradeEvent, TradeSide};
pub use vote_book::{RecordOutcome, VoteBook};
