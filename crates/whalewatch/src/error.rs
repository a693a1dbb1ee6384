use thiserror::Error;
use whalewatch_agents::AgentError;
use whalewatch_models::config::ConfigError;
use whalewatch_models::signal::InvalidTransition;
use whalewatch_store::StoreError;

/// A trade record rejected before it enters the pipeline. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("Malformed trade: {0}")]
    MalformedInput(String),
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Feed payload error: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Agent setup error: {0}")]
    Agent(#[from] AgentError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("Pipeline is shutting down")]
    ShuttingDown,
}
