//! WhaleWatch - whale-trade detection with a multi-agent consensus panel
//!
//! Large prediction-market trades are turned into signals, put in front of a
//! panel of independent LLM agents, and resolved into a single decision by a
//! consensus rule. Decisions are appended to a durable sink.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use whalewatch::models::config::WhaleWatchConfig;
//! use whalewatch::models::trade_event::RawTrade;
//! use whalewatch::pipeline::{Pipeline, Submission};
//! use whalewatch::store::MemorySink;
//! ```

pub mod consensus;
pub mod daemon;
pub mod error;
pub mod feed;
pub mod filter;
pub mod ingestor;
pub mod pipeline;
pub mod sink;

pub use whalewatch_agents as agents;
pub use whalewatch_models as models;
pub use whalewatch_store as store;

use std::sync::Arc;

use tracing::info;
use whalewatch_agents::{build_agents, AgentPanel, PanelSettings};
use whalewatch_models::config::WhaleWatchConfig;
use whalewatch_store::{DecisionSink, SqliteSink};

pub use consensus::{ConsensusEngine, ConsensusRule, Resolution};
pub use daemon::Daemon;
pub use error::{FeedError, IngestError, PipelineError};
pub use feed::{DataApiFeed, GammaDirectory, MarketDirectory, StaticDirectory, StaticFeed, TradeFeed};
pub use pipeline::{Pipeline, Submission};

/// Open the SQLite decision log named in the config.
pub fn open_sink(config: &WhaleWatchConfig) -> Result<Arc<dyn DecisionSink>, PipelineError> {
    if let Some(parent) = std::path::Path::new(&config.sink.sqlite_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Store(whalewatch_store::StoreError::Unavailable(e.to_string()))
            })?;
        }
    }
    Ok(Arc::new(SqliteSink::open(&config.sink.sqlite_path)?))
}

/// Build a pipeline from configuration, writing decisions to `sink`.
///
/// Market context comes from the `[[markets]]` table first, then (unless
/// `offline`) from the Gamma API. Must be called inside a tokio runtime.
pub fn build_pipeline(
    config: &WhaleWatchConfig,
    sink: Arc<dyn DecisionSink>,
    offline: bool,
) -> Result<Pipeline, PipelineError> {
    config.validate()?;

    let agents = build_agents(&config.agents)?;
    let panel = AgentPanel::new(agents, PanelSettings::from_config(&config.agents));

    let mut directories: Vec<Arc<dyn MarketDirectory>> =
        vec![Arc::new(StaticDirectory::new(config.markets.clone()))];
    if !offline {
        directories.push(Arc::new(GammaDirectory::new(&config.feed)?));
    }

    info!(
        mode = config.mode.as_str(),
        agents = panel.len(),
        whale_threshold_usd = %config.filter.whale_threshold_usd,
        consensus_threshold = %config.consensus.consensus_threshold,
        quorum_minimum = config.consensus.quorum_minimum,
        offline,
        "Pipeline configured"
    );

    Ok(Pipeline::new(config, panel, directories, sink))
}
