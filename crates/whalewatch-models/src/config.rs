use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decision::ExecutionMode;
use crate::signal::MarketContext;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Agent roster has no enabled agents")]
    EmptyRoster,

    #[error("Agent name appears more than once: {0}")]
    DuplicateAgent(String),

    #[error("Consensus threshold {0} is outside [0, 1]")]
    ThresholdOutOfRange(Decimal),

    #[error("Whale threshold must not be negative, got {0}")]
    NegativeWhaleThreshold(Decimal),

    #[error("Quorum minimum {quorum} must be between 1 and the {agents} enabled agents")]
    QuorumOutOfRange { quorum: usize, agents: usize },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("max_retries {0} exceeds the limit of {MAX_RETRIES_LIMIT}")]
    TooManyRetries(u32),
}

/// An agent gets at most one retry after a transient failure.
pub const MAX_RETRIES_LIMIT: u32 = 1;

/// Top-level configuration, loaded once at startup and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WhaleWatchConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    /// Market contexts served without a network lookup.
    #[serde(default)]
    pub markets: Vec<MarketContext>,
}

impl WhaleWatchConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.whale_threshold_usd.is_sign_negative() {
            return Err(ConfigError::NegativeWhaleThreshold(
                self.filter.whale_threshold_usd,
            ));
        }

        let enabled = self.agents.enabled();
        if enabled.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }

        let mut seen = HashSet::new();
        for spec in &self.agents.roster {
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateAgent(spec.name.clone()));
            }
        }

        let threshold = self.consensus.consensus_threshold;
        if threshold < Decimal::ZERO || threshold > Decimal::ONE {
            return Err(ConfigError::ThresholdOutOfRange(threshold));
        }

        let quorum = self.consensus.quorum_minimum;
        if quorum == 0 || quorum > enabled.len() {
            return Err(ConfigError::QuorumOutOfRange {
                quorum,
                agents: enabled.len(),
            });
        }

        if self.agents.per_agent_timeout_seconds == 0 {
            return Err(ConfigError::ZeroValue("agents.per_agent_timeout_seconds"));
        }
        if self.agents.overall_timeout_seconds == 0 {
            return Err(ConfigError::ZeroValue("agents.overall_timeout_seconds"));
        }
        if self.agents.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::TooManyRetries(self.agents.max_retries));
        }
        if self.feed.poll_interval_seconds == 0 {
            return Err(ConfigError::ZeroValue("feed.poll_interval_seconds"));
        }
        if self.ingest.dedup_capacity == 0 {
            return Err(ConfigError::ZeroValue("ingest.dedup_capacity"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterConfig {
    /// Minimum notional size (USD) for a trade to count as a whale. Inclusive.
    #[serde(default = "default_whale_threshold")]
    pub whale_threshold_usd: Decimal,
    /// Market categories treated as noise (matched case-insensitively).
    #[serde(default = "default_excluded_categories")]
    pub excluded_categories: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            whale_threshold_usd: default_whale_threshold(),
            excluded_categories: default_excluded_categories(),
        }
    }
}

/// Configuration for the agent panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentsConfig {
    /// Deadline for one agent, covering its retry.
    #[serde(default = "default_per_agent_timeout")]
    pub per_agent_timeout_seconds: u64,
    /// Deadline for the whole panel poll.
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_seconds: u64,
    /// Retries on transient failure (connection errors, 5xx). 0 or 1.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Model for agents that don't override it.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_roster")]
    pub roster: Vec<AgentSpec>,
}

impl AgentsConfig {
    pub fn enabled(&self) -> Vec<&AgentSpec> {
        self.roster.iter().filter(|a| a.enabled).collect()
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            per_agent_timeout_seconds: default_per_agent_timeout(),
            overall_timeout_seconds: default_overall_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            default_model: default_model(),
            roster: default_roster(),
        }
    }
}

/// One agent on the panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    /// Prompt persona. Falls back to `name`.
    #[serde(default)]
    pub persona: Option<String>,
    /// HTTP gateway endpoint. When absent the agent runs through the `claude` CLI.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Override model for this agent. Falls back to `AgentsConfig::default_model`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AgentSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            persona: None,
            endpoint: None,
            model: None,
            enabled: true,
        }
    }

    pub fn persona(&self) -> &str {
        self.persona.as_deref().unwrap_or(&self.name)
    }

    pub fn backend(&self) -> AgentBackend<'_> {
        match &self.endpoint {
            Some(endpoint) => AgentBackend::Http { endpoint },
            None => AgentBackend::ClaudeCli,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentBackend<'a> {
    ClaudeCli,
    Http { endpoint: &'a str },
}

/// How to settle an exact tie between BUY and SELL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// Ties abstain: the signal ends in NO_CONSENSUS.
    #[default]
    NoTrade,
    /// Ties go to the stance with the larger summed confidence; still NO_TRADE if equal.
    Confidence,
}

/// When the panel may stop waiting for stragglers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EarlyExit {
    /// Always wait for every agent or the overall timeout.
    Off,
    /// Stop once `quorum_minimum` votes are in.
    Quorum,
    /// Stop once `quorum_minimum` votes are in and no outstanding answers could change the outcome.
    #[default]
    Settled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusConfig {
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: Decimal,
    #[serde(default = "default_quorum_minimum")]
    pub quorum_minimum: usize,
    #[serde(default)]
    pub early_exit: EarlyExit,
    #[serde(default)]
    pub tie_policy: TiePolicy,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: default_consensus_threshold(),
            quorum_minimum: default_quorum_minimum(),
            early_exit: EarlyExit::default(),
            tie_policy: TiePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    /// How long a trade id is remembered for deduplication.
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_seconds: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_seconds: default_dedup_ttl(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SinkConfig {
    /// SQLite decision log path.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_data_api_url")]
    pub data_api_url: String,
    #[serde(default = "default_gamma_url")]
    pub gamma_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Trades requested per poll.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// How long resolved market contexts stay cached.
    #[serde(default = "default_market_cache_ttl")]
    pub market_cache_ttl_seconds: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            data_api_url: default_data_api_url(),
            gamma_url: default_gamma_url(),
            poll_interval_seconds: default_poll_interval(),
            page_limit: default_page_limit(),
            request_timeout_seconds: default_request_timeout(),
            market_cache_ttl_seconds: default_market_cache_ttl(),
        }
    }
}

fn default_whale_threshold() -> Decimal {
    Decimal::new(500, 0)
}
fn default_excluded_categories() -> Vec<String> {
    vec!["sports".to_string(), "crypto-prices".to_string()]
}
fn default_per_agent_timeout() -> u64 {
    30
}
fn default_overall_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    1
}
fn default_retry_backoff_ms() -> u64 {
    250
}
fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_roster() -> Vec<AgentSpec> {
    [
        "informed_flow",
        "contrarian",
        "base_rate",
        "news_catalyst",
        "liquidity",
        "skeptic",
    ]
    .into_iter()
    .map(AgentSpec::new)
    .collect()
}
fn default_consensus_threshold() -> Decimal {
    Decimal::new(66, 2)
}
fn default_quorum_minimum() -> usize {
    4
}
fn default_dedup_ttl() -> u64 {
    86_400
}
fn default_dedup_capacity() -> u64 {
    100_000
}
fn default_sqlite_path() -> String {
    "data/whalewatch_decisions.db".to_string()
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_retry_max_ms() -> u64 {
    30_000
}
fn default_data_api_url() -> String {
    "https://data-api.polymarket.com".to_string()
}
fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}
fn default_poll_interval() -> u64 {
    15
}
fn default_page_limit() -> u32 {
    100
}
fn default_request_timeout() -> u64 {
    10
}
fn default_market_cache_ttl() -> u64 {
    3600
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_document_uses_defaults() {
        let config = WhaleWatchConfig::from_toml_str("").unwrap();
        assert_eq!(config.mode, ExecutionMode::Paper);
        assert_eq!(config.filter.whale_threshold_usd, dec!(500));
        assert_eq!(config.consensus.consensus_threshold, dec!(0.66));
        assert_eq!(config.consensus.quorum_minimum, 4);
        assert_eq!(config.consensus.early_exit, EarlyExit::Settled);
        assert_eq!(config.consensus.tie_policy, TiePolicy::NoTrade);
        assert_eq!(config.agents.roster.len(), 6);
        assert_eq!(config.agents.max_retries, 1);
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
mode = "live"

[filter]
whale_threshold_usd = "1000"
excluded_categories = ["sports"]

[agents]
per_agent_timeout_seconds = 20
overall_timeout_seconds = 45

[[agents.roster]]
name = "informed_flow"

[[agents.roster]]
name = "gateway_skeptic"
persona = "skeptic"
endpoint = "http://localhost:8080/v1/opinion"
model = "claude-sonnet-4-5-20250929"

[[agents.roster]]
name = "disabled_one"
enabled = false

[consensus]
consensus_threshold = "0.75"
quorum_minimum = 2
early_exit = "quorum"
tie_policy = "confidence"

[[markets]]
market_id = "0xfed"
question = "Will the Fed cut rates in September?"
category = "economics"
"#;

        let config = WhaleWatchConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.mode, ExecutionMode::Live);
        assert_eq!(config.filter.whale_threshold_usd, dec!(1000));
        assert_eq!(config.agents.roster.len(), 3);
        assert_eq!(config.agents.enabled().len(), 2);
        assert_eq!(config.consensus.early_exit, EarlyExit::Quorum);
        assert_eq!(config.consensus.tie_policy, TiePolicy::Confidence);
        assert_eq!(config.markets[0].category, "economics");

        let gateway = &config.agents.roster[1];
        assert_eq!(gateway.persona(), "skeptic");
        assert_eq!(
            gateway.backend(),
            AgentBackend::Http {
                endpoint: "http://localhost:8080/v1/opinion"
            }
        );
        assert_eq!(config.agents.roster[0].backend(), AgentBackend::ClaudeCli);
        assert_eq!(config.agents.roster[0].persona(), "informed_flow");
    }

    #[test]
    fn rejects_empty_roster() {
        let toml_str = r#"
[agents]
roster = []
"#;
        assert_eq!(
            WhaleWatchConfig::from_toml_str(toml_str),
            Err(ConfigError::EmptyRoster)
        );
    }

    #[test]
    fn rejects_all_disabled_roster() {
        let mut config = WhaleWatchConfig::default();
        for spec in &mut config.agents.roster {
            spec.enabled = false;
        }
        assert_eq!(config.validate(), Err(ConfigError::EmptyRoster));
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let mut config = WhaleWatchConfig::default();
        config.consensus.consensus_threshold = dec!(1.2);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange(dec!(1.2)))
        );

        config.consensus.consensus_threshold = dec!(-0.1);
        assert!(config.validate().is_err());

        config.consensus.consensus_threshold = dec!(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_quorum_larger_than_roster() {
        let mut config = WhaleWatchConfig::default();
        config.consensus.quorum_minimum = 7;
        assert_eq!(
            config.validate(),
            Err(ConfigError::QuorumOutOfRange {
                quorum: 7,
                agents: 6
            })
        );

        config.consensus.quorum_minimum = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_agent_names() {
        let mut config = WhaleWatchConfig::default();
        config.agents.roster.push(AgentSpec::new("skeptic"));
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateAgent("skeptic".to_string()))
        );
    }

    #[test]
    fn rejects_zero_timeouts_and_excess_retries() {
        let mut config = WhaleWatchConfig::default();
        config.agents.overall_timeout_seconds = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue("agents.overall_timeout_seconds"))
        );

        let mut config = WhaleWatchConfig::default();
        config.agents.max_retries = 2;
        assert_eq!(config.validate(), Err(ConfigError::TooManyRetries(2)));
        config.agents.max_retries = 3;
        assert!(config.validate().is_err());
        config.agents.max_retries = 0;
        assert!(config.validate().is_ok());
        config.agents.max_retries = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_negative_whale_threshold() {
        let mut config = WhaleWatchConfig::default();
        config.filter.whale_threshold_usd = dec!(-1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeWhaleThreshold(_))
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let result = WhaleWatchConfig::from_toml_str("[consensus\nquorum_minimum = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn roundtrip_config() {
        let config = WhaleWatchConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = WhaleWatchConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }
}
