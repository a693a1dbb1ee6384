use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A normalized trade observed on the venue. Never mutated after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeEvent {
    /// Idempotency key for deduplication.
    pub trade_id: String,
    pub market_id: String,
    pub wallet: String,
    pub side: TradeSide,
    /// Outcome token traded (e.g., "Yes" / "No").
    pub outcome: String,
    pub size_usd: Decimal,
    /// Execution price, a probability in (0, 1].
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A trade record as delivered by the market-data feed, before validation.
///
/// Accepts both the public data API spelling (`transactionHash`, `conditionId`,
/// `proxyWallet`) and the CLOB spelling (`id`, `market`, `makerAddress`).
/// Decimal fields may arrive as JSON numbers or strings, and timestamps as
/// unix seconds, unix milliseconds or RFC 3339 strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawTrade {
    pub id: Option<String>,
    #[serde(alias = "transactionHash")]
    pub transaction_hash: Option<String>,
    #[serde(alias = "market_id")]
    pub market: Option<String>,
    #[serde(alias = "conditionId")]
    pub condition_id: Option<String>,
    #[serde(alias = "proxyWallet")]
    pub proxy_wallet: Option<String>,
    #[serde(alias = "makerAddress")]
    pub maker_address: Option<String>,
    #[serde(alias = "takerAddress")]
    pub taker_address: Option<String>,
    pub side: Option<String>,
    pub outcome: Option<String>,
    pub size: Option<serde_json::Value>,
    pub price: Option<serde_json::Value>,
    pub timestamp: Option<serde_json::Value>,
    /// Market question, when the feed inlines it.
    pub title: Option<String>,
}
