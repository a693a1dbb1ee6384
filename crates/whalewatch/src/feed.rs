use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use whalewatch_models::config::FeedConfig;
use whalewatch_models::signal::MarketContext;
use whalewatch_models::trade_event::RawTrade;
use whalewatch_store::TtlCache;

use crate::error::FeedError;

const MARKET_CACHE_CAPACITY: u64 = 10_000;

/// Source of raw trade records.
#[async_trait]
pub trait TradeFeed: Send + Sync {
    fn name(&self) -> &str;

    /// The most recent trades. May overlap with earlier calls; the ingestor
    /// drops repeats.
    async fn fetch(&self) -> Result<Vec<RawTrade>, FeedError>;
}

/// Resolves a market id to its question and category.
#[async_trait]
pub trait MarketDirectory: Send + Sync {
    async fn lookup(&self, market_id: &str) -> Result<Option<MarketContext>, FeedError>;
}

fn http_client(timeout: Duration) -> Result<Client, FeedError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

async fn get_json(http: &Client, url: &str, query: &[(&str, String)]) -> Result<Value, FeedError> {
    let response = http.get(url).query(query).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(url, status = %status, "Feed request failed");
        return Err(FeedError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

/// Public trades from the venue's data API: `GET {base}/trades?limit=N`.
pub struct DataApiFeed {
    base_url: String,
    limit: u32,
    http: Client,
}

impl DataApiFeed {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        Ok(Self {
            base_url: config.data_api_url.trim_end_matches('/').to_string(),
            limit: config.page_limit,
            http: http_client(Duration::from_secs(config.request_timeout_seconds))?,
        })
    }
}

#[async_trait]
impl TradeFeed for DataApiFeed {
    fn name(&self) -> &str {
        "data-api"
    }

    async fn fetch(&self) -> Result<Vec<RawTrade>, FeedError> {
        let url = format!("{}/trades", self.base_url);
        let body = get_json(&self.http, &url, &[("limit", self.limit.to_string())]).await?;
        let trades = parse_trade_page(body)?;
        debug!(count = trades.len(), "Fetched trades");
        Ok(trades)
    }
}

/// Decode a page of trades. Records that don't even deserialize are skipped;
/// field validation is the ingestor's job.
fn parse_trade_page(body: Value) -> Result<Vec<RawTrade>, FeedError> {
    let Value::Array(items) = body else {
        return Err(FeedError::Decode("expected a JSON array of trades".to_string()));
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawTrade>(item) {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable trade record");
                None
            }
        })
        .collect())
}

/// Replays a fixed list of trades on every fetch.
#[derive(Debug, Clone, Default)]
pub struct StaticFeed {
    trades: Vec<RawTrade>,
}

impl StaticFeed {
    pub fn new(trades: Vec<RawTrade>) -> Self {
        Self { trades }
    }

    /// Load trades from a JSON array (or a single JSON object).
    pub fn from_json(json: &str) -> Result<Self, FeedError> {
        let body: Value =
            serde_json::from_str(json).map_err(|e| FeedError::Decode(e.to_string()))?;
        let trades = match body {
            Value::Array(_) => parse_trade_page(body)?,
            single => vec![serde_json::from_value(single)
                .map_err(|e| FeedError::Decode(e.to_string()))?],
        };
        Ok(Self::new(trades))
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

#[async_trait]
impl TradeFeed for StaticFeed {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self) -> Result<Vec<RawTrade>, FeedError> {
        Ok(self.trades.clone())
    }
}

#[derive(Debug, Deserialize)]
struct GammaMarket {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

/// Market metadata from the venue's Gamma API, cached in memory.
pub struct GammaDirectory {
    base_url: String,
    http: Client,
    cache: TtlCache<String, MarketContext>,
}

impl GammaDirectory {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        Ok(Self {
            base_url: config.gamma_url.trim_end_matches('/').to_string(),
            http: http_client(Duration::from_secs(config.request_timeout_seconds))?,
            cache: TtlCache::new(
                MARKET_CACHE_CAPACITY,
                Duration::from_secs(config.market_cache_ttl_seconds),
            ),
        })
    }
}

fn context_from_gamma(market_id: &str, body: Value) -> Result<Option<MarketContext>, FeedError> {
    let markets: Vec<GammaMarket> =
        serde_json::from_value(body).map_err(|e| FeedError::Decode(e.to_string()))?;
    Ok(markets.into_iter().next().map(|m| {
        let category = m
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| MarketContext::UNCATEGORIZED.to_string());
        MarketContext::new(market_id, m.question.unwrap_or_default(), category)
    }))
}

#[async_trait]
impl MarketDirectory for GammaDirectory {
    async fn lookup(&self, market_id: &str) -> Result<Option<MarketContext>, FeedError> {
        let key = market_id.to_string();
        if let Some(context) = self.cache.get(&key).await {
            return Ok(Some(context));
        }

        let url = format!("{}/markets", self.base_url);
        let body = get_json(&self.http, &url, &[("condition_ids", key.clone())]).await?;
        let context = context_from_gamma(market_id, body)?;
        if let Some(context) = &context {
            self.cache.insert(key, context.clone()).await;
        }
        Ok(context)
    }
}

/// Serves market contexts listed in configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    markets: HashMap<String, MarketContext>,
}

impl StaticDirectory {
    pub fn new(markets: impl IntoIterator<Item = MarketContext>) -> Self {
        Self {
            markets: markets
                .into_iter()
                .map(|m| (m.market_id.clone(), m))
                .collect(),
        }
    }
}

#[async_trait]
impl MarketDirectory for StaticDirectory {
    async fn lookup(&self, market_id: &str) -> Result<Option<MarketContext>, FeedError> {
        Ok(self.markets.get(market_id).cloned())
    }
}
