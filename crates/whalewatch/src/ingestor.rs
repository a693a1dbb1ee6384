use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};
use whalewatch_models::config::IngestConfig;
use whalewatch_models::trade_event::{RawTrade, TradeEvent, TradeSide};
use whalewatch_store::SeenSet;

use crate::error::IngestError;

/// Unix timestamps above this are milliseconds.
const MILLIS_CUTOFF: i64 = 1_000_000_000_000;

/// Normalizes raw feed records and drops trades that were already seen.
pub struct Ingestor {
    seen: SeenSet,
}

impl Ingestor {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            seen: SeenSet::new(
                config.dedup_capacity,
                Duration::from_secs(config.dedup_ttl_seconds),
            ),
        }
    }

    /// Validate a raw record into a `TradeEvent`.
    pub fn normalize(raw: &RawTrade) -> Result<TradeEvent, IngestError> {
        let trade_id = first_present(&[&raw.id, &raw.transaction_hash])
            .ok_or_else(|| malformed("missing trade id"))?;
        let market_id = first_present(&[&raw.market, &raw.condition_id])
            .ok_or_else(|| malformed(format!("trade {trade_id}: missing market id")))?;
        let wallet = first_present(&[&raw.proxy_wallet, &raw.maker_address, &raw.taker_address])
            .ok_or_else(|| malformed(format!("trade {trade_id}: missing wallet")))?;

        let side = match raw.side.as_deref().map(|s| s.trim().to_ascii_uppercase()) {
            Some(s) if s == "BUY" => TradeSide::Buy,
            Some(s) if s == "SELL" => TradeSide::Sell,
            Some(other) => {
                return Err(malformed(format!("trade {trade_id}: unknown side {other:?}")))
            }
            None => return Err(malformed(format!("trade {trade_id}: missing side"))),
        };

        let price = decimal_field(raw.price.as_ref())
            .map_err(|e| malformed(format!("trade {trade_id}: price {e}")))?;
        if price <= Decimal::ZERO || price > Decimal::ONE {
            return Err(malformed(format!(
                "trade {trade_id}: price {price} outside (0, 1]"
            )));
        }

        let size_usd = decimal_field(raw.size.as_ref())
            .map_err(|e| malformed(format!("trade {trade_id}: size {e}")))?;
        if size_usd < Decimal::ZERO {
            return Err(malformed(format!("trade {trade_id}: negative size {size_usd}")));
        }

        let timestamp = match raw.timestamp.as_ref() {
            Some(value) => parse_timestamp(value)
                .ok_or_else(|| malformed(format!("trade {trade_id}: bad timestamp {value}")))?,
            None => Utc::now(),
        };

        Ok(TradeEvent {
            trade_id,
            market_id,
            wallet,
            side,
            outcome: raw.outcome.clone().unwrap_or_default(),
            size_usd,
            price,
            timestamp,
        })
    }

    /// Admit a trade the first time its id is seen. Repeats return `None`.
    pub fn admit(&self, trade: TradeEvent) -> Option<TradeEvent> {
        if self.seen.first_sighting(&trade.trade_id) {
            Some(trade)
        } else {
            debug!(trade_id = %trade.trade_id, "Duplicate trade ignored");
            None
        }
    }

    /// Normalize and admit a raw record.
    ///
    /// `Ok(None)` means the trade was already ingested. Malformed records are
    /// logged and returned as errors; they are not remembered, so a corrected
    /// record with the same id is still accepted.
    pub fn ingest(&self, raw: &RawTrade) -> Result<Option<TradeEvent>, IngestError> {
        let trade = Self::normalize(raw).inspect_err(|e| warn!(error = %e, "Rejected trade"))?;
        Ok(self.admit(trade))
    }

    /// Forget a trade id so it can be ingested again.
    pub fn forget(&self, trade_id: &str) {
        self.seen.forget(trade_id);
    }
}

fn malformed(detail: impl Into<String>) -> IngestError {
    IngestError::MalformedInput(detail.into())
}

fn first_present(fields: &[&Option<String>]) -> Option<String> {
    fields
        .iter()
        .filter_map(|f| f.as_deref())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn decimal_field(value: Option<&Value>) -> Result<Decimal, String> {
    let text = match value {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(other) => return Err(format!("is not a number: {other}")),
        None => return Err("is missing".to_string()),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| format!("{text:?} is not a decimal: {e}"))
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let from_unix = |ts: i64| {
        if ts > MILLIS_CUTOFF {
            Utc.timestamp_millis_opt(ts).single()
        } else {
            Utc.timestamp_opt(ts, 0).single()
        }
    };

    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_unix),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(ts) => from_unix(ts),
                Err(_) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc)),
            }
        }
        _ => None,
    }
}
