use rust_decimal::Decimal;
use tracing::debug;
use whalewatch_models::config::FilterConfig;
use whalewatch_models::signal::{MarketContext, Signal};
use whalewatch_models::trade_event::TradeEvent;

use crate::error::IngestError;

/// Decides which trades are whale trades worth a panel vote.
#[derive(Debug, Clone)]
pub struct WhaleFilter {
    threshold: Decimal,
    excluded_categories: Vec<String>,
}

impl WhaleFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            threshold: config.whale_threshold_usd,
            excluded_categories: config
                .excluded_categories
                .iter()
                .map(|c| normalize_category(c))
                .collect(),
        }
    }

    pub fn threshold(&self) -> Decimal {
        self.threshold
    }

    pub fn is_excluded(&self, category: &str) -> bool {
        let category = normalize_category(category);
        self.excluded_categories.iter().any(|c| *c == category)
    }

    /// Turn a qualifying trade into a `Detected` signal.
    ///
    /// Qualifies when `size_usd >= threshold` and the market's category is not
    /// excluded. A zero price is malformed rather than merely unqualified.
    pub fn evaluate(
        &self,
        trade: TradeEvent,
        context: &MarketContext,
    ) -> Result<Option<Signal>, IngestError> {
        if trade.price <= Decimal::ZERO {
            return Err(IngestError::MalformedInput(format!(
                "trade {}: price {} is not positive",
                trade.trade_id, trade.price
            )));
        }

        if trade.size_usd < self.threshold {
            debug!(trade_id = %trade.trade_id, size_usd = %trade.size_usd, "Below whale threshold");
            return Ok(None);
        }

        if self.is_excluded(&context.category) {
            debug!(trade_id = %trade.trade_id, category = %context.category, "Excluded category");
            return Ok(None);
        }

        Ok(Some(Signal::from_trade(trade, context)))
    }
}

fn normalize_category(category: &str) -> String {
    category.trim().to_lowercase()
}
