use whalewatch_models::agent_message::AgentQuery;

/// Personas with a built-in system prompt.
pub const PERSONAS: [&str; 6] = [
    "informed_flow",
    "contrarian",
    "base_rate",
    "news_catalyst",
    "liquidity",
    "skeptic",
];

fn response_schema() -> String {
    let example = serde_json::json!({
        "stance": "BUY | SELL | ABSTAIN",
        "confidence": 0.65,
        "rationale": "<two or three sentences>"
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

fn persona_brief(persona: &str) -> Option<&'static str> {
    let brief = match persona {
        "informed_flow" => {
            "You judge whether a large trade looks like informed flow. Size relative \
             to the market, a decisive price level and a wallet committing heavily on one \
             outcome all point to information. Favor following the whale when the trade \
             looks deliberate."
        }
        "contrarian" => {
            "You look for reasons the crowd, and this whale, are wrong. Large late \
             trades at extreme prices often chase a move that is already priced in. Favor \
             SELL or ABSTAIN unless the trade is clearly early."
        }
        "base_rate" => {
            "You reason from base rates. Ask how often questions of this kind resolve \
             the way the whale is betting, and whether the price already reflects that. \
             Ignore the trade's size except as weak evidence."
        }
        "news_catalyst" => {
            "You consider whether a scheduled or likely news catalyst explains the \
             trade. A whale positioning ahead of an identifiable event deserves more \
             weight than one trading into a quiet market."
        }
        "liquidity" => {
            "You assess execution. Copying a whale only makes sense if the price left \
             after their fill still offers edge. Prices above 0.90 or below 0.10 leave \
             little room; ABSTAIN when the remaining edge is thin."
        }
        "skeptic" => {
            "You are the panel's skeptic. Assume the whale may be hedging, \
             market-making or simply wrong. Only vote BUY or SELL when the case is \
             strong enough to survive that doubt."
        }
        _ => return None,
    };
    Some(brief)
}

/// System prompt for a panel persona, or `None` when the persona is unknown.
pub fn system_prompt(persona: &str) -> Option<String> {
    let brief = persona_brief(persona)?;
    Some(format!(
        "You are the `{persona}` member of a panel that reviews large trades on a \
         prediction market and decides whether to copy them.\n\n\
         {brief}\n\n\
         BUY means copy the whale's position (same outcome, same side). SELL means \
         take the opposite side. ABSTAIN means do not trade.\n\n\
         Respond with ONLY a JSON object in this shape:\n{schema}\n\n\
         `confidence` is a number between 0.0 and 1.0.",
        schema = response_schema(),
    ))
}

/// User prompt carrying the trade under review.
pub fn user_prompt(query: &AgentQuery) -> Result<String, serde_json::Error> {
    let trade = serde_json::json!({
        "market_question": query.market_question,
        "category": query.category,
        "outcome": query.outcome,
        "side": query.trade_side,
        "size_usd": query.trade_size,
        "price": query.price,
        "wallet": query.wallet,
    });
    Ok(format!(
        "Review this trade:\n{}",
        serde_json::to_string_pretty(&trade)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use whalewatch_models::signal::{MarketContext, Signal};
    use whalewatch_models::trade_event::{TradeEvent, TradeSide};

    #[test]
    fn every_persona_has_a_prompt() {
        for persona in PERSONAS {
            let prompt = system_prompt(persona).unwrap();
            assert!(prompt.contains(persona));
            assert!(prompt.contains("\"stance\""));
            assert!(prompt.contains("ABSTAIN"));
        }
    }

    #[test]
    fn unknown_persona() {
        assert!(system_prompt("astrologer").is_none());
    }

    #[test]
    fn user_prompt_carries_trade() {
        let trade = TradeEvent {
            trade_id: "0xt".to_string(),
            market_id: "0xm".to_string(),
            wallet: "0xwhale".to_string(),
            side: TradeSide::Buy,
            outcome: "Yes".to_string(),
            size_usd: dec!(2500),
            price: dec!(0.42),
            timestamp: Utc::now(),
        };
        let signal = Signal::from_trade(
            trade,
            &MarketContext::new("0xm", "Will the bill pass?", "politics"),
        );
        let query = AgentQuery::for_signal(&signal, "skeptic");

        let prompt = user_prompt(&query).unwrap();
        assert!(prompt.contains("Will the bill pass?"));
        assert!(prompt.contains("0xwhale"));
        assert!(prompt.contains("\"BUY\""));
        assert!(prompt.contains("2500"));
    }
}
