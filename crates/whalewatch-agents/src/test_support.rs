//! Scripted panel agents and fixtures for exercising the panel and the
//! pipeline without a model behind them.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use whalewatch_models::agent_message::{AgentQuery, AgentResponse, Stance};
use whalewatch_models::signal::{MarketContext, Signal};
use whalewatch_models::trade_event::{TradeEvent, TradeSide};

use crate::agent::PanelAgent;
use crate::error::AgentError;
use crate::parser::parse_agent_response;

/// What a [`ScriptedAgent`] does when queried.
#[derive(Debug, Clone)]
pub enum Script {
    /// Answer immediately with this opinion.
    Vote { stance: Stance, confidence: Decimal },
    /// Answer with raw model text, run through the real response parser.
    Reply(String),
    /// Never answer.
    Hang,
    /// Wait, then follow the inner script.
    Delay(Duration, Box<Script>),
    /// Fail with a transient error on the first `times` calls, then follow `then`.
    FailTransient { times: u32, then: Box<Script> },
    /// Fail with a non-retryable gateway rejection.
    Reject(String),
    Panic,
}

impl Script {
    pub fn vote(stance: Stance, confidence: Decimal) -> Self {
        Script::Vote { stance, confidence }
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Script::Delay(delay, Box::new(self))
    }
}

/// A panel agent that follows a fixed [`Script`] and counts its calls.
pub struct ScriptedAgent {
    name: String,
    script: Script,
    calls: Arc<AtomicU32>,
}

impl ScriptedAgent {
    pub fn new(name: &str, script: Script) -> Self {
        Self {
            name: name.to_string(),
            script,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn voting(name: &str, stance: Stance, confidence: Decimal) -> Self {
        Self::new(name, Script::vote(stance, confidence))
    }

    pub fn hanging(name: &str) -> Self {
        Self::new(name, Script::Hang)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PanelAgent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, _query: &AgentQuery) -> Result<AgentResponse, AgentError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = &self.script;
        loop {
            match script {
                Script::Vote { stance, confidence } => {
                    return Ok(AgentResponse {
                        stance: *stance,
                        confidence: *confidence,
                        rationale: format!("{} says {stance}", self.name),
                    })
                }
                Script::Reply(text) => return parse_agent_response(text),
                Script::Hang => return std::future::pending().await,
                Script::Delay(delay, next) => {
                    tokio::time::sleep(*delay).await;
                    script = &**next;
                }
                Script::FailTransient { times, then } => {
                    if attempt < *times {
                        return Err(AgentError::Connection(format!(
                            "scripted failure {} of {times}",
                            attempt + 1
                        )));
                    }
                    script = &**then;
                }
                Script::Reject(detail) => {
                    return Err(AgentError::Status {
                        status: 400,
                        body: detail.clone(),
                    })
                }
                Script::Panic => panic!("scripted agent {} panicked", self.name),
            }
        }
    }
}

/// One scripted agent per stance, named `agent_0`, `agent_1`, ..., all at confidence 0.7.
pub fn panel_of(stances: &[Stance]) -> Vec<Arc<dyn PanelAgent>> {
    stances
        .iter()
        .enumerate()
        .map(|(i, stance)| {
            Arc::new(ScriptedAgent::voting(&format!("agent_{i}"), *stance, dec!(0.7)))
                as Arc<dyn PanelAgent>
        })
        .collect()
}

pub fn sample_trade(trade_id: &str) -> TradeEvent {
    TradeEvent {
        trade_id: trade_id.to_string(),
        market_id: "0xmarket".to_string(),
        wallet: "0xwhale".to_string(),
        side: TradeSide::Buy,
        outcome: "Yes".to_string(),
        size_usd: dec!(5000),
        price: dec!(0.55),
        timestamp: Utc::now(),
    }
}

pub fn sample_signal(trade_id: &str) -> Signal {
    Signal::from_trade(
        sample_trade(trade_id),
        &MarketContext::new("0xmarket", "Will the measure pass by June?", "politics"),
    )
}

pub fn sample_query(agent_name: &str) -> AgentQuery {
    AgentQuery::for_signal(&sample_signal("0xsample"), agent_name)
}
