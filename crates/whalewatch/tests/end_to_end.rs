//! Trade-in, decision-out scenarios through the full pipeline, with scripted
//! agents standing in for the model panel and an in-memory decision sink.
//!
//! Run with:
//! ```bash
//! cargo test -p whalewatch --test end_to_end
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use serde_json::json;
use whalewatch::agents::test_support::{panel_of, ScriptedAgent};
use whalewatch::agents::{AgentPanel, PanelAgent, PanelSettings};
use whalewatch::models::agent_message::{AgentOutcome, FailureReason, Stance};
use whalewatch::models::config::{EarlyExit, WhaleWatchConfig};
use whalewatch::models::decision::{Decision, DecisionOutcome};
use whalewatch::models::signal::{signal_id_for, MarketContext, SignalState};
use whalewatch::models::trade_event::RawTrade;
use whalewatch::store::{AppendOutcome, DecisionSink, MemorySink, StoreError};
use whalewatch::{Pipeline, PipelineError, StaticDirectory, Submission};

use Stance::{Buy, Sell};

fn config(early_exit: EarlyExit) -> WhaleWatchConfig {
    let mut config = WhaleWatchConfig::default();
    config.consensus.early_exit = early_exit;
    config
}

fn markets() -> Vec<MarketContext> {
    vec![
        MarketContext::new("0xpolitics", "Will the measure pass by June?", "politics"),
        MarketContext::new("0xsports", "Will the home side win?", "sports"),
    ]
}

fn pipeline(
    config: &WhaleWatchConfig,
    agents: Vec<Arc<dyn PanelAgent>>,
    sink: Arc<dyn DecisionSink>,
) -> Pipeline {
    let panel = AgentPanel::new(agents, PanelSettings::from_config(&config.agents));
    Pipeline::new(
        config,
        panel,
        vec![Arc::new(StaticDirectory::new(markets()))],
        sink,
    )
}

fn raw_trade(id: &str, market: &str, size: serde_json::Value) -> RawTrade {
    serde_json::from_value(json!({
        "transactionHash": id,
        "conditionId": market,
        "proxyWallet": "0xwhale",
        "side": "BUY",
        "outcome": "Yes",
        "size": size,
        "price": 0.55,
        "timestamp": 1718000000
    }))
    .unwrap()
}

async fn decide(pipeline: &Pipeline, raw: &RawTrade) -> Decision {
    match pipeline.submit(raw).await.unwrap() {
        Submission::Signal { handle, .. } => handle.await.unwrap().expect("a decision"),
        other => panic!("expected a signal, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn trade_at_threshold_becomes_a_signal() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Settled), panel_of(&[Buy; 6]), sink.clone());

    let raw = raw_trade("0xat", "0xpolitics", json!(500));
    let submission = pipeline.submit(&raw).await.unwrap();
    let Submission::Signal { signal_id, handle } = submission else {
        panic!("expected a signal, got {submission:?}");
    };
    assert_eq!(signal_id, signal_id_for("0xat"));

    let decision = handle.await.unwrap().unwrap();
    assert_eq!(decision.trade_id, "0xat");
    assert_eq!(decision.market_id, "0xpolitics");
    pipeline.shutdown().await;

    assert_eq!(sink.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn trade_below_threshold_is_filtered() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Settled), panel_of(&[Buy; 6]), sink.clone());

    let submission = pipeline
        .submit(&raw_trade("0xsmall", "0xpolitics", json!("499.99")))
        .await
        .unwrap();
    assert!(matches!(submission, Submission::Filtered));
    assert_eq!(pipeline.in_flight(), 0);
    pipeline.shutdown().await;

    assert!(sink.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn excluded_category_is_filtered() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Settled), panel_of(&[Buy; 6]), sink.clone());

    let submission = pipeline
        .submit(&raw_trade("0xgame", "0xsports", json!(25_000)))
        .await
        .unwrap();
    assert!(matches!(submission, Submission::Filtered));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn five_buys_and_one_timeout_reach_consensus() {
    let mut agents = panel_of(&[Buy; 5]);
    agents.push(Arc::new(ScriptedAgent::hanging("agent_5")));
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Off), agents, sink.clone());

    let decision = decide(&pipeline, &raw_trade("0xfive", "0xpolitics", json!(5000))).await;
    assert_eq!(decision.state, SignalState::ConsensusReached);
    assert_eq!(decision.outcome, DecisionOutcome::Buy);
    assert_eq!(decision.agreement_ratio, dec!(1));
    assert_eq!(decision.votes_considered, 5);
    assert_eq!(decision.votes_expected, 6);
    assert!(matches!(
        &decision.agent_outcomes[5],
        AgentOutcome::Failed { agent_name, reason: FailureReason::Timeout } if agent_name == "agent_5"
    ));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn settled_panel_does_not_wait_for_the_straggler() {
    let mut agents = panel_of(&[Buy; 5]);
    agents.push(Arc::new(ScriptedAgent::hanging("agent_5")));
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Settled), agents, sink.clone());

    let started = tokio::time::Instant::now();
    let decision = decide(&pipeline, &raw_trade("0xquick", "0xpolitics", json!(5000))).await;
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(decision.outcome, DecisionOutcome::Buy);
    assert_eq!(decision.agreement_ratio, dec!(1));
    assert!(matches!(
        &decision.agent_outcomes[5],
        AgentOutcome::Failed { reason: FailureReason::Cancelled, .. }
    ));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn all_agents_timing_out_still_records_one_decision() {
    let agents: Vec<Arc<dyn PanelAgent>> = (0..6)
        .map(|i| Arc::new(ScriptedAgent::hanging(&format!("agent_{i}"))) as Arc<dyn PanelAgent>)
        .collect();
    let sink = Arc::new(MemorySink::new());
    let config = config(EarlyExit::Settled);
    let pipeline = pipeline(&config, agents, sink.clone());

    let started = tokio::time::Instant::now();
    let decision = decide(&pipeline, &raw_trade("0xsilent", "0xpolitics", json!(5000))).await;
    let bound = Duration::from_secs(config.agents.overall_timeout_seconds) + Duration::from_secs(1);
    assert!(started.elapsed() <= bound);

    assert_eq!(decision.state, SignalState::TimedOut);
    assert_eq!(decision.outcome, DecisionOutcome::NoTrade);
    assert_eq!(decision.votes_considered, 0);
    assert!(decision
        .agent_outcomes
        .iter()
        .all(|o| matches!(o, AgentOutcome::Failed { reason: FailureReason::Timeout, .. })));
    pipeline.shutdown().await;

    assert_eq!(sink.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn four_of_six_is_enough_for_consensus() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(
        &config(EarlyExit::Off),
        panel_of(&[Buy, Buy, Sell, Buy, Sell, Buy]),
        sink.clone(),
    );

    let decision = decide(&pipeline, &raw_trade("0xfour", "0xpolitics", json!(5000))).await;
    assert_eq!(decision.state, SignalState::ConsensusReached);
    assert_eq!(decision.outcome, DecisionOutcome::Buy);
    assert_eq!(decision.agreement_ratio, dec!(0.6667));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn even_split_is_no_trade() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(
        &config(EarlyExit::Settled),
        panel_of(&[Buy, Sell, Buy, Sell, Buy, Sell]),
        sink.clone(),
    );

    let decision = decide(&pipeline, &raw_trade("0xsplit", "0xpolitics", json!(5000))).await;
    assert_eq!(decision.state, SignalState::NoConsensus);
    assert_eq!(decision.outcome, DecisionOutcome::NoTrade);
    assert_eq!(decision.agreement_ratio, dec!(0.5));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_trade_yields_one_signal() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Settled), panel_of(&[Buy; 6]), sink.clone());
    let raw = raw_trade("0xtwice", "0xpolitics", json!(5000));

    let first = pipeline.submit(&raw).await.unwrap();
    let second = pipeline.submit(&raw).await.unwrap();
    assert!(matches!(first, Submission::Signal { .. }));
    assert!(matches!(second, Submission::Duplicate));
    pipeline.shutdown().await;

    assert_eq!(sink.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_trade_is_rejected_without_a_signal() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Settled), panel_of(&[Buy; 6]), sink.clone());
    let mut raw = raw_trade("0xbad", "0xpolitics", json!(5000));
    raw.price = Some(json!(0));

    let result = pipeline.submit(&raw).await;
    assert!(matches!(result, Err(PipelineError::Ingest(_))));

    // A corrected record under the same id is still accepted.
    raw.price = Some(json!(0.4));
    assert!(matches!(
        pipeline.submit(&raw).await.unwrap(),
        Submission::Signal { .. }
    ));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn a_decided_signal_is_never_decided_again() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Settled), panel_of(&[Buy; 6]), sink.clone());

    let decision = decide(&pipeline, &raw_trade("0xonce", "0xpolitics", json!(5000))).await;
    assert_eq!(decision.outcome, DecisionOutcome::Buy);

    let replay = whalewatch::agents::test_support::sample_signal("0xonce");
    assert_eq!(replay.signal_id, decision.signal_id);
    assert!(pipeline.evaluate_signal(replay).await.unwrap().is_none());
    pipeline.shutdown().await;

    assert_eq!(sink.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_signals_are_decided_independently() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Off), panel_of(&[Buy; 6]), sink.clone());

    let mut handles = Vec::new();
    for i in 0..20 {
        let raw = raw_trade(&format!("0xburst{i}"), "0xpolitics", json!(1000 + i));
        match pipeline.submit(&raw).await.unwrap() {
            Submission::Signal { handle, .. } => handles.push(handle),
            other => panic!("expected a signal, got {other:?}"),
        }
    }
    for handle in handles {
        let decision = handle.await.unwrap().unwrap();
        assert_eq!(decision.votes_considered, 6);
    }
    pipeline.shutdown().await;

    assert_eq!(sink.len().await, 20);
}

#[tokio::test(start_paused = true)]
async fn settled_panel_stops_once_the_outcome_is_locked() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Settled), panel_of(&[Buy; 6]), sink.clone());

    let decision = decide(&pipeline, &raw_trade("0xlocked", "0xpolitics", json!(5000))).await;
    assert_eq!(decision.state, SignalState::ConsensusReached);
    assert_eq!(decision.outcome, DecisionOutcome::Buy);
    assert_eq!(decision.votes_considered, 4);
    let cancelled = decision
        .agent_outcomes
        .iter()
        .filter(|o| matches!(o, AgentOutcome::Failed { reason: FailureReason::Cancelled, .. }))
        .count();
    assert_eq!(cancelled, 2);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn submit_after_shutdown_is_refused() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&config(EarlyExit::Settled), panel_of(&[Buy; 6]), sink);
    pipeline.shutdown().await;

    let result = pipeline
        .submit(&raw_trade("0xlate", "0xpolitics", json!(5000)))
        .await;
    assert!(matches!(result, Err(PipelineError::ShuttingDown)));
}

/// Refuses the first append, then stores normally.
struct FailsOnce {
    attempts: AtomicU32,
    inner: MemorySink,
}

#[async_trait]
impl DecisionSink for FailsOnce {
    fn name(&self) -> &str {
        "fails-once"
    }

    async fn append(&self, decision: &Decision) -> Result<AppendOutcome, StoreError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StoreError::Unavailable("sink offline".to_string()));
        }
        self.inner.append(decision).await
    }
}

#[tokio::test(start_paused = true)]
async fn unavailable_sink_is_retried_into_exactly_one_record() {
    let sink = Arc::new(FailsOnce {
        attempts: AtomicU32::new(0),
        inner: MemorySink::new(),
    });
    let pipeline = pipeline(&config(EarlyExit::Settled), panel_of(&[Buy; 6]), sink.clone());

    let decision = decide(&pipeline, &raw_trade("0xretry", "0xpolitics", json!(5000))).await;
    pipeline.shutdown().await;

    assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    let written = sink.inner.decisions().await;
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].signal_id, decision.signal_id);
}
