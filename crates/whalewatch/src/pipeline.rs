use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use whalewatch_agents::AgentPanel;
use whalewatch_models::config::WhaleWatchConfig;
use whalewatch_models::decision::Decision;
use whalewatch_models::signal::{MarketContext, Signal};
use whalewatch_models::trade_event::{RawTrade, TradeEvent};
use whalewatch_store::DecisionSink;

use crate::consensus::{ConsensusEngine, ConsensusRule};
use crate::error::PipelineError;
use crate::feed::MarketDirectory;
use crate::filter::WhaleFilter;
use crate::ingestor::Ingestor;
use crate::sink::{RetryPolicy, SinkWriter};

/// How long shutdown waits for the sink to drain.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// What happened to a submitted trade.
#[derive(Debug)]
pub enum Submission {
    /// The trade became a signal. The handle resolves to its decision once
    /// the panel has voted (or `None` if evaluation failed).
    Signal {
        signal_id: Uuid,
        handle: JoinHandle<Option<Decision>>,
    },
    /// The trade was already ingested.
    Duplicate,
    /// Not a whale trade, or in an excluded category.
    Filtered,
}

/// The part of the pipeline shared with in-flight signal tasks.
struct Evaluator {
    panel: AgentPanel,
    engine: ConsensusEngine,
    writer: SinkWriter,
}

impl Evaluator {
    async fn evaluate(&self, mut signal: Signal) -> Result<Option<Decision>, PipelineError> {
        self.engine.begin_polling(&mut signal)?;

        let mut book = self.panel.new_book(&signal);
        let engine = &self.engine;
        let report = self
            .panel
            .poll_until(&signal, &mut book, |b| engine.should_stop(b))
            .await;
        debug!(
            signal_id = %signal.signal_id,
            stopped_early = report.stopped_early,
            timed_out = report.timed_out,
            "Poll report"
        );

        let decision = self.engine.finalize(&mut signal, &mut book)?;
        if let Some(decision) = &decision {
            self.writer.submit(decision.clone())?;
        }
        Ok(decision)
    }
}

/// Trade in, decision out: ingest, filter, poll the panel, resolve, write.
///
/// Each signal is evaluated on its own task, so a slow panel never holds up
/// ingestion of the next trade.
pub struct Pipeline {
    ingestor: Ingestor,
    filter: WhaleFilter,
    directories: Vec<Arc<dyn MarketDirectory>>,
    evaluator: Arc<Evaluator>,
    tracker: TaskTracker,
    closing: AtomicBool,
    shutdown_grace: Duration,
}

impl Pipeline {
    /// Wire a pipeline. Spawns the sink writer, so call inside a tokio runtime.
    ///
    /// `directories` are consulted in order for market context; the first hit wins.
    pub fn new(
        config: &WhaleWatchConfig,
        panel: AgentPanel,
        directories: Vec<Arc<dyn MarketDirectory>>,
        sink: Arc<dyn DecisionSink>,
    ) -> Self {
        let writer = SinkWriter::spawn(sink, RetryPolicy::from_config(&config.sink));
        let engine =
            ConsensusEngine::new(ConsensusRule::from_config(&config.consensus), config.mode);
        Self {
            ingestor: Ingestor::new(&config.ingest),
            filter: WhaleFilter::new(&config.filter),
            directories,
            evaluator: Arc::new(Evaluator {
                panel,
                engine,
                writer,
            }),
            tracker: TaskTracker::new(),
            closing: AtomicBool::new(false),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Ingest one raw trade. A qualifying trade is handed to the panel on a
    /// new task and this returns immediately.
    pub async fn submit(&self, raw: &RawTrade) -> Result<Submission, PipelineError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(PipelineError::ShuttingDown);
        }

        let Some(trade) = self.ingestor.ingest(raw)? else {
            return Ok(Submission::Duplicate);
        };

        if trade.size_usd < self.filter.threshold() {
            debug!(trade_id = %trade.trade_id, size_usd = %trade.size_usd, "Below whale threshold");
            return Ok(Submission::Filtered);
        }

        let context = self.market_context(&trade, raw.title.as_deref()).await;
        let Some(signal) = self.filter.evaluate(trade, &context)? else {
            return Ok(Submission::Filtered);
        };

        let signal_id = signal.signal_id;
        info!(
            signal_id = %signal_id,
            trade_id = %signal.trade_event.trade_id,
            size_usd = %signal.trade_event.size_usd,
            side = %signal.trade_event.side,
            category = %signal.category,
            "Whale signal detected"
        );

        let evaluator = Arc::clone(&self.evaluator);
        let handle = self.tracker.spawn(async move {
            match evaluator.evaluate(signal).await {
                Ok(decision) => decision,
                Err(e) => {
                    error!(signal_id = %signal_id, error = %e, "Signal evaluation failed");
                    None
                }
            }
        });

        Ok(Submission::Signal { signal_id, handle })
    }

    /// Run a signal through the panel and consensus engine on the current task.
    pub async fn evaluate_signal(
        &self,
        signal: Signal,
    ) -> Result<Option<Decision>, PipelineError> {
        self.evaluator.evaluate(signal).await
    }

    async fn market_context(&self, trade: &TradeEvent, title: Option<&str>) -> MarketContext {
        for directory in &self.directories {
            match directory.lookup(&trade.market_id).await {
                Ok(Some(context)) => return context,
                Ok(None) => {}
                Err(e) => {
                    warn!(market_id = %trade.market_id, error = %e, "Market lookup failed")
                }
            }
        }
        debug!(market_id = %trade.market_id, "No market context, using trade title");
        MarketContext::new(
            trade.market_id.clone(),
            title.unwrap_or(trade.market_id.as_str()),
            MarketContext::UNCATEGORIZED,
        )
    }

    /// Stop accepting trades, wait for in-flight signals to be decided, then
    /// drain the sink.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.tracker.close();
        info!(in_flight = self.tracker.len(), "Waiting for in-flight signals");
        self.tracker.wait().await;
        self.evaluator.writer.shutdown(self.shutdown_grace).await;
    }
}
