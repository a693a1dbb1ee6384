use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use whalewatch_models::config::SinkConfig;
use whalewatch_models::decision::Decision;
use whalewatch_store::{AppendOutcome, DecisionSink};

use crate::error::PipelineError;

/// Exponential backoff between sink append attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            base: Duration::from_millis(config.retry_base_ms),
            max: Duration::from_millis(config.retry_max_ms),
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped at `max`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Hands decisions to a [`DecisionSink`] without ever blocking the caller.
///
/// Decisions are queued and appended in order by a background worker, which
/// retries each one with exponential backoff until the sink accepts it. The
/// sink's idempotency on `signal_id` makes a retry after an ambiguous failure
/// safe.
pub struct SinkWriter {
    tx: Mutex<Option<mpsc::UnboundedSender<Decision>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    abandon: CancellationToken,
}

impl SinkWriter {
    /// Start the background worker. Must be called inside a tokio runtime.
    pub fn spawn(sink: Arc<dyn DecisionSink>, policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let abandon = CancellationToken::new();
        let worker = tokio::spawn(write_loop(sink, policy, rx, abandon.clone()));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            abandon,
        }
    }

    /// Queue a decision for writing.
    pub fn submit(&self, decision: Decision) -> Result<(), PipelineError> {
        let guard = self.tx.lock().map_err(|_| PipelineError::ShuttingDown)?;
        let tx = guard.as_ref().ok_or(PipelineError::ShuttingDown)?;
        tx.send(decision).map_err(|_| PipelineError::ShuttingDown)
    }

    /// Stop accepting decisions and wait for the queue to drain.
    ///
    /// If the sink is still failing after `grace`, the remaining decisions are
    /// logged and abandoned.
    pub async fn shutdown(&self, grace: Duration) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }

        let Some(mut worker) = self.worker.lock().await.take() else {
            return;
        };
        if tokio::time::timeout(grace, &mut worker).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "Sink did not drain in time, abandoning queue");
            self.abandon.cancel();
            let _ = worker.await;
        }
        info!("Sink writer stopped");
    }
}

async fn write_loop(
    sink: Arc<dyn DecisionSink>,
    policy: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<Decision>,
    abandon: CancellationToken,
) {
    while let Some(decision) = rx.recv().await {
        if !write_with_retry(sink.as_ref(), &decision, policy, &abandon).await {
            error!(signal_id = %decision.signal_id, "Decision not written");
            while let Ok(dropped) = rx.try_recv() {
                error!(signal_id = %dropped.signal_id, "Decision not written");
            }
            return;
        }
    }
}

/// Returns `false` only when abandoned before the sink accepted the decision.
async fn write_with_retry(
    sink: &dyn DecisionSink,
    decision: &Decision,
    policy: RetryPolicy,
    abandon: &CancellationToken,
) -> bool {
    let mut retry = 0u32;
    loop {
        match sink.append(decision).await {
            Ok(AppendOutcome::Written) => {
                debug!(sink = sink.name(), signal_id = %decision.signal_id, "Decision written");
                return true;
            }
            Ok(AppendOutcome::AlreadyPresent) => {
                debug!(sink = sink.name(), signal_id = %decision.signal_id, "Decision already in sink");
                return true;
            }
            Err(e) => {
                let delay = policy.backoff(retry);
                retry = retry.saturating_add(1);
                warn!(
                    sink = sink.name(),
                    signal_id = %decision.signal_id,
                    attempt = retry,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Sink append failed"
                );
                tokio::select! {
                    _ = abandon.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
