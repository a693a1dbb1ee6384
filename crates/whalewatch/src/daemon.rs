use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::feed::TradeFeed;
use crate::pipeline::{Pipeline, Submission};

/// Counters for one feed poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub fetched: usize,
    pub signals: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub rejected: usize,
}

/// Polls a trade feed on an interval and feeds the pipeline until cancelled.
pub struct Daemon {
    feed: Arc<dyn TradeFeed>,
    pipeline: Arc<Pipeline>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(feed: Arc<dyn TradeFeed>, pipeline: Arc<Pipeline>, interval: Duration) -> Self {
        Self {
            feed,
            pipeline,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled, then drain the pipeline.
    pub async fn run(&self) {
        info!(
            feed = self.feed.name(),
            interval_s = self.interval.as_secs(),
            "WhaleWatch daemon starting"
        );

        // Poll immediately on startup
        self.poll_once().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Poll loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.poll_once().await;
                }
            }
        }

        self.pipeline.shutdown().await;
        info!("WhaleWatch daemon stopped");
    }

    /// Fetch one page from the feed and submit every trade.
    pub async fn poll_once(&self) -> CycleStats {
        let mut stats = CycleStats::default();
        let trades = match self.feed.fetch().await {
            Ok(trades) => trades,
            Err(e) => {
                warn!(feed = self.feed.name(), error = %e, "Feed fetch failed");
                return stats;
            }
        };
        stats.fetched = trades.len();

        for raw in &trades {
            match self.pipeline.submit(raw).await {
                Ok(Submission::Signal { .. }) => stats.signals += 1,
                Ok(Submission::Duplicate) => stats.duplicates += 1,
                Ok(Submission::Filtered) => stats.filtered += 1,
                Err(_) => stats.rejected += 1,
            }
        }

        if stats.signals > 0 || stats.rejected > 0 {
            info!(?stats, in_flight = self.pipeline.in_flight(), "Feed cycle complete");
        } else {
            debug!(?stats, "Feed cycle complete");
        }
        stats
    }
}
