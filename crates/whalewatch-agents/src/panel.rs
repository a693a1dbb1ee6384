use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use whalewatch_models::agent_message::{AgentOutcome, AgentQuery, AgentVote, FailureReason};
use whalewatch_models::config::{AgentsConfig, MAX_RETRIES_LIMIT};
use whalewatch_models::signal::Signal;
use whalewatch_models::vote_book::{RecordOutcome, VoteBook};

use crate::agent::PanelAgent;
use crate::error::AgentError;

/// Timing and retry policy for a panel poll.
#[derive(Debug, Clone)]
pub struct PanelSettings {
    /// Covers every attempt one agent makes, including backoff.
    pub per_agent_timeout: Duration,
    pub overall_timeout: Duration,
    /// Capped at [`MAX_RETRIES_LIMIT`] when polling.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl PanelSettings {
    pub fn from_config(config: &AgentsConfig) -> Self {
        Self {
            per_agent_timeout: Duration::from_secs(config.per_agent_timeout_seconds),
            overall_timeout: Duration::from_secs(config.overall_timeout_seconds),
            max_retries: config.max_retries.min(MAX_RETRIES_LIMIT),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self::from_config(&AgentsConfig::default())
    }
}

/// What a poll did, beyond the outcomes now in the vote book.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub elapsed: Duration,
    /// The stop condition fired before every agent answered.
    pub stopped_early: bool,
    /// The overall deadline passed with agents outstanding.
    pub timed_out: bool,
    /// Agents given a synthetic failure when the poll ended.
    pub unanswered: usize,
}

/// The fixed set of agents polled for every signal.
pub struct AgentPanel {
    agents: Vec<Arc<dyn PanelAgent>>,
    settings: PanelSettings,
}

impl AgentPanel {
    pub fn new(agents: Vec<Arc<dyn PanelAgent>>, settings: PanelSettings) -> Self {
        Self { agents, settings }
    }

    pub fn settings(&self) -> &PanelSettings {
        &self.settings
    }

    pub fn roster(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// An empty vote book for `signal`, sized to this panel.
    pub fn new_book(&self, signal: &Signal) -> VoteBook {
        VoteBook::new(signal.signal_id, self.roster())
    }

    /// Poll every agent and wait for all of them, or the overall deadline.
    pub async fn poll(&self, signal: &Signal) -> (VoteBook, PollReport) {
        let mut book = self.new_book(signal);
        let report = self.poll_until(signal, &mut book, |_| false).await;
        (book, report)
    }

    /// Poll every agent concurrently, recording outcomes into `book` as they
    /// arrive, until all have answered, `stop` returns true, or the overall
    /// deadline passes.
    ///
    /// When the poll ends, agents still outstanding are cancelled and given a
    /// failure (`Cancelled` after an early stop, `Timeout` at the deadline), so
    /// the book always ends complete.
    pub async fn poll_until<F>(
        &self,
        signal: &Signal,
        book: &mut VoteBook,
        mut stop: F,
    ) -> PollReport
    where
        F: FnMut(&VoteBook) -> bool,
    {
        let start = Instant::now();
        let deadline = start + self.settings.overall_timeout;
        info!(signal_id = %signal.signal_id, agents = self.agents.len(), "Polling panel");

        let mut tasks = JoinSet::new();
        for agent in &self.agents {
            let agent = Arc::clone(agent);
            let query = AgentQuery::for_signal(signal, agent.name());
            let settings = self.settings.clone();
            tasks.spawn(async move { query_agent(agent, query, settings).await });
        }

        let mut stopped_early = false;
        let mut timed_out = false;

        while !book.is_complete() {
            if stop(&*book) {
                stopped_early = true;
                break;
            }
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    let agent = outcome.agent_name().to_string();
                    match book.record(outcome) {
                        RecordOutcome::Accepted => {}
                        other => {
                            warn!(signal_id = %signal.signal_id, agent = %agent, result = ?other, "Discarded agent outcome")
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    error!(signal_id = %signal.signal_id, error = %e, "Agent task panicked");
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        tasks.abort_all();

        let reason = if stopped_early {
            FailureReason::Cancelled
        } else if timed_out {
            FailureReason::Timeout
        } else {
            FailureReason::Internal("agent task ended without an outcome".to_string())
        };
        let pending: Vec<String> = book.pending().into_iter().map(str::to_string).collect();
        let unanswered = book.fill_missing(reason);
        if unanswered > 0 {
            warn!(
                signal_id = %signal.signal_id,
                pending = ?pending,
                stopped_early,
                timed_out,
                "Agents did not answer"
            );
        }

        let elapsed = start.elapsed();
        info!(
            signal_id = %signal.signal_id,
            recorded = book.recorded(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Panel poll finished"
        );

        PollReport {
            elapsed,
            stopped_early,
            timed_out,
            unanswered,
        }
    }
}

/// Query one agent under its own deadline, retrying transient failures.
async fn query_agent(
    agent: Arc<dyn PanelAgent>,
    query: AgentQuery,
    settings: PanelSettings,
) -> AgentOutcome {
    let name = agent.name().to_string();
    let start = Instant::now();

    let max_retries = settings.max_retries.min(MAX_RETRIES_LIMIT);
    let attempts = async {
        let mut retries = 0;
        loop {
            match agent.query(&query).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && retries < max_retries => {
                    retries += 1;
                    warn!(agent = %name, attempt = retries, error = %e, "Transient agent failure, retrying");
                    tokio::time::sleep(settings.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    };

    let result = match tokio::time::timeout(settings.per_agent_timeout, attempts).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout(
            settings.per_agent_timeout.as_millis() as u64
        )),
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(response)
            if response.confidence < Decimal::ZERO || response.confidence > Decimal::ONE =>
        {
            let e = AgentError::Parse(format!(
                "confidence {} outside [0, 1]",
                response.confidence
            ));
            warn!(agent = %name, error = %e, elapsed_ms, "Agent failed");
            AgentOutcome::failed(&name, e.failure_reason())
        }
        Ok(response) => {
            debug!(agent = %name, stance = %response.stance, confidence = %response.confidence, elapsed_ms, "Agent voted");
            AgentOutcome::Vote(AgentVote::from_response(query.signal_id, &name, response))
        }
        Err(e) => {
            warn!(agent = %name, error = %e, elapsed_ms, "Agent failed");
            AgentOutcome::failed(&name, e.failure_reason())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_signal, Script, ScriptedAgent};
    use rust_decimal_macros::dec;
    use whalewatch_models::agent_message::Stance;

    fn settings() -> PanelSettings {
        PanelSettings {
            per_agent_timeout: Duration::from_secs(5),
            overall_timeout: Duration::from_secs(10),
            max_retries: 1,
            retry_backoff: Duration::from_millis(100),
        }
    }

    fn failure_of(book: &VoteBook, agent: &str) -> Option<FailureReason> {
        book.outcomes().into_iter().find_map(|o| match o {
            AgentOutcome::Failed { agent_name, reason } if agent_name == agent => Some(reason),
            _ => None,
        })
    }

    #[tokio::test]
    async fn collects_every_vote() {
        let panel = AgentPanel::new(
            vec![
                Arc::new(ScriptedAgent::voting("a", Stance::Buy, dec!(0.8))),
                Arc::new(ScriptedAgent::voting("b", Stance::Sell, dec!(0.6))),
                Arc::new(ScriptedAgent::voting("c", Stance::Abstain, dec!(0.5))),
            ],
            settings(),
        );
        let signal = sample_signal("t1");

        let (book, report) = panel.poll(&signal).await;
        assert!(book.is_complete());
        assert_eq!(book.votes().len(), 3);
        assert_eq!(report.unanswered, 0);
        assert!(!report.timed_out && !report.stopped_early);
        assert!(book.votes().iter().all(|v| v.signal_id == signal.signal_id));
    }

    #[tokio::test]
    async fn bad_replies_become_failures() {
        let panel = AgentPanel::new(
            vec![
                Arc::new(ScriptedAgent::voting("a", Stance::Buy, dec!(0.8))),
                Arc::new(ScriptedAgent::new("garbled", Script::Reply("¯\\_(ツ)_/¯".into()))),
                Arc::new(ScriptedAgent::new("refused", Script::Reject("401".into()))),
                Arc::new(ScriptedAgent::new("overconfident", Script::Vote {
                    stance: Stance::Buy,
                    confidence: dec!(1.2),
                })),
            ],
            settings(),
        );

        let (book, _) = panel.poll(&sample_signal("t1")).await;
        assert_eq!(book.votes().len(), 1);
        assert!(matches!(
            failure_of(&book, "garbled"),
            Some(FailureReason::UnparseableResponse(_))
        ));
        assert!(matches!(failure_of(&book, "refused"), Some(FailureReason::Rejected(_))));
        assert!(matches!(
            failure_of(&book, "overconfident"),
            Some(FailureReason::UnparseableResponse(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_once() {
        let flaky = Arc::new(ScriptedAgent::new(
            "flaky",
            Script::FailTransient {
                times: 1,
                then: Box::new(Script::Vote {
                    stance: Stance::Buy,
                    confidence: dec!(0.7),
                }),
            },
        ));
        let hopeless = Arc::new(ScriptedAgent::new(
            "hopeless",
            Script::FailTransient {
                times: 5,
                then: Box::new(Script::Vote {
                    stance: Stance::Buy,
                    confidence: dec!(0.7),
                }),
            },
        ));
        let panel = AgentPanel::new(vec![flaky.clone(), hopeless.clone()], settings());

        let (book, _) = panel.poll(&sample_signal("t1")).await;
        assert_eq!(flaky.calls(), 2);
        assert_eq!(hopeless.calls(), 2);
        assert_eq!(book.votes().len(), 1);
        assert!(matches!(
            failure_of(&book, "hopeless"),
            Some(FailureReason::Connection(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_one_retry() {
        let hopeless = Arc::new(ScriptedAgent::new(
            "hopeless",
            Script::FailTransient {
                times: 10,
                then: Box::new(Script::vote(Stance::Buy, dec!(0.7))),
            },
        ));
        let generous = PanelSettings {
            max_retries: 5,
            ..settings()
        };
        let panel = AgentPanel::new(vec![hopeless.clone()], generous);

        let (book, _) = panel.poll(&sample_signal("t1")).await;
        assert_eq!(hopeless.calls(), 2);
        assert!(book.votes().is_empty());

        let mut config = AgentsConfig::default();
        config.max_retries = 3;
        assert_eq!(PanelSettings::from_config(&config).max_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn per_agent_timeout() {
        let mut s = settings();
        s.per_agent_timeout = Duration::from_secs(2);
        let panel = AgentPanel::new(
            vec![
                Arc::new(ScriptedAgent::voting("a", Stance::Buy, dec!(0.8))),
                Arc::new(ScriptedAgent::hanging("slow")),
            ],
            s,
        );

        let (book, report) = panel.poll(&sample_signal("t1")).await;
        assert_eq!(failure_of(&book, "slow"), Some(FailureReason::Timeout));
        assert!(!report.timed_out);
        assert!(report.elapsed >= Duration::from_secs(2));
        assert!(report.elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn overall_deadline_bounds_the_poll() {
        let mut s = settings();
        s.per_agent_timeout = Duration::from_secs(60);
        s.overall_timeout = Duration::from_secs(3);
        let panel = AgentPanel::new(
            vec![
                Arc::new(ScriptedAgent::voting("a", Stance::Buy, dec!(0.8))),
                Arc::new(ScriptedAgent::hanging("b")),
                Arc::new(ScriptedAgent::hanging("c")),
            ],
            s,
        );

        let (book, report) = panel.poll(&sample_signal("t1")).await;
        assert!(report.timed_out);
        assert_eq!(report.unanswered, 2);
        assert!(book.is_complete());
        assert_eq!(failure_of(&book, "b"), Some(FailureReason::Timeout));
        assert!(report.elapsed <= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_condition_cancels_stragglers() {
        let panel = AgentPanel::new(
            vec![
                Arc::new(ScriptedAgent::voting("a", Stance::Buy, dec!(0.8))),
                Arc::new(ScriptedAgent::voting("b", Stance::Buy, dec!(0.8))),
                Arc::new(ScriptedAgent::hanging("c")),
            ],
            settings(),
        );
        let signal = sample_signal("t1");
        let mut book = panel.new_book(&signal);

        let report = panel
            .poll_until(&signal, &mut book, |b| b.votes().len() >= 2)
            .await;
        assert!(report.stopped_early);
        assert_eq!(failure_of(&book, "c"), Some(FailureReason::Cancelled));
        assert!(report.elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn panicking_agent_does_not_sink_the_poll() {
        let panel = AgentPanel::new(
            vec![
                Arc::new(ScriptedAgent::voting("a", Stance::Sell, dec!(0.9))),
                Arc::new(ScriptedAgent::new("boom", Script::Panic)),
            ],
            settings(),
        );

        let (book, _) = panel.poll(&sample_signal("t1")).await;
        assert_eq!(book.votes().len(), 1);
        assert!(matches!(
            failure_of(&book, "boom"),
            Some(FailureReason::Internal(_))
        ));
    }
}
