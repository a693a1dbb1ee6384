use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use whalewatch_models::agent_message::{AgentVote, Stance};
use whalewatch_models::config::{ConsensusConfig, EarlyExit, TiePolicy};
use whalewatch_models::decision::{
    Decision, DecisionOutcome, ExecutionMode, DECISION_SCHEMA_VERSION,
};
use whalewatch_models::signal::{InvalidTransition, Signal, SignalState};
use whalewatch_models::vote_book::VoteBook;
use whalewatch_store::SeenSet;

const STANCES: [Stance; 3] = [Stance::Buy, Stance::Sell, Stance::Abstain];

/// How long a finalized signal id is remembered for first-wins checks.
const DECIDED_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
const DECIDED_CAPACITY: u64 = 1_000_000;

/// The aggregation policy, read once from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusRule {
    pub threshold: Decimal,
    pub quorum_minimum: usize,
    pub tie_policy: TiePolicy,
    pub early_exit: EarlyExit,
}

impl ConsensusRule {
    pub fn from_config(config: &ConsensusConfig) -> Self {
        Self {
            threshold: config.consensus_threshold,
            quorum_minimum: config.quorum_minimum,
            tie_policy: config.tie_policy,
            early_exit: config.early_exit,
        }
    }
}

/// The verdict for one vote set.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub state: SignalState,
    pub outcome: DecisionOutcome,
    /// Share of the counted votes held by the leading stance.
    pub agreement_ratio: Decimal,
    pub votes_considered: u32,
    /// The winning stance, or `None` when there were no votes or a tie abstained.
    pub leading: Option<Stance>,
}

#[derive(Debug, Default)]
struct Tally {
    counts: [usize; 3],
    confidence: [Decimal; 3],
}

impl Tally {
    fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Highest count and every stance holding it.
    fn leaders(&self) -> (usize, Vec<Stance>) {
        let top = self.counts.iter().copied().max().unwrap_or(0);
        let tied = STANCES
            .iter()
            .zip(self.counts)
            .filter(|(_, count)| *count == top)
            .map(|(stance, _)| *stance)
            .collect();
        (top, tied)
    }
}

fn index(stance: Stance) -> usize {
    match stance {
        Stance::Buy => 0,
        Stance::Sell => 1,
        Stance::Abstain => 2,
    }
}

fn verdict(
    leading: Option<Stance>,
    top: usize,
    total: usize,
    threshold: Decimal,
) -> (SignalState, DecisionOutcome, Decimal) {
    if total == 0 {
        return (SignalState::TimedOut, DecisionOutcome::NoTrade, Decimal::ZERO);
    }
    let ratio = Decimal::from(top) / Decimal::from(total);
    match leading {
        Some(stance) if stance != Stance::Abstain && ratio >= threshold => {
            (SignalState::ConsensusReached, stance.into(), ratio)
        }
        _ => (SignalState::NoConsensus, DecisionOutcome::NoTrade, ratio),
    }
}

/// Resolve a set of non-failed votes. Order-independent.
///
/// The stance with the most votes leads; ties abstain under
/// [`TiePolicy::NoTrade`], or go to the higher summed confidence under
/// [`TiePolicy::Confidence`]. A non-abstain leader whose share reaches the
/// threshold is a consensus. No votes at all is a timeout.
pub fn resolve<'a, I>(votes: I, rule: &ConsensusRule) -> Resolution
where
    I: IntoIterator<Item = &'a AgentVote>,
{
    let mut tally = Tally::default();
    for vote in votes {
        let i = index(vote.stance);
        tally.counts[i] += 1;
        tally.confidence[i] += vote.confidence;
    }

    let total = tally.total();
    let (top, tied) = tally.leaders();
    let leading = match tied.as_slice() {
        _ if total == 0 => None,
        [only] => Some(*only),
        _ => match rule.tie_policy {
            TiePolicy::NoTrade => None,
            TiePolicy::Confidence => break_by_confidence(&tied, &tally),
        },
    };

    let (state, outcome, ratio) = verdict(leading, top, total, rule.threshold);
    Resolution {
        state,
        outcome,
        agreement_ratio: ratio.round_dp(4),
        votes_considered: total as u32,
        leading,
    }
}

fn break_by_confidence(tied: &[Stance], tally: &Tally) -> Option<Stance> {
    let best = tied.iter().map(|s| tally.confidence[index(*s)]).max()?;
    let mut winners = tied.iter().filter(|s| tally.confidence[index(**s)] == best);
    match (winners.next(), winners.next()) {
        (Some(winner), None) => Some(*winner),
        _ => None,
    }
}

/// Whether polling can stop before every agent has answered.
pub fn is_settled(book: &VoteBook, rule: &ConsensusRule) -> bool {
    let votes = book.votes();
    match rule.early_exit {
        EarlyExit::Off => false,
        EarlyExit::Quorum => votes.len() >= rule.quorum_minimum,
        EarlyExit::Settled => {
            votes.len() >= rule.quorum_minimum
                && outcome_is_locked(&votes, book.pending().len(), rule)
        }
    }
}

/// True when no way the pending agents could answer (any stance, or failing)
/// changes the state and outcome of the current votes.
fn outcome_is_locked(votes: &[&AgentVote], pending: usize, rule: &ConsensusRule) -> bool {
    let current = resolve(votes.iter().copied(), rule);
    let mut base = [0usize; 3];
    for vote in votes {
        base[index(vote.stance)] += 1;
    }

    for buy in 0..=pending {
        for sell in 0..=pending - buy {
            for abstain in 0..=pending - buy - sell {
                let tally = Tally {
                    counts: [base[0] + buy, base[1] + sell, base[2] + abstain],
                    confidence: [Decimal::ZERO; 3],
                };
                let total = tally.total();
                let (top, tied) = tally.leaders();
                let leading = match tied.as_slice() {
                    [only] => Some(*only),
                    // Unknown confidences could break this tie either way.
                    _ if rule.tie_policy == TiePolicy::Confidence => return false,
                    _ => None,
                };
                let (state, outcome, _) = verdict(leading, top, total, rule.threshold);
                if state != current.state || outcome != current.outcome {
                    return false;
                }
            }
        }
    }
    true
}

/// Drives signals through their state machine and produces exactly one
/// decision per signal.
pub struct ConsensusEngine {
    rule: ConsensusRule,
    mode: ExecutionMode,
    decided: SeenSet,
}

impl ConsensusEngine {
    pub fn new(rule: ConsensusRule, mode: ExecutionMode) -> Self {
        Self {
            rule,
            mode,
            decided: SeenSet::new(DECIDED_CAPACITY, DECIDED_TTL),
        }
    }

    pub fn rule(&self) -> &ConsensusRule {
        &self.rule
    }

    /// `Detected -> Polling`.
    pub fn begin_polling(&self, signal: &mut Signal) -> Result<(), InvalidTransition> {
        signal.transition(SignalState::Polling)?;
        debug!(signal_id = %signal.signal_id, "Signal polling");
        Ok(())
    }

    /// Early-exit check handed to the panel while it polls.
    pub fn should_stop(&self, book: &VoteBook) -> bool {
        is_settled(book, &self.rule)
    }

    /// Resolve the signal, move it to its terminal state and build its decision.
    ///
    /// First finalize wins: once a signal (or its book) is retired, further
    /// calls return `Ok(None)`.
    pub fn finalize(
        &self,
        signal: &mut Signal,
        book: &mut VoteBook,
    ) -> Result<Option<Decision>, InvalidTransition> {
        if signal.is_retired() || book.is_retired() {
            debug!(signal_id = %signal.signal_id, "Signal already finalized");
            return Ok(None);
        }

        let resolution = resolve(book.votes(), &self.rule);
        if !signal.state.can_transition_to(resolution.state) {
            return Err(InvalidTransition {
                signal_id: signal.signal_id,
                from: signal.state,
                to: resolution.state,
            });
        }

        book.retire();
        if !self.decided.first_sighting(&signal.signal_id.to_string()) {
            warn!(signal_id = %signal.signal_id, "Signal was already decided elsewhere");
            return Ok(None);
        }
        signal.transition(resolution.state)?;

        let decision = Decision {
            schema_version: DECISION_SCHEMA_VERSION,
            signal_id: signal.signal_id,
            outcome: resolution.outcome,
            state: resolution.state,
            agreement_ratio: resolution.agreement_ratio,
            votes_considered: resolution.votes_considered,
            votes_expected: book.expected() as u32,
            decided_at: Utc::now(),
            mode: self.mode,
            trade_id: signal.trade_event.trade_id.clone(),
            market_id: signal.trade_event.market_id.clone(),
            agent_outcomes: book.outcomes(),
        };

        info!(
            signal_id = %decision.signal_id,
            state = %decision.state,
            outcome = %decision.outcome,
            agreement_ratio = %decision.agreement_ratio,
            votes = decision.votes_considered,
            expected = decision.votes_expected,
            "Signal decided"
        );
        Ok(Some(decision))
    }
}
