use std::collections::HashMap;

use uuid::Uuid;

use crate::agent_message::{AgentOutcome, AgentVote, FailureReason};

/// Result of offering an outcome to a [`VoteBook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Accepted,
    /// The agent already has a vote or failure for this signal.
    Duplicate,
    /// The agent is not on this signal's roster.
    UnknownAgent,
    /// The vote belongs to a different signal.
    Foreign,
    /// The signal is already resolved; the outcome is discarded.
    Late,
}

/// The isolated, append-only vote collection of a single signal.
///
/// Holds at most one outcome per rostered agent. Once retired, nothing more is
/// accepted.
#[derive(Debug, Clone)]
pub struct VoteBook {
    signal_id: Uuid,
    roster: Vec<String>,
    outcomes: HashMap<String, AgentOutcome>,
    retired: bool,
}

impl VoteBook {
    pub fn new<I, S>(signal_id: Uuid, roster: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for name in roster {
            let name = name.into();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Self {
            signal_id,
            roster: names,
            outcomes: HashMap::new(),
            retired: false,
        }
    }

    pub fn signal_id(&self) -> Uuid {
        self.signal_id
    }

    pub fn record(&mut self, outcome: AgentOutcome) -> RecordOutcome {
        if self.retired {
            return RecordOutcome::Late;
        }
        if let AgentOutcome::Vote(vote) = &outcome {
            if vote.signal_id != self.signal_id {
                return RecordOutcome::Foreign;
            }
        }
        let name = outcome.agent_name();
        if !self.roster.iter().any(|n| n == name) {
            return RecordOutcome::UnknownAgent;
        }
        if self.outcomes.contains_key(name) {
            return RecordOutcome::Duplicate;
        }
        self.outcomes.insert(name.to_string(), outcome);
        RecordOutcome::Accepted
    }

    /// Record `reason` for every agent still outstanding. Returns how many were filled.
    pub fn fill_missing(&mut self, reason: FailureReason) -> usize {
        if self.retired {
            return 0;
        }
        let pending: Vec<String> = self.pending().into_iter().map(str::to_string).collect();
        for name in &pending {
            self.outcomes
                .insert(name.clone(), AgentOutcome::failed(name, reason.clone()));
        }
        pending.len()
    }

    /// Close the book. Returns `true` only for the first call.
    pub fn retire(&mut self) -> bool {
        !std::mem::replace(&mut self.retired, true)
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn expected(&self) -> usize {
        self.roster.len()
    }

    pub fn recorded(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.roster.len()
    }

    pub fn pending(&self) -> Vec<&str> {
        self.roster
            .iter()
            .filter(|n| !self.outcomes.contains_key(*n))
            .map(String::as_str)
            .collect()
    }

    /// Non-failed votes, in roster order.
    pub fn votes(&self) -> Vec<&AgentVote> {
        self.roster
            .iter()
            .filter_map(|n| self.outcomes.get(n))
            .filter_map(AgentOutcome::vote)
            .collect()
    }

    /// Every recorded outcome, in roster order.
    pub fn outcomes(&self) -> Vec<AgentOutcome> {
        self.roster
            .iter()
            .filter_map(|n| self.outcomes.get(n).cloned())
            .collect()
    }
}
