use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;
use whalewatch_models::decision::Decision;

use crate::decision_log::SqliteDecisionLog;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written,
    /// A decision for this signal was already stored; nothing changed.
    AlreadyPresent,
}

/// Destination for terminal decisions. Downstream paper tracking and
/// execution read from here.
///
/// Implementations must be idempotent on `signal_id`: appending the same
/// signal twice stores it once.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, decision: &Decision) -> Result<AppendOutcome, StoreError>;
}

/// Keeps decisions in memory. Useful for tests and the one-shot `evaluate` command.
#[derive(Default)]
pub struct MemorySink {
    inner: tokio::sync::Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    seen: HashSet<Uuid>,
    decisions: Vec<Decision>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn decisions(&self) -> Vec<Decision> {
        self.inner.lock().await.decisions.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.decisions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DecisionSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, decision: &Decision) -> Result<AppendOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.seen.insert(decision.signal_id) {
            return Ok(AppendOutcome::AlreadyPresent);
        }
        inner.decisions.push(decision.clone());
        Ok(AppendOutcome::Written)
    }
}

/// Decision sink backed by the SQLite decision log.
///
/// `rusqlite::Connection` is not `Sync`, so access goes through a `Mutex`.
/// Appends run on the blocking pool.
pub struct SqliteSink {
    log: Arc<Mutex<SqliteDecisionLog>>,
}

impl SqliteSink {
    pub fn new(log: SqliteDecisionLog) -> Self {
        Self {
            log: Arc::new(Mutex::new(log)),
        }
    }

    pub fn open(path: &str) -> Result<Self, StoreError> {
        Ok(Self::new(SqliteDecisionLog::open(path)?))
    }

    pub fn get(&self, signal_id: Uuid) -> Result<Option<Decision>, StoreError> {
        self.lock()?.get(signal_id)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.lock()?.count()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SqliteDecisionLog>, StoreError> {
        lock_log(&self.log)
    }
}

fn lock_log(
    log: &Mutex<SqliteDecisionLog>,
) -> Result<std::sync::MutexGuard<'_, SqliteDecisionLog>, StoreError> {
    log.lock()
        .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
}

#[async_trait]
impl DecisionSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, decision: &Decision) -> Result<AppendOutcome, StoreError> {
        let log = Arc::clone(&self.log);
        let row = decision.clone();
        let written = tokio::task::spawn_blocking(move || {
            let guard = lock_log(&log)?;
            let written = guard.append(&row);
            drop(guard);
            written
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("SQLite append task failed: {e}")))??;
        if written {
            Ok(AppendOutcome::Written)
        } else {
            debug!(signal_id = %decision.signal_id, "Decision already logged");
            Ok(AppendOutcome::AlreadyPresent)
        }
    }
}
