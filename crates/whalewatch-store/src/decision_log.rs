use rusqlite::Connection;
use uuid::Uuid;
use whalewatch_models::decision::Decision;

use crate::error::StoreError;

/// Table written by the decision log. One row per signal.
///
/// `decision_json` carries the full record (including every agent outcome);
/// the other columns exist for querying.
pub const DECISIONS_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS decisions (
    signal_id         TEXT PRIMARY KEY,
    trade_id          TEXT NOT NULL,
    market_id         TEXT NOT NULL,
    outcome           TEXT NOT NULL,
    state             TEXT NOT NULL,
    agreement_ratio   TEXT NOT NULL,
    votes_considered  INTEGER NOT NULL,
    votes_expected    INTEGER NOT NULL,
    mode              TEXT NOT NULL,
    decided_at        TEXT NOT NULL,
    decision_json     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decisions_market ON decisions(market_id);
CREATE INDEX IF NOT EXISTS idx_decisions_decided_at ON decisions(decided_at);
";

/// Append-only SQLite log of decisions, idempotent on `signal_id`.
pub struct SqliteDecisionLog {
    conn: Connection,
}

impl SqliteDecisionLog {
    /// Open (or create) the log at `path`. Enables WAL so readers don't block the writer.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(DECISIONS_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(DECISIONS_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Insert a decision. Returns `false` when a row for the signal already exists.
    pub fn append(&self, decision: &Decision) -> Result<bool, StoreError> {
        let json = serde_json::to_string(decision)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO decisions \
             (signal_id, trade_id, market_id, outcome, state, agreement_ratio, \
              votes_considered, votes_expected, mode, decided_at, decision_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                decision.signal_id.to_string(),
                decision.trade_id,
                decision.market_id,
                decision.outcome.to_string(),
                decision.state.to_string(),
                decision.agreement_ratio.to_string(),
                decision.votes_considered,
                decision.votes_expected,
                decision.mode.as_str(),
                decision.decided_at.to_rfc3339(),
                json,
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn get(&self, signal_id: Uuid) -> Result<Option<Decision>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT decision_json FROM decisions WHERE signal_id = ?1")?;

        let result = stmt.query_row(rusqlite::params![signal_id.to_string()], |row| {
            row.get::<_, String>(0)
        });

        match result {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Most recent decisions first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Decision>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT decision_json FROM decisions ORDER BY decided_at DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
        Ok(count)
    }
}
