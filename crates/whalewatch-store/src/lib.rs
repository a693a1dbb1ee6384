pub mod decision_log;
pub mod error;
pub mod memory;
pub mod sink;

pub use decision_log::SqliteDecisionLog;
pub use error::StoreError;
pub use memory::{SeenSet, TtlCache};
pub use sink::{AppendOutcome, DecisionSink, MemorySink, SqliteSink};
