pub mod ledger;
pub mod service;

pub use ledger::{HistoryLedger, DEFAULT_HISTORY_CAP};
pub use service::{HistoryError, HistoryService, NewGeneration, SaveOutcome};
