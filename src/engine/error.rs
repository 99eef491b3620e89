use thiserror::Error;

use super::ledger::LedgerError;
use super::state::RunStatus;
use super::store::StoreError;
use crate::graph::ValidationError;

/// Run-level failures. Step-level failures never surface here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Invalid graph: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    InvalidGraph(Vec<ValidationError>),

    #[error("Run '{run_id}' cannot be resumed: status is {status}, expected WAITING")]
    NotWaiting { run_id: String, status: RunStatus },

    #[error("Run '{run_id}' cannot be executed: status is {status}")]
    NotRunnable { run_id: String, status: RunStatus },

    #[error("Storage failure: {0}")]
    Store(StoreError),

    #[error("Ledger failure: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunNotFound(id) => EngineError::RunNotFound(id),
            other => EngineError::Store(other),
        }
    }
}
