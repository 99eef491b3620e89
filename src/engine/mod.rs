//! Run execution
//!
//! - [`scheduler`]: batch loop, skip gate, FOREACH expansion, resume
//! - [`contract`]: the handler trait and the per-step interaction surface
//! - [`registry`]: node type to handler mapping
//! - [`state`]: persisted run and step records
//! - [`store`] / [`ledger`]: storage and balance collaborators
//! - [`session`]: driver contexts shared by the steps of a run

pub mod contract;
pub mod cost;
pub mod error;
pub mod ledger;
pub mod registry;
pub mod resolve;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod store;
pub mod timeline;

pub use contract::{SpawnError, SpawnRequest, StepContext, StepHandler, StepOutcome};
pub use cost::CostTable;
pub use error::EngineError;
pub use ledger::{Ledger, LedgerError, MemoryLedger};
pub use registry::HandlerRegistry;
pub use scheduler::{RunSummary, Scheduler};
pub use state::{LogEntry, LogLevel, PauseKind, PauseReason, Run, RunStatus, StepRecord, StepStatus};
pub use store::{JsonFileStore, MemoryStore, RunStore, StoreError};
pub use timeline::ExecutionTimeline;
