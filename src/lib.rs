//! FlowPilot - Runtime Execution Engine for Automation Graphs
//!
//! Executes user-defined graphs of browser-automation and data steps.
//! Independent steps run in parallel batches, CONDITION results gate the
//! branches below them, FOREACH expands into per-item steps, and a run can
//! pause for a human (explicitly, or when a verification challenge shows up)
//! and be resumed later, even from another process.
//!
//! # Architecture
//!
//! - [`graph`]: Graph definitions, loading and validation
//! - [`engine`]: Scheduler, executor contract, run state, storage and ledger
//! - [`handlers`]: Built-in step types
//! - [`driver`]: Browser automation abstraction
//! - [`detection`]: Page classification (challenge, login, signup, error)
//! - [`config`]: Engine configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowpilot::engine::{JsonFileStore, MemoryLedger, RunStatus, Scheduler};
//! use flowpilot::load_graph;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let graph = load_graph("price-alert.yaml")?;
//!
//!     let store = Arc::new(JsonFileStore::new(".flowpilot/runs"));
//!     let ledger = Arc::new(MemoryLedger::new().with_balance("user-1", 50));
//!     let scheduler = Scheduler::new(store, ledger);
//!
//!     let summary = scheduler.start_run("user-1", graph).await?;
//!     if summary.status == RunStatus::Waiting {
//!         // A human solves the challenge, then:
//!         scheduler.resume_execution(&summary.run_id).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod detection;
pub mod driver;
pub mod engine;
pub mod graph;
pub mod handlers;
pub mod node_type;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{RunStatus, RunSummary, Scheduler, StepHandler, StepOutcome};
pub use graph::{load_graph, GraphDefinition, NodeDefinition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowPilot";
