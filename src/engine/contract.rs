//! Executor Contract
//!
//! Every step type is a [`StepHandler`]. A handler reads its resolved inputs
//! from a [`StepContext`], may drive a page, log, or request new steps, and
//! returns a [`StepOutcome`]. Expected failures (missing input, driver
//! errors) are returned as [`StepOutcome::Failure`], never as panics, so the
//! scheduler can refund and record them uniformly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;

use super::cost::CostTable;
use super::resolve::OutputSnapshot;
use super::session::{ContextBinding, DriverPool};
use super::state::{LogEntry, LogLevel, PauseReason};
use crate::config::EngineConfig;
use crate::driver::{AutomationDriver, DriverError};

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success(HashMap<String, String>),
    Failure(String),
    Pause(PauseReason),
}

impl StepOutcome {
    /// Success with no outputs beyond those set through the context.
    pub fn success() -> Self {
        StepOutcome::Success(HashMap::new())
    }

    pub fn success_with<K, V>(outputs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        StepOutcome::Success(
            outputs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn failure(message: impl Into<String>) -> Self {
        StepOutcome::Failure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success(_))
    }
}

impl From<Result<StepOutcome, String>> for StepOutcome {
    fn from(result: Result<StepOutcome, String>) -> Self {
        result.unwrap_or_else(StepOutcome::Failure)
    }
}

/// A step a handler wants added to the run.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub node_type: String,
    pub inputs: HashMap<String, String>,
    /// Node IDs that must complete first
    pub dependencies: Vec<String>,
}

impl SpawnRequest {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            inputs: HashMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn depends_on(mut self, node_id: impl Into<String>) -> Self {
        self.dependencies.push(node_id.into());
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SpawnError {
    #[error("Cannot spawn step of unknown type '{0}'")]
    UnknownType(String),
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome;
}

/// Identity of the step being executed.
#[derive(Debug, Clone, Copy)]
pub struct StepIdentity<'a> {
    pub run_id: &'a str,
    pub step_id: &'a str,
    pub node_id: &'a str,
    pub user_id: &'a str,
}

/// Interaction surface handed to a handler for one execution.
pub struct StepContext<'a> {
    identity: StepIdentity<'a>,
    inputs: &'a HashMap<String, String>,
    dependencies: &'a [String],
    snapshot: &'a OutputSnapshot,
    resume_count: u32,
    pool: &'a DriverPool,
    binding: ContextBinding,
    costs: &'a CostTable,
    config: &'a EngineConfig,
    outputs: HashMap<String, String>,
    logs: Vec<LogEntry>,
    spawns: Vec<SpawnRequest>,
}

/// What a handler left behind besides its outcome.
pub struct ContextEffects {
    pub outputs: HashMap<String, String>,
    pub logs: Vec<LogEntry>,
    pub spawns: Vec<SpawnRequest>,
}

impl<'a> StepContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: StepIdentity<'a>,
        inputs: &'a HashMap<String, String>,
        dependencies: &'a [String],
        snapshot: &'a OutputSnapshot,
        resume_count: u32,
        pool: &'a DriverPool,
        binding: ContextBinding,
        costs: &'a CostTable,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            identity,
            inputs,
            dependencies,
            snapshot,
            resume_count,
            pool,
            binding,
            costs,
            config,
            outputs: HashMap::new(),
            logs: Vec::new(),
            spawns: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        self.identity.run_id
    }

    pub fn step_id(&self) -> &str {
        self.identity.step_id
    }

    pub fn node_id(&self) -> &str {
        self.identity.node_id
    }

    pub fn user_id(&self) -> &str {
        self.identity.user_id
    }

    /// A resolved input value. Empty values count as missing.
    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// A resolved input value, or the failure message for a missing one.
    pub fn require(&self, name: &str) -> Result<String, String> {
        self.input(name)
            .map(str::to_string)
            .ok_or_else(|| format!("{} input is missing", name))
    }

    pub fn inputs(&self) -> &HashMap<String, String> {
        self.inputs
    }

    pub fn dependencies(&self) -> &[String] {
        self.dependencies
    }

    /// Outputs of an already-completed step of this run.
    pub fn completed_outputs(&self, node_id: &str) -> Option<&HashMap<String, String>> {
        self.snapshot.get(node_id)
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.outputs.insert(name.into(), value.into());
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Error, message.into());
    }

    fn push_log(&mut self, level: LogLevel, message: String) {
        debug!("[{}] {}", self.identity.node_id, message);
        self.logs.push(LogEntry::new(level, message));
    }

    /// Requests a new step. It is created after the current batch finishes.
    pub fn spawn(&mut self, request: SpawnRequest) -> Result<(), SpawnError> {
        if !self.costs.contains(&request.node_type) {
            return Err(SpawnError::UnknownType(request.node_type));
        }
        self.spawns.push(request);
        Ok(())
    }

    /// True when the step is running again after a resume.
    pub fn resumed(&self) -> bool {
        self.resume_count > 0
    }

    pub fn resume_count(&self) -> u32 {
        self.resume_count
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    pub fn context_key(&self) -> &str {
        &self.binding.key
    }

    /// The page this step drives, forked or restored when needed.
    pub async fn driver(&self) -> Result<Arc<dyn AutomationDriver>, DriverError> {
        self.pool
            .acquire(&self.binding, self.config.navigation_timeout())
            .await
    }

    /// URL of this step's page when a context is already open.
    pub async fn current_url(&self) -> Option<String> {
        let driver = self.pool.get(&self.binding.key).await?;
        driver.current_url().await.ok()
    }

    /// Opens a fresh page for this step's context.
    pub async fn launch_driver(&self) -> Result<Arc<dyn AutomationDriver>, DriverError> {
        self.pool.launch(&self.binding.key).await
    }

    pub fn into_effects(self) -> ContextEffects {
        ContextEffects {
            outputs: self.outputs,
            logs: self.logs,
            spawns: self.spawns,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;

    struct Echo;

    #[async_trait]
    impl StepHandler for Echo {
        async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
            let value = match ctx.require("Value") {
                Ok(value) => value,
                Err(e) => return StepOutcome::failure(e),
            };
            ctx.info(format!("echo {}", value));
            ctx.set_output("Echo", value);
            StepOutcome::success()
        }
    }

    struct Spawner;

    #[async_trait]
    impl StepHandler for Spawner {
        async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
            if let Err(e) = ctx.spawn(SpawnRequest::new("TELEPORT")) {
                return StepOutcome::failure(e.to_string());
            }
            StepOutcome::success()
        }
    }

    #[tokio::test]
    async fn test_context_collects_outputs_and_logs() {
        let harness = Harness::new().with_input("Value", "hi");
        let (outcome, effects) = harness.run(&Echo).await;

        assert!(outcome.is_success());
        assert_eq!(effects.outputs["Echo"], "hi");
        assert_eq!(effects.logs.len(), 1);
        assert_eq!(effects.logs[0].level, LogLevel::Info);
    }

    #[tokio::test]
    async fn test_empty_input_counts_as_missing() {
        let harness = Harness::new().with_input("Value", "");
        let (outcome, _) = harness.run(&Echo).await;
        assert_eq!(outcome, StepOutcome::failure("Value input is missing"));
    }

    #[tokio::test]
    async fn test_spawn_unknown_type_rejected() {
        let (outcome, effects) = Harness::new().run(&Spawner).await;
        assert_eq!(
            outcome,
            StepOutcome::failure("Cannot spawn step of unknown type 'TELEPORT'")
        );
        assert!(effects.spawns.is_empty());
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: StepOutcome = Ok(StepOutcome::success()).into();
        assert!(ok.is_success());

        let err: StepOutcome = Err::<StepOutcome, String>("boom".into()).into();
        assert_eq!(err, StepOutcome::failure("boom"));
    }
}
