//! Step Scheduler
//!
//! Drives a run to completion in batches:
//! - Recomputes the runnable set from persisted step state every iteration
//! - Skips steps whose CONDITION branch was not taken
//! - Executes the whole batch concurrently and waits for all of it
//! - Applies spawn requests and FOREACH expansion between batches
//! - Stops after the batch that produced a failure or a pause
//!
//! Each step reserves its cost before its handler runs. Success consumes
//! the reservation, failure refunds it, and a pause holds it until the run
//! is resumed or fails.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::contract::{SpawnRequest, StepContext, StepIdentity, StepOutcome};
use super::cost::CostTable;
use super::error::EngineError;
use super::ledger::Ledger;
use super::registry::HandlerRegistry;
use super::resolve::{resolve_inputs, OutputSnapshot};
use super::session::{ContextBinding, DriverPool};
use super::state::{LogLevel, Run, RunStatus, StepRecord, StepStatus};
use super::store::RunStore;
use super::timeline::ExecutionTimeline;
use crate::config::EngineConfig;
use crate::driver::DriverFactory;
use crate::graph::{validate_graph, BranchLabel, GraphDefinition};
use crate::node_type::{CONDITION, FOREACH, FOREACH_JOIN};

/// Final state of a run after `run` or `resume_execution` returns.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub credits_consumed: u64,
    pub step_counts: BTreeMap<StepStatus, usize>,
    /// Rebuilt from step records; `timeline.gantt_chart()` renders it
    pub timeline: ExecutionTimeline,
}

impl RunSummary {
    /// Number of steps in a given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.step_counts.get(&status).copied().unwrap_or(0)
    }
}

/// Whether a PENDING step can run now.
#[derive(Debug, PartialEq)]
enum Readiness {
    Blocked,
    Ready,
    Skip {
        dependency: String,
        expected: BranchLabel,
    },
}

/// A step after one execution attempt, with the spawns it requested.
struct Executed {
    step: StepRecord,
    spawns: Vec<SpawnRequest>,
}

impl Executed {
    fn finished(step: StepRecord) -> Self {
        Self {
            step,
            spawns: Vec::new(),
        }
    }
}

/// Runtime execution engine for graph runs.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use flowpilot::engine::{MemoryLedger, MemoryStore, Scheduler};
/// use flowpilot::graph::load_graph;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let graph = load_graph("price-alert.yaml")?;
///     let ledger = Arc::new(MemoryLedger::new().with_balance("user-1", 100));
///     let scheduler = Scheduler::new(Arc::new(MemoryStore::new()), ledger);
///
///     let summary = scheduler.start_run("user-1", graph).await?;
///     println!("{} ({} credits)", summary.status, summary.credits_consumed);
///     Ok(())
/// }
/// ```
pub struct Scheduler {
    store: Arc<dyn RunStore>,
    ledger: Arc<dyn Ledger>,
    registry: Arc<HandlerRegistry>,
    costs: CostTable,
    config: EngineConfig,
    driver_factory: Option<Arc<dyn DriverFactory>>,
    pools: Mutex<HashMap<String, Arc<DriverPool>>>,
}

impl Scheduler {
    /// Creates a scheduler with the built-in handlers and default costs.
    pub fn new(store: Arc<dyn RunStore>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            store,
            ledger,
            registry: Arc::new(HandlerRegistry::with_builtins()),
            costs: CostTable::default(),
            config: EngineConfig::default(),
            driver_factory: None,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_costs(mut self, costs: CostTable) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_driver_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.driver_factory = Some(factory);
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn costs(&self) -> &CostTable {
        &self.costs
    }

    /// Validates the graph and persists a PENDING run with one PENDING step
    /// per node. Nothing is executed.
    pub async fn create_run(
        &self,
        user_id: &str,
        graph: GraphDefinition,
    ) -> Result<String, EngineError> {
        validate_graph(&graph).map_err(EngineError::InvalidGraph)?;

        let run = Run::new(user_id, graph);
        self.store.save_run(&run).await?;

        for node in &run.graph.nodes {
            let step = StepRecord::new(&run.id, &node.id, &node.node_type)
                .with_inputs(node.inputs.clone())
                .with_dependencies(run.graph.dependencies_of(&node.id))
                .with_edge_conditions(run.graph.edge_conditions_of(&node.id))
                .with_reserved(self.costs.cost_or_zero(&node.node_type));
            self.store.save_step(&step).await?;
        }

        info!(
            "Created run '{}' for user '{}' ({} steps)",
            run.id,
            user_id,
            run.graph.len()
        );
        Ok(run.id)
    }

    /// Creates a run and drives it.
    pub async fn start_run(
        &self,
        user_id: &str,
        graph: GraphDefinition,
    ) -> Result<RunSummary, EngineError> {
        let run_id = self.create_run(user_id, graph).await?;
        self.run(&run_id).await
    }

    /// Drives a PENDING or RUNNING run until it completes, fails or pauses.
    pub async fn run(&self, run_id: &str) -> Result<RunSummary, EngineError> {
        let mut run = self.store.load_run(run_id).await?;
        if run.status.is_terminal() || run.status == RunStatus::Waiting {
            return Err(EngineError::NotRunnable {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }

        run.status = RunStatus::Running;
        run.started_at.get_or_insert_with(Utc::now);
        self.store.save_run(&run).await?;
        info!("Starting run '{}'", run_id);

        let pool = self.pool_for(run_id).await;
        if let Err(e) = self.drive(&mut run, &pool).await {
            error!("Run '{}' aborted: {}", run_id, e);
            run.finish(RunStatus::Failed);
            if let Err(save_err) = self.store.save_run(&run).await {
                warn!("Failed to record failure of run '{}': {}", run_id, save_err);
            }
            self.release_pool(run_id).await;
            return Err(e);
        }

        if run.status.is_terminal() {
            self.release_pool(run_id).await;
        }

        let summary = self.summarize(&run).await?;
        debug!("Run '{}' timeline:{}", run_id, summary.timeline.gantt_chart());
        Ok(summary)
    }

    /// Resumes a WAITING run.
    ///
    /// Every WAITING step gets its held reservation back and returns to
    /// PENDING; the run is then driven again.
    pub async fn resume_execution(&self, run_id: &str) -> Result<RunSummary, EngineError> {
        let mut run = self.store.load_run(run_id).await?;
        if run.status != RunStatus::Waiting {
            return Err(EngineError::NotWaiting {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }

        let pool = self.pool_for(run_id).await;
        let waiting: Vec<StepRecord> = self
            .store
            .load_steps(run_id)
            .await?
            .into_iter()
            .filter(|s| s.status == StepStatus::Waiting)
            .collect();

        for mut step in waiting {
            if step.reserved > 0 {
                self.ledger.refund(&run.user_id, step.reserved).await?;
            }

            let recovery_url = step
                .pause_reason
                .as_ref()
                .and_then(|r| r.page_url())
                .map(str::to_string);
            if let (Some(key), Some(url)) = (step.context_key.clone(), recovery_url) {
                pool.register_recovery(key, url).await;
            }

            step.reset_for_resume();
            step.log(
                LogLevel::Info,
                format!("Resumed (resume #{})", step.resume_count),
            );
            self.store.save_step(&step).await?;
            info!("Step '{}' resumed", step.node_id);
        }

        run.status = RunStatus::Running;
        self.store.save_run(&run).await?;

        self.run(run_id).await
    }

    async fn drive(&self, run: &mut Run, pool: &DriverPool) -> Result<(), EngineError> {
        let mut batch_number = 0;

        loop {
            let steps = self.store.load_steps(&run.id).await?;
            let (runnable, skipped) = plan_batch(&steps);

            for (index, dependency, expected) in skipped {
                let mut step = steps[index].clone();
                step.skip();
                step.log(
                    LogLevel::Info,
                    format!("Skipped: '{}' did not take the '{}' branch", dependency, expected),
                );
                self.store.save_step(&step).await?;
                debug!("Step '{}' skipped", step.node_id);
            }

            if runnable.is_empty() {
                break;
            }

            batch_number += 1;
            let snapshot = output_snapshot(&steps);
            let mut batch: Vec<(StepRecord, ContextBinding)> = runnable
                .iter()
                .map(|&i| (steps[i].clone(), bind_context(&steps, &steps[i])))
                .collect();
            for (_, binding) in batch.iter_mut() {
                pool.pin_fork(binding).await;
            }

            info!(
                "Run '{}' batch {}: {}",
                run.id,
                batch_number,
                batch
                    .iter()
                    .map(|(s, _)| s.node_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            let shared: &Run = run;
            let results = join_all(
                batch
                    .into_iter()
                    .map(|(step, binding)| self.execute_step(shared, step, binding, &snapshot, pool)),
            )
            .await;

            let mut executed = Vec::with_capacity(results.len());
            for result in results {
                executed.push(result?);
            }

            let mut failed = false;
            let mut paused = false;
            for done in &executed {
                match done.step.status {
                    StepStatus::Completed => run.credits_consumed += done.step.consumed,
                    StepStatus::Failed => failed = true,
                    StepStatus::Waiting => paused = true,
                    _ => {}
                }
            }

            if failed {
                return self.fail_run(run).await;
            }

            self.apply_spawns(run, &executed).await?;
            self.expand_loops(run, &executed).await?;
            self.collect_loop_results(run, &executed).await?;

            if paused {
                run.status = RunStatus::Waiting;
                self.store.save_run(run).await?;
                info!("Run '{}' is waiting for user action", run.id);
                return Ok(());
            }

            self.store.save_run(run).await?;
        }

        run.finish(RunStatus::Completed);
        self.store.save_run(run).await?;
        info!(
            "Run '{}' completed ({} credits consumed)",
            run.id, run.credits_consumed
        );
        Ok(())
    }

    async fn execute_step(
        &self,
        run: &Run,
        mut step: StepRecord,
        binding: ContextBinding,
        snapshot: &OutputSnapshot,
        pool: &DriverPool,
    ) -> Result<Executed, EngineError> {
        step.mark_running();
        step.context_key = Some(binding.key.clone());
        step.log(LogLevel::Info, format!("Running {} step", step.node_type));
        self.store.save_step(&step).await?;

        let Some(handler) = self.registry.get(&step.node_type) else {
            let message = format!("Handler not found for node type '{}'", step.node_type);
            warn!("Step '{}': {}", step.node_id, message);
            step.reserved = 0;
            step.log(LogLevel::Error, message.clone());
            step.fail(message);
            self.store.save_step(&step).await?;
            return Ok(Executed::finished(step));
        };

        let amount = step.reserved;
        if !self.ledger.reserve(&run.user_id, amount).await? {
            let message = format!("Insufficient credits: step requires {}", amount);
            warn!("Step '{}': {}", step.node_id, message);
            step.reserved = 0;
            step.log(LogLevel::Error, message.clone());
            step.fail(message);
            self.store.save_step(&step).await?;
            return Ok(Executed::finished(step));
        }
        step.log(LogLevel::Info, format!("Reserved {} credits", amount));

        step.resolved_inputs = resolve_inputs(
            &step.inputs,
            run.graph.incoming_edges(step.graph_node_id()),
            snapshot,
        );
        let rendered = serde_json::to_string(&step.resolved_inputs).unwrap_or_default();
        step.log(LogLevel::Info, format!("Resolved inputs: {}", rendered));
        self.store.save_step(&step).await?;

        let identity = StepIdentity {
            run_id: &run.id,
            step_id: &step.id,
            node_id: &step.node_id,
            user_id: &run.user_id,
        };
        let mut ctx = StepContext::new(
            identity,
            &step.resolved_inputs,
            &step.dependencies,
            snapshot,
            step.resume_count,
            pool,
            binding,
            &self.costs,
            &self.config,
        );

        let outcome = match AssertUnwindSafe(handler.execute(&mut ctx))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => StepOutcome::Failure(format!(
                "Handler panicked: {}",
                panic_message(panic.as_ref())
            )),
        };
        let effects = ctx.into_effects();
        step.logs.extend(effects.logs);

        let mut spawns = Vec::new();
        match outcome {
            StepOutcome::Success(returned) => {
                let mut outputs = effects.outputs;
                outputs.extend(returned);
                step.log(
                    LogLevel::Info,
                    format!("Completed ({} credits consumed)", amount),
                );
                step.complete(outputs);
                spawns = effects.spawns;
                debug!("Step '{}' completed", step.node_id);
            }
            StepOutcome::Failure(message) => {
                self.ledger.refund(&run.user_id, amount).await?;
                step.log(LogLevel::Error, format!("Failed: {}", message));
                step.log(LogLevel::Info, format!("Refunded {} credits", amount));
                warn!("Step '{}' failed: {}", step.node_id, message);
                step.fail(message);
            }
            StepOutcome::Pause(reason) => {
                step.log(LogLevel::Warn, format!("Paused: {}", reason.message));
                info!("Step '{}' paused: {}", step.node_id, reason.message);
                step.pause(reason);
            }
        }

        self.store.save_step(&step).await?;
        Ok(Executed { step, spawns })
    }

    /// Ends the run as FAILED, refunding reservations still held by paused
    /// steps.
    async fn fail_run(&self, run: &mut Run) -> Result<(), EngineError> {
        let waiting: Vec<StepRecord> = self
            .store
            .load_steps(&run.id)
            .await?
            .into_iter()
            .filter(|s| s.status == StepStatus::Waiting)
            .collect();

        for mut step in waiting {
            self.ledger.refund(&run.user_id, step.reserved).await?;
            step.log(
                LogLevel::Info,
                format!("Refunded {} credits held while waiting", step.reserved),
            );
            step.pause_reason = None;
            step.fail("Run failed while this step was waiting");
            self.store.save_step(&step).await?;
        }

        run.finish(RunStatus::Failed);
        self.store.save_run(run).await?;
        warn!("Run '{}' failed", run.id);
        Ok(())
    }

    async fn apply_spawns(&self, run: &Run, executed: &[Executed]) -> Result<(), EngineError> {
        for done in executed {
            for request in &done.spawns {
                let node_id = format!("runtime_{}", Uuid::new_v4().simple());
                let mut step = StepRecord::new(&run.id, &node_id, &request.node_type)
                    .with_inputs(request.inputs.clone())
                    .with_dependencies(request.dependencies.clone())
                    .with_reserved(self.costs.cost_or_zero(&request.node_type));
                step.log(
                    LogLevel::Info,
                    format!("Spawned by '{}'", done.step.node_id),
                );
                self.store.save_step(&step).await?;
                debug!(
                    "Step '{}' spawned {} '{}'",
                    done.step.node_id, request.node_type, node_id
                );
            }
        }
        Ok(())
    }

    /// Turns the loop body of every FOREACH completed in the batch into one
    /// step per item plus a join step.
    async fn expand_loops(&self, run: &Run, executed: &[Executed]) -> Result<(), EngineError> {
        let loops = executed
            .iter()
            .map(|d| &d.step)
            .filter(|s| s.status == StepStatus::Completed && s.node_type == FOREACH);

        for parent in loops {
            let items: Vec<Value> = match parent
                .outputs
                .get("_items")
                .map(|raw| serde_json::from_str(raw))
            {
                Some(Ok(items)) => items,
                Some(Err(e)) => {
                    warn!("FOREACH '{}' produced unreadable items: {}", parent.node_id, e);
                    continue;
                }
                None => continue,
            };
            let variable = parent
                .outputs
                .get("_itemVariable")
                .cloned()
                .unwrap_or_default();
            let placeholder = format!("{{{}}}", variable);

            let templates: Vec<StepRecord> = self
                .store
                .load_steps(&run.id)
                .await?
                .into_iter()
                .filter(|s| {
                    s.status == StepStatus::Pending
                        && s.template.is_none()
                        && s.loop_parent.is_none()
                        && s.node_type != CONDITION
                        && s.dependencies.contains(&parent.node_id)
                })
                .collect();

            for mut template in templates {
                let mut child_ids = Vec::with_capacity(items.len());

                for (index, item) in items.iter().enumerate() {
                    let value = match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    let mut inputs: HashMap<String, String> = template
                        .inputs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.replace(&placeholder, &value)))
                        .collect();
                    inputs.insert(variable.clone(), value);

                    let child_id = format!("{}#{}", template.node_id, index);
                    let mut child = StepRecord::new(&run.id, &child_id, &template.node_type)
                        .with_inputs(inputs)
                        .with_dependencies(template.dependencies.clone())
                        .with_edge_conditions(template.edge_conditions.clone())
                        .with_reserved(self.costs.cost_or_zero(&template.node_type));
                    child.template = Some(template.node_id.clone());
                    child.log(
                        LogLevel::Info,
                        format!("Iteration {} of '{}'", index, parent.node_id),
                    );
                    self.store.save_step(&child).await?;
                    child_ids.push(child_id);
                }

                template.log(
                    LogLevel::Info,
                    format!(
                        "Expanded into {} iterations of {}",
                        child_ids.len(),
                        template.node_type
                    ),
                );
                template.node_type = FOREACH_JOIN.to_string();
                template.dependencies = child_ids;
                template.edge_conditions.clear();
                template.reserved = self.costs.cost_or_zero(FOREACH_JOIN);
                template.loop_parent = Some(parent.node_id.clone());
                self.store.save_step(&template).await?;

                info!(
                    "FOREACH '{}' expanded '{}' over {} items",
                    parent.node_id,
                    template.node_id,
                    items.len()
                );
            }
        }
        Ok(())
    }

    /// Copies `results` and `count` of finished joins onto their FOREACH step.
    async fn collect_loop_results(
        &self,
        run: &Run,
        executed: &[Executed],
    ) -> Result<(), EngineError> {
        let joins = executed
            .iter()
            .map(|d| &d.step)
            .filter(|s| s.status == StepStatus::Completed);

        for join in joins {
            let Some(parent_id) = &join.loop_parent else {
                continue;
            };
            let parent = self
                .store
                .load_steps(&run.id)
                .await?
                .into_iter()
                .find(|s| &s.node_id == parent_id);

            if let Some(mut parent) = parent {
                for key in ["results", "count"] {
                    if let Some(value) = join.outputs.get(key) {
                        parent.outputs.insert(key.to_string(), value.clone());
                    }
                }
                parent.log(
                    LogLevel::Info,
                    format!("Collected results from '{}'", join.node_id),
                );
                self.store.save_step(&parent).await?;
            }
        }
        Ok(())
    }

    async fn summarize(&self, run: &Run) -> Result<RunSummary, EngineError> {
        let steps = self.store.load_steps(&run.id).await?;
        let mut step_counts = BTreeMap::new();
        for step in &steps {
            *step_counts.entry(step.status).or_insert(0) += 1;
        }

        Ok(RunSummary {
            run_id: run.id.clone(),
            status: run.status,
            credits_consumed: run.credits_consumed,
            step_counts,
            timeline: ExecutionTimeline::from_steps(&steps),
        })
    }

    async fn pool_for(&self, run_id: &str) -> Arc<DriverPool> {
        let mut pools = self.pools.lock().await;
        let pool = pools
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(DriverPool::new(self.driver_factory.clone())));
        Arc::clone(pool)
    }

    async fn release_pool(&self, run_id: &str) {
        let pool = self.pools.lock().await.remove(run_id);
        if let Some(pool) = pool {
            pool.close_all().await;
        }
    }
}

/// Splits PENDING steps into runnable ones and ones to skip.
fn plan_batch(steps: &[StepRecord]) -> (Vec<usize>, Vec<(usize, String, BranchLabel)>) {
    let by_node: HashMap<&str, &StepRecord> =
        steps.iter().map(|s| (s.node_id.as_str(), s)).collect();

    let mut runnable = Vec::new();
    let mut skipped = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        if step.status != StepStatus::Pending {
            continue;
        }
        match readiness(step, &by_node) {
            Readiness::Ready => runnable.push(index),
            Readiness::Skip {
                dependency,
                expected,
            } => skipped.push((index, dependency, expected)),
            Readiness::Blocked => {}
        }
    }

    (runnable, skipped)
}

fn readiness(step: &StepRecord, by_node: &HashMap<&str, &StepRecord>) -> Readiness {
    for dep in &step.dependencies {
        match by_node.get(dep.as_str()) {
            Some(d) if d.status == StepStatus::Completed => {}
            _ => return Readiness::Blocked,
        }
    }

    for (dep, label) in &step.edge_conditions {
        if !step.dependencies.contains(dep) {
            continue;
        }
        if let Some(d) = by_node.get(dep.as_str()) {
            let result = d.outputs.get("result").map(String::as_str);
            if d.node_type == CONDITION && !label.matches(result) {
                return Readiness::Skip {
                    dependency: dep.clone(),
                    expected: *label,
                };
            }
        }
    }

    Readiness::Ready
}

fn output_snapshot(steps: &[StepRecord]) -> OutputSnapshot {
    steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .map(|s| (s.node_id.clone(), s.outputs.clone()))
        .collect()
}

/// Picks the driver context for a step.
///
/// The first step (in creation order) that lists a node as its first
/// dependency continues in that node's context. Any other step starting
/// from the same node forks a context of its own.
fn bind_context(steps: &[StepRecord], step: &StepRecord) -> ContextBinding {
    let Some(first) = step.dependencies.first() else {
        return ContextBinding::own(&step.node_id);
    };

    let parent_key = steps
        .iter()
        .find(|s| &s.node_id == first)
        .and_then(|p| p.context_key.clone())
        .unwrap_or_else(|| first.clone());

    let is_primary = steps
        .iter()
        .find(|s| s.dependencies.first() == Some(first))
        .is_some_and(|primary| primary.id == step.id);

    if is_primary {
        ContextBinding::own(parent_key)
    } else {
        ContextBinding::fork(&step.node_id, parent_key)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
