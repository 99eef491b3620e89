//! Run and Step State
//!
//! Persistent records for one execution of a graph. The scheduler is the
//! only writer; the owning application reads them for display.
//!
//! Step state machine:
//!
//! ```text
//! PENDING -> RUNNING -> COMPLETED | FAILED | WAITING
//! WAITING -> PENDING            (resume)
//! PENDING -> SKIPPED            (branch not taken)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::graph::{BranchLabel, GraphDefinition};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
}

impl RunStatus {
    /// Completed and failed runs are never touched again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Waiting => "WAITING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Waiting,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Waiting => "WAITING",
            StepStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseKind {
    ApprovalRequired,
    ManualIntervention,
    ExternalDependency,
}

/// Why a step is waiting for a human.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PauseReason {
    #[serde(rename = "type")]
    pub kind: PauseKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl PauseReason {
    pub fn new(kind: PauseKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Page URL the step paused on, if one was recorded.
    pub fn page_url(&self) -> Option<&str> {
        ["url", "pageUrl"]
            .iter()
            .find_map(|key| self.metadata.get(*key).and_then(Value::as_str))
            .filter(|url| !url.is_empty())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub message: String,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }
}

/// One execution of a graph snapshot.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Run {
    pub id: String,
    pub user_id: String,
    pub status: RunStatus,
    /// Snapshot taken when the run was created
    pub graph: GraphDefinition,
    pub credits_consumed: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(user_id: impl Into<String>, graph: GraphDefinition) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            status: RunStatus::Pending,
            graph,
            credits_consumed: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Moves the run to a terminal status and stamps the completion time.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// One node instance within a run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StepRecord {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub node_type: String,
    pub status: StepStatus,

    /// Node IDs that must complete first
    pub dependencies: Vec<String>,

    /// Branch labels required from CONDITION dependencies
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub edge_conditions: BTreeMap<String, BranchLabel>,

    /// Declared inputs as written in the graph
    pub inputs: HashMap<String, String>,

    /// Inputs after edge and parameter substitution
    #[serde(default)]
    pub resolved_inputs: HashMap<String, String>,

    #[serde(default)]
    pub outputs: HashMap<String, String>,

    /// Units held by the ledger for the current attempt
    pub reserved: u64,
    pub consumed: u64,

    pub error: Option<String>,
    pub pause_reason: Option<PauseReason>,

    #[serde(default)]
    pub logs: Vec<LogEntry>,

    /// Driver context this step runs in
    pub context_key: Option<String>,

    /// Number of times this step was resumed from WAITING
    #[serde(default)]
    pub resume_count: u32,

    /// Graph node an iteration step was expanded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// FOREACH node a join step collects results for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_parent: Option<String>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn new(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        node_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            node_id: node_id.into(),
            node_type: node_type.into(),
            status: StepStatus::Pending,
            dependencies: Vec::new(),
            edge_conditions: BTreeMap::new(),
            inputs: HashMap::new(),
            resolved_inputs: HashMap::new(),
            outputs: HashMap::new(),
            reserved: 0,
            consumed: 0,
            error: None,
            pause_reason: None,
            logs: Vec::new(),
            context_key: None,
            resume_count: 0,
            template: None,
            loop_parent: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_inputs(mut self, inputs: HashMap<String, String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_edge_conditions(mut self, conditions: BTreeMap<String, BranchLabel>) -> Self {
        self.edge_conditions = conditions;
        self
    }

    pub fn with_reserved(mut self, units: u64) -> Self {
        self.reserved = units;
        self
    }

    /// Graph node whose edges feed this step.
    pub fn graph_node_id(&self) -> &str {
        self.template.as_deref().unwrap_or(&self.node_id)
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry::new(level, message));
    }

    pub fn mark_running(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        self.error = None;
    }

    pub fn complete(&mut self, outputs: HashMap<String, String>) {
        self.status = StepStatus::Completed;
        self.outputs = outputs;
        self.consumed = self.reserved;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.consumed = 0;
        self.completed_at = Some(Utc::now());
    }

    pub fn pause(&mut self, reason: PauseReason) {
        self.status = StepStatus::Waiting;
        self.pause_reason = Some(reason);
        self.consumed = 0;
    }

    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    /// WAITING -> PENDING. The held reservation must already be refunded.
    pub fn reset_for_resume(&mut self) {
        self.status = StepStatus::Pending;
        self.pause_reason = None;
        self.resume_count += 1;
    }
}
