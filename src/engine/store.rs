//! Run Persistence
//!
//! Storage collaborator for run and step records. State is rewritten after
//! every transition so a WAITING run survives a process restart.
//!
//! - [`MemoryStore`]: in-process maps, for tests and embedding
//! - [`JsonFileStore`]: one JSON document per run under `<state_dir>/runs/`

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

use super::state::{Run, StepRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_run(&self, run: &Run) -> Result<(), StoreError>;

    async fn load_run(&self, run_id: &str) -> Result<Run, StoreError>;

    /// Inserts the step, or replaces the record with the same step ID.
    async fn save_step(&self, step: &StepRecord) -> Result<(), StoreError>;

    /// Steps of a run in creation order.
    async fn load_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, StoreError>;
}

fn upsert(steps: &mut Vec<StepRecord>, step: &StepRecord) {
    match steps.iter_mut().find(|s| s.id == step.id) {
        Some(existing) => *existing = step.clone(),
        None => steps.push(step.clone()),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<String, Run>>,
    steps: Mutex<HashMap<String, Vec<StepRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.lock().await.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Run, StoreError> {
        self.runs
            .lock()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
    }

    async fn save_step(&self, step: &StepRecord) -> Result<(), StoreError> {
        if !self.runs.lock().await.contains_key(&step.run_id) {
            return Err(StoreError::RunNotFound(step.run_id.clone()));
        }
        let mut steps = self.steps.lock().await;
        upsert(steps.entry(step.run_id.clone()).or_default(), step);
        Ok(())
    }

    async fn load_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        if !self.runs.lock().await.contains_key(run_id) {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        Ok(self
            .steps
            .lock()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// On-disk layout of one run.
#[derive(Serialize, Deserialize)]
struct RunDocument {
    run: Run,
    steps: Vec<StepRecord>,
}

/// File-backed store writing `<dir>/<run id>.json`.
///
/// Writes go through a temporary file and a rename, and are serialized by a
/// lock because steps of the same batch finish concurrently.
pub struct JsonFileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    async fn read_document(&self, run_id: &str) -> Result<RunDocument, StoreError> {
        let content = match fs::read_to_string(self.run_path(run_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::RunNotFound(run_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_document(&self, doc: &RunDocument) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.run_path(&doc.run.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(doc)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Saved run state to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl RunStore for JsonFileStore {
    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let steps = match self.read_document(&run.id).await {
            Ok(doc) => doc.steps,
            Err(StoreError::RunNotFound(_)) => {
                info!("Creating run state file for {}", run.id);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        self.write_document(&RunDocument {
            run: run.clone(),
            steps,
        })
        .await
    }

    async fn load_run(&self, run_id: &str) -> Result<Run, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document(run_id).await?.run)
    }

    async fn save_step(&self, step: &StepRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document(&step.run_id).await?;
        upsert(&mut doc.steps, step);
        self.write_document(&doc).await
    }

    async fn load_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document(run_id).await?.steps)
    }
}
