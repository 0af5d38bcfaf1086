//! Checkpoint persistence for paused runs
//!
//! A checkpoint holds the run state and the step to continue from.
//! Currently in-memory; the trait leaves room for a durable backend.

use crate::error::WorkflowError;
use crate::state::{RunState, StateUpdate};
use crate::steps::StepName;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Snapshot of a paused run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub state: RunState,
    /// Step that runs first on resume.
    pub next_step: StepName,
    /// Step after which the run paused.
    pub paused_after: StepName,
    pub external_updates: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        run_id: impl Into<String>,
        state: RunState,
        paused_after: StepName,
        next_step: StepName,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            state,
            next_step,
            paused_after,
            external_updates: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Trait for checkpoint persistence, keyed by run id.
///
/// Each call is atomic per run: no caller observes a checkpoint mid-update.
/// A run id is held from [`CheckpointStore::reserve`] until it is discarded;
/// while the run is being driven it has no visible checkpoint.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Claim a fresh run id. Fails with `RunAlreadyExists` if it is taken.
    async fn reserve(&self, run_id: &str) -> Result<()>;
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;
    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>>;
    /// Merge an external update into the stored state.
    async fn apply_update(&self, run_id: &str, update: StateUpdate) -> Result<Checkpoint>;
    /// Hand the checkpoint to exactly one resumer; the id stays reserved.
    async fn take(&self, run_id: &str) -> Result<Option<Checkpoint>>;
    /// Release the run id and drop any checkpoint.
    async fn discard(&self, run_id: &str) -> Result<bool>;
    async fn contains(&self, run_id: &str) -> Result<bool>;
}

enum Slot {
    Running,
    Paused(Checkpoint),
}

/// In-memory checkpoint store
pub struct InMemoryCheckpointStore {
    runs: Arc<RwLock<HashMap<String, Slot>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of paused runs.
    pub async fn len(&self) -> usize {
        self.runs
            .read()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Paused(_)))
            .count()
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn reserve(&self, run_id: &str) -> Result<()> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(run_id) {
            return Err(WorkflowError::RunAlreadyExists(run_id.to_string()));
        }
        runs.insert(run_id.to_string(), Slot::Running);
        Ok(())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.insert(checkpoint.run_id.clone(), Slot::Paused(checkpoint));
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let runs = self.runs.read().await;
        match runs.get(run_id) {
            Some(Slot::Paused(checkpoint)) => Ok(Some(checkpoint.clone())),
            _ => Ok(None),
        }
    }

    async fn apply_update(&self, run_id: &str, update: StateUpdate) -> Result<Checkpoint> {
        let mut runs = self.runs.write().await;

        let Some(Slot::Paused(checkpoint)) = runs.get_mut(run_id) else {
            return Err(WorkflowError::CheckpointNotFound(run_id.to_string()));
        };

        checkpoint.state.check_external(&update)?;

        let state = std::mem::take(&mut checkpoint.state);
        checkpoint.state = state.merge(update);
        checkpoint.external_updates += 1;
        checkpoint.updated_at = Utc::now();

        Ok(checkpoint.clone())
    }

    async fn take(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let mut runs = self.runs.write().await;
        match runs.remove(run_id) {
            Some(Slot::Paused(checkpoint)) => {
                runs.insert(run_id.to_string(), Slot::Running);
                Ok(Some(checkpoint))
            }
            Some(Slot::Running) => {
                runs.insert(run_id.to_string(), Slot::Running);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn discard(&self, run_id: &str) -> Result<bool> {
        let mut runs = self.runs.write().await;
        Ok(runs.remove(run_id).is_some())
    }

    async fn contains(&self, run_id: &str) -> Result<bool> {
        let runs = self.runs.read().await;
        Ok(runs.contains_key(run_id))
    }
}
