use crate::error::ContextError;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use model::{
    core::identifiers::{JobId, TaskId},
    position::Position,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Preparing,
    Running,
    Finished,
    Stopped,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Preparing => "PREPARING",
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Stopped => "STOPPED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Stopped | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task slot of a job item that at most one live task may hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskSlot {
    Incremental,
    Inventory(TaskId),
}

/// Proof of one successful [`JobItemContext::claim`]; only the claim it
/// came from can release the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClaim(u64);

#[derive(Debug, Clone)]
pub struct JobItemError {
    pub task_id: Option<TaskId>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Runtime state of one sharding item of a job.
///
/// Shared between the tasks of the item and whoever reports on the job;
/// every field is readable concurrently while tasks update it.
pub struct JobItemContext {
    job_id: JobId,
    sharding_item: u32,
    status: watch::Sender<JobStatus>,
    incremental_progress: watch::Sender<Position>,
    inventory_progress: DashMap<TaskId, Position>,
    last_error: watch::Sender<Option<JobItemError>>,
    progress_changes: watch::Sender<u64>,
    holders: DashMap<TaskSlot, (SlotClaim, TaskId)>,
    next_claim: AtomicU64,
}

impl JobItemContext {
    pub fn new(job_id: JobId, sharding_item: u32) -> Self {
        Self {
            job_id,
            sharding_item,
            status: watch::channel(JobStatus::Preparing).0,
            incremental_progress: watch::channel(Position::Placeholder).0,
            inventory_progress: DashMap::new(),
            last_error: watch::channel(None).0,
            progress_changes: watch::channel(0).0,
            holders: DashMap::new(),
            next_claim: AtomicU64::new(1),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn sharding_item(&self) -> u32 {
        self.sharding_item
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    /// Moves to `status`. A terminal status is only left for `Preparing`, on restart.
    pub fn set_status(&self, status: JobStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status
                || (current.is_terminal() && status != JobStatus::Preparing)
            {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            info!(
                job_id = %self.job_id,
                sharding_item = self.sharding_item,
                status = %status,
                "Job item status changed"
            );
        }
    }

    /// Takes `slot` for `task_id`. Fails while the slot is held, even by
    /// another task instance with the same id.
    pub fn claim(&self, slot: TaskSlot, task_id: &TaskId) -> Result<SlotClaim, ContextError> {
        match self.holders.entry(slot) {
            Entry::Occupied(holder) => Err(ContextError::AlreadyClaimed {
                job_id: self.job_id.to_string(),
                sharding_item: self.sharding_item,
                holder: holder.get().1.to_string(),
            }),
            Entry::Vacant(vacant) => {
                let claim = SlotClaim(self.next_claim.fetch_add(1, Ordering::Relaxed));
                vacant.insert((claim, task_id.clone()));
                Ok(claim)
            }
        }
    }

    /// Gives `slot` back if it is still held under `claim`.
    pub fn release(&self, slot: &TaskSlot, claim: SlotClaim) {
        if let Some((_, (_, task_id))) = self
            .holders
            .remove_if(slot, |_, (holder, _)| *holder == claim)
        {
            debug!(job_id = %self.job_id, task_id = %task_id, "Released job item slot");
        }
    }

    pub fn holder(&self, slot: &TaskSlot) -> Option<TaskId> {
        self.holders.get(slot).map(|h| h.value().1.clone())
    }

    /// Bumped on every progress change, incremental or inventory.
    pub fn subscribe_progress_changes(&self) -> watch::Receiver<u64> {
        self.progress_changes.subscribe()
    }

    fn progress_changed(&self) {
        self.progress_changes.send_modify(|version| *version += 1);
    }

    pub fn incremental_progress(&self) -> Position {
        self.incremental_progress.borrow().clone()
    }

    pub fn subscribe_incremental_progress(&self) -> watch::Receiver<Position> {
        self.incremental_progress.subscribe()
    }

    /// Records `position` if it moves incremental progress forward; stale or
    /// incomparable positions are ignored.
    pub fn advance_incremental_progress(&self, position: Position) -> bool {
        let advanced = self.incremental_progress.send_if_modified(|current| {
            if *current != position && position.advances(current) {
                *current = position;
                true
            } else {
                false
            }
        });
        if advanced {
            self.progress_changed();
        }
        advanced
    }

    /// Resets incremental progress for a resumed task.
    pub fn restore_incremental_progress(&self, position: Position) {
        self.incremental_progress.send_replace(position);
        self.progress_changed();
    }

    pub fn inventory_progress(&self, task_id: &TaskId) -> Option<Position> {
        self.inventory_progress.get(task_id).map(|p| p.value().clone())
    }

    /// Snapshot of every inventory task's progress.
    pub fn inventory_progresses(&self) -> Vec<(TaskId, Position)> {
        let mut all: Vec<_> = self
            .inventory_progress
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn advance_inventory_progress(&self, task_id: &TaskId, position: Position) -> bool {
        let advanced = match self.inventory_progress.entry(task_id.clone()) {
            Entry::Occupied(mut current) => {
                if *current.get() != position && position.advances(current.get()) {
                    current.insert(position);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(position);
                true
            }
        };
        if advanced {
            self.progress_changed();
        }
        advanced
    }

    pub fn is_inventory_finished(&self) -> bool {
        self.inventory_progress.iter().all(|p| p.value().is_finished())
    }

    pub fn last_error(&self) -> Option<JobItemError> {
        self.last_error.borrow().clone()
    }

    /// Records a task failure and marks the item `Failed`.
    pub fn record_failure(&self, task_id: Option<&TaskId>, message: impl Into<String>) {
        let error = JobItemError {
            task_id: task_id.cloned(),
            message: message.into(),
            at: Utc::now(),
        };
        error!(
            job_id = %self.job_id,
            sharding_item = self.sharding_item,
            task_id = ?error.task_id,
            error = %error.message,
            "Job item failed"
        );
        self.last_error.send_replace(Some(error));
        self.set_status(JobStatus::Failed);
    }
}
