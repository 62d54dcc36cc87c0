//! Progress board: the read side pollers see.
//!
//! Every task is held in its own `watch` channel. The task's driver is the
//! only writer and commits whole snapshots through `send_modify`, so readers
//! always clone a consistent task and never wait on a running harness.
//!
//! Finished tasks are kept up to a retention limit; past it the oldest
//! finished ones are dropped from the board.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::watch;
use tracing::debug;

use crate::task::{Task, TaskProjection};
use crate::types::{Status, TaskId};

/// Finished tasks a board keeps unless told otherwise.
pub const DEFAULT_RETAINED_TASKS: usize = 1_000;

/// Latest committed snapshot of every task.
pub struct TaskBoard {
    tasks: RwLock<Tasks>,
    retained: usize,
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_TASKS)
    }
}

#[derive(Default)]
struct Tasks {
    by_id: HashMap<TaskId, watch::Sender<Task>>,
    /// Ids in submission order.
    order: Vec<TaskId>,
}

impl Tasks {
    fn get(&self, id: &TaskId) -> Option<&watch::Sender<Task>> {
        self.by_id.get(id)
    }

    fn newest_first(&self) -> impl Iterator<Item = &watch::Sender<Task>> {
        self.order.iter().rev().filter_map(|id| self.by_id.get(id))
    }

    /// Drop the oldest finished tasks until at most `keep` remain.
    fn evict_finished(&mut self, keep: usize) -> usize {
        let finished: Vec<TaskId> = self
            .order
            .iter()
            .filter(|id| {
                self.by_id
                    .get(*id)
                    .is_some_and(|tx| tx.borrow().status.is_terminal())
            })
            .copied()
            .collect();
        let excess = finished.len().saturating_sub(keep);
        if excess == 0 {
            return 0;
        }
        let evicted = &finished[..excess];
        for id in evicted {
            self.by_id.remove(id);
        }
        self.order.retain(|id| self.by_id.contains_key(id));
        excess
    }
}

impl TaskBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A board that keeps at most `retained` finished tasks.
    #[must_use]
    pub fn with_retention(retained: usize) -> Self {
        Self {
            tasks: RwLock::new(Tasks::default()),
            retained,
        }
    }

    pub fn insert(&self, task: Task) {
        let id = task.id;
        let (tx, _) = watch::channel(task);
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if tasks.by_id.insert(id, tx).is_none() {
            tasks.order.push(id);
        }
    }

    /// Apply `f` to a task and publish the result.
    ///
    /// Returns the committed snapshot, or `None` for an unknown id.
    ///
    /// A task that becomes terminal may push the oldest finished tasks off
    /// the board. Live subscribers of an evicted task see its sender close.
    pub fn update(&self, id: TaskId, f: impl FnOnce(&mut Task)) -> Option<Task> {
        let (snapshot, was_terminal) = {
            let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
            let tx = tasks.get(&id)?;
            let was_terminal = tx.borrow().status.is_terminal();
            tx.send_modify(f);
            (tx.borrow().clone(), was_terminal)
        };
        if snapshot.status.is_terminal() && !was_terminal {
            let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
            let evicted = tasks.evict_finished(self.retained);
            if evicted > 0 {
                debug!(evicted, retained = self.retained, "evicted finished tasks");
            }
        }
        Some(snapshot)
    }

    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Task> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        tasks.get(&id).map(|tx| tx.borrow().clone())
    }

    /// Every task, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<Task> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        tasks.newest_first().map(|tx| tx.borrow().clone()).collect()
    }

    /// Projections of every task, newest first.
    #[must_use]
    pub fn projections(&self) -> Vec<TaskProjection> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        tasks
            .newest_first()
            .map(|tx| tx.borrow().projection())
            .collect()
    }

    /// Receive every future snapshot of a task.
    #[must_use]
    pub fn subscribe(&self, id: TaskId) -> Option<watch::Receiver<Task>> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        tasks.get(&id).map(watch::Sender::subscribe)
    }

    /// Number of tasks in each status.
    #[must_use]
    pub fn counts(&self) -> TaskCounts {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = TaskCounts::default();
        for tx in tasks.by_id.values() {
            match tx.borrow().status {
                Status::Pending => counts.pending += 1,
                Status::Running => counts.running += 1,
                Status::Completed => counts.completed += 1,
                Status::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Task totals by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed
    }
}
