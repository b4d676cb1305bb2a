//! In-memory registry of download tasks
//!
//! The registry is the only owner of task state. The number of active tasks
//! and the backlog are both read off task statuses, so they can never drift
//! from what the tasks themselves say.

use chrono::Utc;
use std::collections::VecDeque;
use tracing::debug;

use super::task::{DownloadTask, Outcome, TaskId, TaskStatus};
use crate::backend::{JobId, SongRef};

/// Why a registry mutation was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("task {0} is not in the registry")]
    UnknownTask(TaskId),
    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Bounded, insertion-ordered collection of tasks
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: VecDeque<DownloadTask>,
    capacity: usize,
    next_order: u64,
}

impl TaskRegistry {
    /// Create a registry keeping roughly the `capacity` most recent tasks
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            capacity: capacity.max(1),
            next_order: 1,
        }
    }

    /// Add a new task in the given initial status
    pub fn insert(&mut self, song: SongRef, status: TaskStatus) -> &DownloadTask {
        let order = self.next_order;
        self.next_order += 1;

        self.tasks
            .push_back(DownloadTask::new(TaskId(order), song, status, order));
        self.evict_overflow();

        // Eviction never removes non-terminal tasks, so the new task is still last
        &self.tasks[self.tasks.len() - 1]
    }

    pub fn get(&self, id: TaskId) -> Option<&DownloadTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: TaskId) -> Result<&mut DownloadTask, RegistryError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(RegistryError::UnknownTask(id))
    }

    /// Number of tasks holding a concurrency slot
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.status.is_active()).count()
    }

    /// Number of tasks that have not reached a terminal state
    pub fn unfinished_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_terminal()).count()
    }

    /// Oldest task waiting in the backlog
    pub fn next_queued(&self) -> Option<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .min_by_key(|t| t.created_order)
            .map(|t| t.id)
    }

    pub fn has_backlog(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Queued)
    }

    /// Move a task to a new non-terminal status
    pub fn transition(
        &mut self,
        id: TaskId,
        status: TaskStatus,
    ) -> Result<&DownloadTask, RegistryError> {
        debug_assert!(!status.is_terminal(), "use complete() for terminal states");
        let task = self.get_mut(id)?;
        if !task.status.can_transition_to(status) {
            return Err(RegistryError::InvalidTransition {
                id,
                from: task.status,
                to: status,
            });
        }
        task.status = status;
        Ok(&*task)
    }

    /// Record the server job backing a task
    pub fn set_job(&mut self, id: TaskId, job: JobId) -> Result<&DownloadTask, RegistryError> {
        let task = self.get_mut(id)?;
        task.job_id = Some(job);
        Ok(&*task)
    }

    /// Mark a task as downloading with the given progress
    pub fn set_progress(
        &mut self,
        id: TaskId,
        percent: u8,
    ) -> Result<&DownloadTask, RegistryError> {
        let task = self.get_mut(id)?;
        if !task.status.can_transition_to(TaskStatus::Downloading) {
            return Err(RegistryError::InvalidTransition {
                id,
                from: task.status,
                to: TaskStatus::Downloading,
            });
        }
        task.status = TaskStatus::Downloading;
        task.progress_percent = percent.min(100);
        Ok(&*task)
    }

    /// Move a task to a terminal state
    ///
    /// Returns an error if the task is unknown or already terminal, which is
    /// how callers guarantee each task finishes exactly once.
    pub fn complete(
        &mut self,
        id: TaskId,
        outcome: Outcome,
    ) -> Result<DownloadTask, RegistryError> {
        let task = self.get_mut(id)?;
        let status = outcome.status();
        if !task.status.can_transition_to(status) {
            return Err(RegistryError::InvalidTransition {
                id,
                from: task.status,
                to: status,
            });
        }

        task.status = status;
        task.finished_at = Some(Utc::now());
        match outcome {
            Outcome::Success => task.progress_percent = 100,
            Outcome::Failed(message) => task.message = Some(message),
        }
        let finished = task.clone();

        self.evict_overflow();
        Ok(finished)
    }

    /// Drop the oldest terminal tasks while over capacity
    ///
    /// Non-terminal tasks are never evicted; if all excess tasks are still
    /// running the registry stays above capacity until they finish.
    fn evict_overflow(&mut self) {
        while self.tasks.len() > self.capacity {
            let Some(pos) = self.tasks.iter().position(|t| t.is_terminal()) else {
                break;
            };
            if let Some(evicted) = self.tasks.remove(pos) {
                debug!("Evicted finished task {} ({})", evicted.id, evicted.status);
            }
        }
    }

    /// All tasks in display order
    ///
    /// Active work first, then the backlog, then finished tasks; insertion
    /// order within the same status.
    pub fn snapshot(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> = self.tasks.iter().cloned().collect();
        tasks.sort_by_key(|t| (t.status.display_rank(), t.created_order));
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Source;

    fn song(n: u32) -> SongRef {
        SongRef {
            remote_id: n.to_string(),
            source: Source::Netease,
            title: format!("Song {}", n),
            artist: "Artist".into(),
            album: String::new(),
            duration_seconds: 200,
            is_premium_only: false,
            cover_url: None,
        }
    }

    fn finish(registry: &mut TaskRegistry, id: TaskId, outcome: Outcome) {
        registry.transition(id, TaskStatus::Preparing).unwrap();
        registry.complete(id, outcome).unwrap();
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut registry = TaskRegistry::new(10);
        let a = registry.insert(song(1), TaskStatus::Pending).id;
        let b = registry.insert(song(2), TaskStatus::Queued).id;
        assert!(b > a);
    }

    #[test]
    fn test_active_count_follows_statuses() {
        let mut registry = TaskRegistry::new(10);
        let a = registry.insert(song(1), TaskStatus::Pending).id;
        registry.insert(song(2), TaskStatus::Queued);
        assert_eq!(registry.active_count(), 1);

        registry.transition(a, TaskStatus::Preparing).unwrap();
        registry.set_progress(a, 40).unwrap();
        assert_eq!(registry.active_count(), 1);

        registry.complete(a, Outcome::Success).unwrap();
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.unfinished_count(), 1);
    }

    #[test]
    fn test_backlog_is_fifo() {
        let mut registry = TaskRegistry::new(10);
        registry.insert(song(1), TaskStatus::Pending);
        let q1 = registry.insert(song(2), TaskStatus::Queued).id;
        let q2 = registry.insert(song(3), TaskStatus::Queued).id;

        assert_eq!(registry.next_queued(), Some(q1));
        registry.transition(q1, TaskStatus::Pending).unwrap();
        assert_eq!(registry.next_queued(), Some(q2));
    }

    #[test]
    fn test_complete_twice_is_rejected() {
        let mut registry = TaskRegistry::new(10);
        let id = registry.insert(song(1), TaskStatus::Pending).id;
        finish(&mut registry, id, Outcome::Success);

        let err = registry
            .complete(id, Outcome::Failed("late".into()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Success);
    }

    #[test]
    fn test_failure_keeps_message() {
        let mut registry = TaskRegistry::new(10);
        let id = registry.insert(song(1), TaskStatus::Pending).id;
        registry.complete(id, Outcome::Failed("no url".into())).unwrap();

        let task = registry.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.message.as_deref(), Some("no url"));
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_progress_rejected_after_terminal() {
        let mut registry = TaskRegistry::new(10);
        let id = registry.insert(song(1), TaskStatus::Pending).id;
        registry.complete(id, Outcome::Failed("x".into())).unwrap();
        assert!(registry.set_progress(id, 50).is_err());
    }

    #[test]
    fn test_eviction_removes_oldest_terminal_only() {
        let mut registry = TaskRegistry::new(3);
        let running = registry.insert(song(1), TaskStatus::Pending).id;
        let done_a = registry.insert(song(2), TaskStatus::Pending).id;
        let done_b = registry.insert(song(3), TaskStatus::Pending).id;
        finish(&mut registry, done_a, Outcome::Success);
        finish(&mut registry, done_b, Outcome::Failed("x".into()));

        registry.insert(song(4), TaskStatus::Queued);

        assert_eq!(registry.snapshot().len(), 3);
        assert!(registry.get(running).is_some());
        assert!(registry.get(done_a).is_none());
        assert!(registry.get(done_b).is_some());
    }

    #[test]
    fn test_eviction_never_removes_running_tasks() {
        let mut registry = TaskRegistry::new(2);
        for n in 0..5 {
            registry.insert(song(n), TaskStatus::Queued);
        }
        assert_eq!(registry.snapshot().len(), 5);
        assert_eq!(registry.unfinished_count(), 5);
    }

    #[test]
    fn test_snapshot_order() {
        let mut registry = TaskRegistry::new(10);
        let done = registry.insert(song(1), TaskStatus::Pending).id;
        let failed = registry.insert(song(2), TaskStatus::Pending).id;
        let downloading = registry.insert(song(3), TaskStatus::Pending).id;
        let preparing = registry.insert(song(4), TaskStatus::Pending).id;
        let pending = registry.insert(song(5), TaskStatus::Pending).id;
        let queued = registry.insert(song(6), TaskStatus::Queued).id;

        finish(&mut registry, done, Outcome::Success);
        registry.complete(failed, Outcome::Failed("x".into())).unwrap();
        registry.transition(downloading, TaskStatus::Preparing).unwrap();
        registry.set_progress(downloading, 10).unwrap();
        registry.transition(preparing, TaskStatus::Preparing).unwrap();

        let order: Vec<TaskId> = registry.snapshot().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![downloading, preparing, pending, queued, failed, done]);
    }

    #[test]
    fn test_snapshot_ties_keep_insertion_order() {
        let mut registry = TaskRegistry::new(10);
        let ids: Vec<TaskId> = (0..4)
            .map(|n| registry.insert(song(n), TaskStatus::Queued).id)
            .collect();
        let order: Vec<TaskId> = registry.snapshot().iter().map(|t| t.id).collect();
        assert_eq!(order, ids);
    }
}
