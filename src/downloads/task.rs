//! Download task state and transition rules

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::backend::{JobId, SongRef};

/// Locally generated task identifier, increasing in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle status of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the backlog for a free slot
    Queued,
    /// Admitted, submission not yet acknowledged
    Pending,
    /// Server accepted the job and is preparing it
    Preparing,
    /// Transfer in progress
    Downloading,
    Success,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Error)
    }

    /// Holds one of the concurrency slots
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Preparing | TaskStatus::Downloading
        )
    }

    /// Rank used for display ordering, lowest first
    pub fn display_rank(self) -> u8 {
        match self {
            TaskStatus::Downloading => 0,
            TaskStatus::Preparing => 1,
            TaskStatus::Pending => 2,
            TaskStatus::Queued => 3,
            TaskStatus::Error => 4,
            TaskStatus::Success => 5,
        }
    }

    /// Whether a task may move from `self` to `next`
    ///
    /// Any non-terminal task may fail; terminal states never change.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Success | Error, _) => false,
            (_, Error) => true,
            (Queued, Pending) => true,
            (Pending, Preparing) => true,
            (Preparing, Downloading) => true,
            (Downloading, Downloading) => true,
            (Preparing | Downloading, Success) => true,
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Pending => "pending",
            TaskStatus::Preparing => "preparing",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a task left the non-terminal states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(String),
}

impl Outcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            Outcome::Success => TaskStatus::Success,
            Outcome::Failed(_) => TaskStatus::Error,
        }
    }
}

/// One orchestrated attempt to acquire a single remote song
#[derive(Debug, Clone, Serialize)]
pub struct DownloadTask {
    pub id: TaskId,
    pub song: SongRef,
    pub status: TaskStatus,
    /// 0-100, only meaningful while preparing or downloading
    pub progress_percent: u8,
    /// Stable tie-break for display ordering
    pub created_order: u64,
    /// Server job once the submission was acknowledged
    pub job_id: Option<JobId>,
    /// Failure reason or last server message
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DownloadTask {
    pub fn new(id: TaskId, song: SongRef, status: TaskStatus, created_order: u64) -> Self {
        Self {
            id,
            song,
            status,
            progress_percent: 0,
            created_order,
            job_id: None,
            message: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
