//! Download orchestration
//!
//! Songs are turned into tasks, at most `concurrency` of them run against the
//! server at once, and everything else waits in a FIFO backlog. Finished
//! downloads feed the pending playlist import, if there is one.

mod dispatcher;
mod events;
mod linker;
mod poller;
mod registry;
mod task;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use crate::backend::Quality;

pub use dispatcher::Dispatcher;
pub use events::Event;
pub use task::{DownloadTask, TaskStatus};

/// Tunables of the orchestration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks running against the server at once
    pub concurrency: usize,
    /// Number of tasks kept for display before finished ones are evicted
    pub registry_capacity: usize,
    pub poll_interval: Duration,
    /// Status checks before a task is failed as timed out
    pub max_poll_attempts: u32,
    /// Consecutive failed status checks tolerated
    pub max_poll_failures: u32,
    /// Wait between a successful download and the library lookup
    pub settle_delay: Duration,
    /// Longest wait for any single server request
    pub request_timeout: Duration,
    pub quality: Quality,
    /// Server-side subdirectory to download into
    pub target_dir: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            registry_capacity: 30,
            poll_interval: Duration::from_millis(500),
            max_poll_attempts: 600,
            max_poll_failures: 10,
            settle_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
            quality: Quality::default(),
            target_dir: None,
        }
    }
}
