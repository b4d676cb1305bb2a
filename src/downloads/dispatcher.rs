//! Admission control and task lifecycle
//!
//! The dispatcher owns the task registry, admits queued tasks as slots free
//! up, and runs the terminal path of every task exactly once. Each admitted
//! task gets one poller (see [`super::poller`]) that drives it to completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch, OnceCell};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::events::{Event, EventHub};
use super::linker::{ImportError, ImportSummary, PlaylistLinker};
use super::poller;
use super::registry::TaskRegistry;
use super::task::{DownloadTask, Outcome, TaskId, TaskStatus};
use super::OrchestratorConfig;
use crate::backend::{bounded, Backend, JobId, Quality, SongRef, Source};

/// Handle to the download orchestration; cheap to clone
pub struct Dispatcher<B: Backend> {
    inner: Arc<Inner<B>>,
}

struct Inner<B: Backend> {
    backend: Arc<B>,
    config: OrchestratorConfig,
    registry: Mutex<TaskRegistry>,
    pollers: Mutex<HashMap<TaskId, AbortHandle>>,
    /// Login state per source, asked for once
    logins: Mutex<HashMap<Source, Arc<OnceCell<bool>>>>,
    events: EventHub,
    linker: PlaylistLinker<B>,
    unfinished: watch::Sender<usize>,
}

impl<B: Backend> Clone for Dispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: Backend> Dispatcher<B> {
    pub fn new(backend: Arc<B>, config: OrchestratorConfig) -> Self {
        let events = EventHub::new();
        let linker = PlaylistLinker::new(backend.clone(), config.settle_delay, events.clone());
        let (unfinished, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                backend,
                registry: Mutex::new(TaskRegistry::new(config.registry_capacity)),
                config,
                pollers: Mutex::new(HashMap::new()),
                logins: Mutex::new(HashMap::new()),
                events,
                linker,
                unfinished,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.inner.backend
    }

    fn registry(&self) -> MutexGuard<'_, TaskRegistry> {
        lock(&self.inner.registry)
    }

    /// Create a task for a song; it starts immediately if a slot is free
    pub fn enqueue(&self, song: SongRef) -> TaskId {
        let (task, admitted) = {
            let mut registry = self.registry();
            let admit = registry.active_count() < self.inner.config.concurrency
                && !registry.has_backlog();
            let status = if admit {
                TaskStatus::Pending
            } else {
                TaskStatus::Queued
            };
            let task = registry.insert(song, status).clone();
            self.sync_unfinished(&registry);
            (task, admit)
        };

        let id = task.id;
        debug!("Enqueued {} {} as {}", id, task.song.display_name(), task.status);
        self.publish(task);
        if admitted {
            self.spawn_poller(id);
        }
        self.admit_next();
        id
    }

    pub fn enqueue_batch<I>(&self, songs: I) -> Vec<TaskId>
    where
        I: IntoIterator<Item = SongRef>,
    {
        songs.into_iter().map(|song| self.enqueue(song)).collect()
    }

    /// Admit queued tasks, oldest first, while slots are free
    pub fn admit_next(&self) {
        loop {
            let task = {
                let mut registry = self.registry();
                if registry.active_count() >= self.inner.config.concurrency {
                    return;
                }
                let Some(id) = registry.next_queued() else {
                    return;
                };
                match registry.transition(id, TaskStatus::Pending) {
                    Ok(task) => task.clone(),
                    Err(e) => {
                        warn!("Failed to admit task: {}", e);
                        return;
                    }
                }
            };

            let id = task.id;
            debug!("Admitted {} {}", id, task.song.display_name());
            self.publish(task);
            self.spawn_poller(id);
        }
    }

    fn spawn_poller(&self, id: TaskId) {
        // Hold the map while spawning so a fast finish cannot run before the insert
        let mut pollers = lock(&self.inner.pollers);
        let handle = tokio::spawn(poller::execute(self.clone(), id));
        pollers.insert(id, handle.abort_handle());
    }

    /// All tasks in display order
    pub fn snapshot(&self) -> Vec<DownloadTask> {
        self.registry().snapshot()
    }

    pub fn task(&self, id: TaskId) -> Option<DownloadTask> {
        self.registry().get(id).cloned()
    }

    /// Call `listener` with every orchestration event
    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener);
    }

    /// Wait for `missing` to download and attach them to the playlist
    ///
    /// The songs still need to be enqueued by the caller.
    pub fn start_playlist_import(
        &self,
        playlist_id: i64,
        playlist_name: &str,
        missing: Vec<SongRef>,
    ) -> Result<oneshot::Receiver<ImportSummary>, ImportError> {
        self.inner.linker.start(playlist_id, playlist_name, missing)
    }

    /// Fail a task that has not finished yet and stop its poller
    ///
    /// Returns `false` if the task is unknown or already terminal.
    pub fn cancel(&self, id: TaskId) -> bool {
        let handle = lock(&self.inner.pollers).remove(&id);
        if !self.finish(id, Outcome::Failed("cancelled".into())) {
            return false;
        }
        if let Some(handle) = handle {
            handle.abort();
        }
        true
    }

    /// Cancel every unfinished task, backlog first; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let mut unfinished: Vec<DownloadTask> = self
            .snapshot()
            .into_iter()
            .filter(|t| !t.is_terminal())
            .collect();
        // Cancelling a running task first would admit a queued one
        unfinished.sort_by_key(|t| t.status != TaskStatus::Queued);

        let cancelled = unfinished.iter().filter(|t| self.cancel(t.id)).count();
        info!("Cancelled {} downloads", cancelled);
        cancelled
    }

    /// Resolve once every task has reached a terminal state
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.unfinished.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Quality to request for a song, downgraded without a catalog login
    pub(crate) async fn quality_for(&self, song: &SongRef) -> Quality {
        let cell = lock(&self.inner.logins)
            .entry(song.source)
            .or_default()
            .clone();
        let limit = self.inner.config.request_timeout;
        // Concurrent callers wait for one check; a failed check is retried by the next caller
        let checked = cell
            .get_or_try_init(|| bounded(limit, self.inner.backend.login_status(song.source)))
            .await;
        let authenticated = match checked {
            Ok(authenticated) => *authenticated,
            Err(e) => {
                warn!("Failed to check {} login: {}", song.source, e);
                false
            }
        };

        let quality = self.inner.config.quality.for_caller(authenticated);
        if quality != self.inner.config.quality {
            debug!("Not logged in to {}, requesting {:?}", song.source, quality);
        }
        quality
    }

    /// Move an admitted task to preparing; `None` if it is no longer live
    pub(crate) fn begin(&self, id: TaskId) -> Option<SongRef> {
        let task = self
            .registry()
            .transition(id, TaskStatus::Preparing)
            .ok()?
            .clone();
        let song = task.song.clone();
        self.publish(task);
        Some(song)
    }

    pub(crate) fn record_job(&self, id: TaskId, job: JobId) {
        if let Err(e) = self.registry().set_job(id, job) {
            debug!("Dropping job id: {}", e);
        }
    }

    /// Report download progress; `false` once the task stopped being live
    pub(crate) fn record_progress(&self, id: TaskId, percent: u8) -> bool {
        let (task, changed) = {
            let mut registry = self.registry();
            let before = registry.get(id).map(|t| (t.status, t.progress_percent));
            let Ok(task) = registry.set_progress(id, percent) else {
                return false;
            };
            let changed = before != Some((task.status, task.progress_percent));
            (task.clone(), changed)
        };
        if changed {
            self.publish(task);
        }
        true
    }

    pub(crate) fn is_live(&self, id: TaskId) -> bool {
        self.registry().get(id).is_some_and(|t| !t.is_terminal())
    }

    /// Terminal path of a task
    ///
    /// Returns `false` without side effects if the task already finished.
    pub(crate) fn finish(&self, id: TaskId, outcome: Outcome) -> bool {
        let task = {
            let mut registry = self.registry();
            match registry.complete(id, outcome) {
                Ok(task) => task,
                Err(e) => {
                    debug!("Ignoring completion: {}", e);
                    return false;
                }
            }
        };
        lock(&self.inner.pollers).remove(&id);

        let succeeded = task.status == TaskStatus::Success;
        if succeeded {
            info!("Downloaded {}", task.song.display_name());
        } else {
            warn!(
                "Download of {} failed: {}",
                task.song.display_name(),
                task.message.as_deref().unwrap_or("unknown error")
            );
        }

        let song = task.song.clone();
        self.publish(task);
        if succeeded {
            self.inner.events.emit(Event::LibraryChanged);
        }

        if let Some(playlist_id) = self.inner.linker.claim(&song) {
            let linker = self.inner.linker.clone();
            tokio::spawn(async move { linker.resolve(song, playlist_id, succeeded).await });
        }

        self.admit_next();
        // Waiters wake only after subscribers have seen the terminal event
        self.sync_unfinished(&self.registry());
        true
    }

    /// Publish the unfinished count; takes the locked registry so counts never go out of order
    fn sync_unfinished(&self, registry: &TaskRegistry) {
        self.inner.unfinished.send_replace(registry.unfinished_count());
    }

    fn publish(&self, task: DownloadTask) {
        self.inner.events.emit(Event::TaskChanged(task));
    }
}
