//! Scripted in-memory backend for orchestration tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::{
    Backend, BackendError, JobId, JobSnapshot, JobState, LocalEntry, Playlist, PlaylistOrigin,
    Quality, RemotePlaylist, SongRef, Source,
};

pub(crate) fn song(n: u32) -> SongRef {
    SongRef {
        remote_id: n.to_string(),
        source: Source::Netease,
        title: format!("Song {}", n),
        artist: "Artist".into(),
        album: "Album".into(),
        duration_seconds: 200,
        is_premium_only: false,
        cover_url: None,
    }
}

/// What a poll of a scripted job reports
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Connection-level failure
    Transient,
    Preparing,
    Downloading(f64),
    Success,
    Failed(&'static str),
    /// Server no longer knows the job
    Expired,
    /// Request is accepted but never answered
    Hang,
}

struct Job {
    song: SongRef,
    polls: usize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Backend whose jobs follow per-song scripts
///
/// Unscripted songs report downloading forever until [`MockBackend::release`]
/// is called for them.
pub(crate) struct MockBackend {
    logged_in: bool,
    index_on_success: bool,
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    rejected: Mutex<HashMap<String, &'static str>>,
    hung_submissions: Mutex<HashSet<String>>,
    released: Mutex<HashMap<String, Step>>,
    jobs: Mutex<HashMap<String, Job>>,
    library: Mutex<Vec<LocalEntry>>,
    attached: Mutex<Vec<(i64, String)>>,
    submissions: Mutex<Vec<(String, Quality)>>,
    playlists: Mutex<Vec<(String, Option<PlaylistOrigin>)>>,
    login_checks: AtomicUsize,
    next_job: Mutex<u32>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            logged_in: true,
            index_on_success: true,
            scripts: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashMap::new()),
            hung_submissions: Mutex::new(HashSet::new()),
            released: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            library: Mutex::new(Vec::new()),
            attached: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            playlists: Mutex::new(Vec::new()),
            login_checks: AtomicUsize::new(0),
            next_job: Mutex::new(0),
        }
    }

    pub fn logged_out(mut self) -> Self {
        self.logged_in = false;
        self
    }

    /// Successful jobs do not show up in the library listing
    pub fn without_indexing(mut self) -> Self {
        self.index_on_success = false;
        self
    }

    /// Steps reported by successive polls; the last step repeats
    pub fn script(&self, remote_id: &str, steps: Vec<Step>) {
        lock(&self.scripts).insert(remote_id.to_string(), steps);
    }

    pub fn reject_submission(&self, remote_id: &str, message: &'static str) {
        lock(&self.rejected).insert(remote_id.to_string(), message);
    }

    /// Never answer the submission of this song
    pub fn hang_submission(&self, remote_id: &str) {
        lock(&self.hung_submissions).insert(remote_id.to_string());
    }

    /// Make every further poll of the song report `step`
    pub fn release(&self, remote_id: &str, step: Step) {
        lock(&self.released).insert(remote_id.to_string(), step);
    }

    pub fn add_library_entry(&self, song: &SongRef) {
        lock(&self.library).push(LocalEntry {
            local_id: format!("local-{}", song.remote_id),
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            filename: format!("{} - {}.mp3", song.artist, song.title),
        });
    }

    pub fn attached(&self) -> Vec<(i64, String)> {
        lock(&self.attached).clone()
    }

    pub fn submissions(&self) -> Vec<(String, Quality)> {
        lock(&self.submissions).clone()
    }

    /// Name and origin of every created playlist
    pub fn playlists(&self) -> Vec<(String, Option<PlaylistOrigin>)> {
        lock(&self.playlists).clone()
    }

    pub fn login_checks(&self) -> usize {
        self.login_checks.load(Ordering::SeqCst)
    }

    pub fn polls_of(&self, remote_id: &str) -> usize {
        lock(&self.jobs)
            .values()
            .filter(|j| j.song.remote_id == remote_id)
            .map(|j| j.polls)
            .sum()
    }

    fn next_step(&self, job: &JobId) -> Result<(SongRef, Step), BackendError> {
        let mut jobs = lock(&self.jobs);
        let Some(entry) = jobs.get_mut(&job.0) else {
            return Err(BackendError::Rejected("任务不存在".into()));
        };
        entry.polls += 1;
        let song = entry.song.clone();

        if let Some(step) = lock(&self.released).get(&song.remote_id) {
            return Ok((song, step.clone()));
        }
        let step = match lock(&self.scripts).get(&song.remote_id) {
            Some(steps) if !steps.is_empty() => {
                steps[(entry.polls - 1).min(steps.len() - 1)].clone()
            }
            _ => Step::Downloading(50.0),
        };
        Ok((song, step))
    }
}

fn snapshot(status: JobState, progress: Option<f64>, message: Option<&str>) -> JobSnapshot {
    JobSnapshot {
        status,
        progress,
        message: message.map(str::to_string),
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn submit_download(
        &self,
        song: &SongRef,
        quality: Quality,
        _target_dir: Option<&str>,
    ) -> Result<JobId, BackendError> {
        lock(&self.submissions).push((song.remote_id.clone(), quality));
        let hung = lock(&self.hung_submissions).contains(&song.remote_id);
        if hung {
            std::future::pending::<()>().await;
        }
        if let Some(message) = lock(&self.rejected).get(&song.remote_id) {
            return Err(BackendError::Rejected(message.to_string()));
        }

        let id = {
            let mut next = lock(&self.next_job);
            *next += 1;
            format!("job-{}", *next)
        };
        lock(&self.jobs).insert(
            id.clone(),
            Job {
                song: song.clone(),
                polls: 0,
            },
        );
        Ok(JobId(id))
    }

    async fn poll_job(&self, _source: Source, job: &JobId) -> Result<JobSnapshot, BackendError> {
        let (song, step) = self.next_step(job)?;
        match step {
            Step::Transient => Err(BackendError::Malformed("connection reset")),
            Step::Expired => Err(BackendError::Rejected("任务不存在".into())),
            Step::Hang => std::future::pending().await,
            Step::Preparing => Ok(snapshot(JobState::Preparing, None, None)),
            Step::Downloading(p) => Ok(snapshot(JobState::Downloading, Some(p), None)),
            Step::Failed(message) => Ok(snapshot(JobState::Error, None, Some(message))),
            Step::Success => {
                if self.index_on_success {
                    let known = lock(&self.library)
                        .iter()
                        .any(|e| e.local_id == format!("local-{}", song.remote_id));
                    if !known {
                        self.add_library_entry(&song);
                    }
                }
                Ok(snapshot(JobState::Success, Some(100.0), None))
            }
        }
    }

    async fn search_catalog(
        &self,
        _source: Source,
        keywords: &str,
        limit: u32,
    ) -> Result<Vec<SongRef>, BackendError> {
        Ok((1..=limit)
            .map(|n| SongRef {
                title: format!("{} {}", keywords, n),
                ..song(n)
            })
            .collect())
    }

    async fn lookup_local_entries(&self) -> Result<Vec<LocalEntry>, BackendError> {
        Ok(lock(&self.library).clone())
    }

    async fn create_playlist(
        &self,
        name: &str,
        pending: &[SongRef],
        origin: Option<&PlaylistOrigin>,
    ) -> Result<Playlist, BackendError> {
        lock(&self.playlists).push((name.to_string(), origin.cloned()));
        Ok(Playlist {
            id: 7,
            name: name.to_string(),
            pending_count: Some(pending.len() as u32),
        })
    }

    async fn resolve_playlist(
        &self,
        _source: Source,
        link: &str,
    ) -> Result<RemotePlaylist, BackendError> {
        if !link.starts_with("https://") {
            return Err(BackendError::Rejected("无法从链接中提取歌单ID".into()));
        }
        Ok(RemotePlaylist {
            name: "Linked".into(),
            songs: (1..=3).map(song).collect(),
        })
    }

    async fn attach_song_to_playlist(
        &self,
        playlist_id: i64,
        local_id: &str,
    ) -> Result<(), BackendError> {
        lock(&self.attached).push((playlist_id, local_id.to_string()));
        Ok(())
    }

    async fn login_status(&self, _source: Source) -> Result<bool, BackendError> {
        self.login_checks.fetch_add(1, Ordering::SeqCst);
        // Let concurrently admitted tasks reach their own check
        tokio::task::yield_now().await;
        Ok(self.logged_in)
    }
}
