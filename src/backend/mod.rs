//! Music server API module
//!
//! The server fronts the remote catalogs and runs the actual downloads; this
//! crate only submits jobs and watches them.

pub mod client;
pub mod models;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub use client::BackendClient;
pub use models::*;

/// Errors returned by the music server API
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Connection, HTTP or body decoding failure
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered but reported `success: false`
    #[error("{0}")]
    Rejected(String),
    /// The server answered `success: true` without the expected payload
    #[error("malformed response: {0}")]
    Malformed(&'static str),
    /// The server did not answer in time
    #[error("no answer within {0:?}")]
    TimedOut(Duration),
}

impl BackendError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Transport(_) | BackendError::Malformed(_) | BackendError::TimedOut(_)
        )
    }
}

/// Run a backend call, giving up after `limit`
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(BackendError::TimedOut(limit)))
}

/// Operations the download orchestration needs from the music server
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Ask the server to fetch a song into the library; returns the job id
    async fn submit_download(
        &self,
        song: &SongRef,
        quality: Quality,
        target_dir: Option<&str>,
    ) -> Result<JobId, BackendError>;

    /// Query the state of a previously submitted job
    async fn poll_job(&self, source: Source, job: &JobId) -> Result<JobSnapshot, BackendError>;

    /// Search a remote catalog
    async fn search_catalog(
        &self,
        source: Source,
        keywords: &str,
        limit: u32,
    ) -> Result<Vec<SongRef>, BackendError>;

    /// List the local library as currently indexed by the server
    async fn lookup_local_entries(&self) -> Result<Vec<LocalEntry>, BackendError>;

    /// Create a playlist whose missing songs are recorded as pending
    ///
    /// `origin` records the catalog playlist it was copied from, if any.
    async fn create_playlist(
        &self,
        name: &str,
        pending: &[SongRef],
        origin: Option<&PlaylistOrigin>,
    ) -> Result<Playlist, BackendError>;

    /// Resolve a catalog playlist share link into its songs
    async fn resolve_playlist(
        &self,
        source: Source,
        link: &str,
    ) -> Result<RemotePlaylist, BackendError>;

    /// Add a local library song to a playlist
    async fn attach_song_to_playlist(
        &self,
        playlist_id: i64,
        local_id: &str,
    ) -> Result<(), BackendError>;

    /// Whether the server holds a catalog login for this source
    async fn login_status(&self, source: Source) -> Result<bool, BackendError>;
}
