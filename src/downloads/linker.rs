//! Playlist completion linking
//!
//! When a playlist is created with songs that are not yet in the library, the
//! linker waits for their downloads and attaches each one to the playlist as
//! it lands. A song leaves the awaited set exactly once: it is claimed when
//! its task reaches a terminal state and settled after the library lookup.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::events::{Event, EventHub};
use crate::backend::{Backend, SongKey, SongRef};
use crate::matcher;

/// Errors starting a playlist import
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("playlist \"{0}\" is still waiting for downloads")]
    AlreadyPending(String),
}

/// Final counts of a playlist import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub playlist_id: i64,
    pub playlist_name: String,
    pub added: usize,
    pub failed: usize,
}

/// The single in-flight "create playlist and download what's missing" operation
#[derive(Debug)]
pub struct PendingImport {
    playlist_id: i64,
    playlist_name: String,
    /// Songs whose tasks have not finished yet
    awaited: HashMap<SongKey, SongRef>,
    /// Songs whose tasks finished but whose library lookup is still running
    resolving: HashSet<SongKey>,
    added: usize,
    failed: usize,
    done_tx: Option<oneshot::Sender<ImportSummary>>,
}

impl PendingImport {
    fn is_settled(&self) -> bool {
        self.awaited.is_empty() && self.resolving.is_empty()
    }

    fn summary(&self) -> ImportSummary {
        ImportSummary {
            playlist_id: self.playlist_id,
            playlist_name: self.playlist_name.clone(),
            added: self.added,
            failed: self.failed,
        }
    }
}

/// Attaches finished downloads to the pending playlist import
pub struct PlaylistLinker<B: Backend> {
    backend: Arc<B>,
    settle_delay: Duration,
    events: EventHub,
    pending: Arc<Mutex<Option<PendingImport>>>,
}

impl<B: Backend> Clone for PlaylistLinker<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            settle_delay: self.settle_delay,
            events: self.events.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<B: Backend> PlaylistLinker<B> {
    pub fn new(backend: Arc<B>, settle_delay: Duration, events: EventHub) -> Self {
        Self {
            backend,
            settle_delay,
            events,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingImport>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start waiting for the missing songs of a freshly created playlist
    ///
    /// The returned receiver yields the summary once every song resolved.
    pub fn start(
        &self,
        playlist_id: i64,
        playlist_name: &str,
        missing: Vec<SongRef>,
    ) -> Result<oneshot::Receiver<ImportSummary>, ImportError> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut import = PendingImport {
            playlist_id,
            playlist_name: playlist_name.to_string(),
            awaited: missing.into_iter().map(|s| (s.key(), s)).collect(),
            resolving: HashSet::new(),
            added: 0,
            failed: 0,
            done_tx: Some(done_tx),
        };

        {
            let mut pending = self.pending();
            if let Some(current) = pending.as_ref() {
                return Err(ImportError::AlreadyPending(current.playlist_name.clone()));
            }
            if !import.awaited.is_empty() {
                info!(
                    "Playlist \"{}\" waiting for {} downloads",
                    playlist_name,
                    import.awaited.len()
                );
                *pending = Some(import);
                return Ok(done_rx);
            }
        }

        // Nothing to wait for
        self.finalize(&mut import);
        Ok(done_rx)
    }

    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        self.pending().is_some()
    }

    /// Claim a finished song if the pending import awaits it
    ///
    /// Returns the playlist id to resolve against; `None` if the song is not
    /// awaited or has already been claimed by an earlier task.
    pub fn claim(&self, song: &SongRef) -> Option<i64> {
        let mut pending = self.pending();
        let import = pending.as_mut()?;
        let key = song.key();
        import.awaited.remove(&key)?;
        import.resolving.insert(key);
        Some(import.playlist_id)
    }

    /// Settle a claimed song: attach it on success, count it either way
    pub async fn resolve(&self, song: SongRef, playlist_id: i64, succeeded: bool) {
        let added = if succeeded {
            // Give the server's library index time to pick up the new file
            tokio::time::sleep(self.settle_delay).await;
            self.attach(&song, playlist_id).await
        } else {
            false
        };

        let finished = {
            let mut pending = self.pending();
            let Some(import) = pending.as_mut() else {
                return;
            };
            if import.playlist_id != playlist_id || !import.resolving.remove(&song.key()) {
                debug!("Ignoring stale resolution for {}", song.display_name());
                return;
            }
            if added {
                import.added += 1;
            } else {
                import.failed += 1;
            }
            if import.is_settled() {
                pending.take()
            } else {
                None
            }
        };

        if let Some(mut import) = finished {
            self.finalize(&mut import);
        }
    }

    /// Look the downloaded song up in the library and attach it
    async fn attach(&self, song: &SongRef, playlist_id: i64) -> bool {
        let entries = match self.backend.lookup_local_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to refresh library for {}: {}", song.display_name(), e);
                return false;
            }
        };

        let Some(entry) = matcher::find_local_match(&entries, song) else {
            warn!(
                "Download of {} reported success but it is not in the library",
                song.display_name()
            );
            return false;
        };

        match self
            .backend
            .attach_song_to_playlist(playlist_id, &entry.local_id)
            .await
        {
            Ok(()) => {
                debug!("Attached {} to playlist {}", song.display_name(), playlist_id);
                true
            }
            Err(e) => {
                warn!("Failed to attach {} to playlist: {}", song.display_name(), e);
                false
            }
        }
    }

    fn finalize(&self, import: &mut PendingImport) {
        let summary = import.summary();
        info!(
            "Playlist \"{}\" import finished: {} added, {} failed",
            summary.playlist_name, summary.added, summary.failed
        );
        if let Some(tx) = import.done_tx.take() {
            let _ = tx.send(summary.clone());
        }
        self.events.emit(Event::ImportFinished(summary));
    }
}
