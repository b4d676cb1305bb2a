//! Orchestration events and their subscribers

use std::sync::{Arc, Mutex, PoisonError};

use super::linker::ImportSummary;
use super::task::DownloadTask;

/// Something observers may want to react to
#[derive(Debug, Clone)]
pub enum Event {
    /// A task changed status or progress
    TaskChanged(DownloadTask),
    /// A download succeeded and the library listing is stale
    LibraryChanged,
    /// A playlist import resolved all of its awaited songs
    ImportFinished(ImportSummary),
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Fan-out of events to registered callbacks
///
/// Callbacks run synchronously on the emitting task, after any registry
/// lock has been released.
#[derive(Clone, Default)]
pub struct EventHub {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub fn emit(&self, event: Event) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&event);
        }
    }
}
