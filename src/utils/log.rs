//! Progress-board-aware logging
//!
//! While the live progress board owns the terminal, log lines written to
//! stderr would tear the bars apart. The board flips a global flag and this
//! layer drops events for as long as it is set.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

static BOARD_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Mark the progress board as drawn or not
pub fn set_board_active(enabled: bool) {
    BOARD_ACTIVE.store(enabled, Ordering::SeqCst);
}

pub fn is_board_active() -> bool {
    BOARD_ACTIVE.load(Ordering::SeqCst)
}

/// Wraps a layer and mutes its output while the progress board is active
///
/// Span bookkeeping is always forwarded so the inner layer stays consistent
/// once output resumes.
pub struct ConditionalStderrLayer<L> {
    inner: L,
}

impl<L> ConditionalStderrLayer<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

impl<S, L> Layer<S> for ConditionalStderrLayer<L>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    L: Layer<S>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        self.inner.on_new_span(attrs, id, ctx);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        self.inner.on_record(id, values, ctx);
    }

    fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
        self.inner.on_close(id, ctx);
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        if !is_board_active() {
            self.inner.on_event(event, ctx);
        }
    }

    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        self.inner.on_enter(id, ctx);
    }

    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        self.inner.on_exit(id, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    struct CountingLayer(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for CountingLayer {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_events_muted_while_board_active() {
        let seen = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry()
            .with(ConditionalStderrLayer::new(CountingLayer(seen.clone())));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("visible");
            set_board_active(true);
            tracing::info!("muted");
            set_board_active(false);
            tracing::info!("visible again");
        });

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(!is_board_active());
    }
}
