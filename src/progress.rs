//! Per-run progress state machine.
//!
//! ```text
//! pending ──start──▶ processing ──complete──▶ completed
//!    │                   │
//!    └──────fail─────────┴──────────────────▶ failed
//! ```
//!
//! The [`ProgressTracker`] is driven by the stream producer, one call per
//! emitted event. Snapshots are published on a `tokio::sync::watch` channel
//! (any number of status readers, always the latest value) and forwarded to
//! an optional [`ProgressObserver`], which is how the CLI drives its progress
//! bar.
//!
//! Calls that would move the machine backwards or out of a terminal state
//! are ignored with a warning.

use crate::model::round2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Snapshot published after every transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub total_pages: usize,
    /// Pages with an emitted event, successful or not.
    pub processed_pages: usize,
    /// Subset of `processed_pages` that ended in an `error` event.
    pub failed_pages: usize,
    /// `round(processed / total * 100, 2)`; never decreases.
    pub percent: f64,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Receives progress notifications from a running extraction.
///
/// Called from the producer task, in emission order. All methods default to
/// no-ops.
pub trait ProgressObserver: Send + Sync {
    /// The document opened and `start` was emitted.
    fn on_run_start(&self, filename: &str, total_pages: usize) {
        let _ = (filename, total_pages);
    }

    /// A `page` or `error` event for `page_number` was emitted.
    fn on_page_emitted(&self, page_number: usize, state: &ProgressState, error: Option<&str>) {
        let _ = (page_number, state, error);
    }

    fn on_run_complete(&self, state: &ProgressState) {
        let _ = state;
    }

    fn on_run_failed(&self, state: &ProgressState) {
        let _ = state;
    }
}

/// Observer that ignores everything.
pub struct NoopProgressObserver;

impl ProgressObserver for NoopProgressObserver {}

/// Owns the state machine of one run.
pub struct ProgressTracker {
    tx: watch::Sender<ProgressState>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl ProgressTracker {
    pub fn new(observer: Option<Arc<dyn ProgressObserver>>) -> (Self, watch::Receiver<ProgressState>) {
        let (tx, rx) = watch::channel(ProgressState::default());
        (Self { tx, observer }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressState {
        self.tx.borrow().clone()
    }

    /// `pending → processing`.
    pub fn start(&self, filename: &str, total_pages: usize) {
        let mut state = self.snapshot();
        if state.status != RunStatus::Pending {
            warn!("Ignoring start in state {:?}", state.status);
            return;
        }
        state.status = RunStatus::Processing;
        state.total_pages = total_pages;
        self.tx.send_replace(state);

        if let Some(observer) = &self.observer {
            observer.on_run_start(filename, total_pages);
        }
    }

    /// Count one emitted page event. `error` is set for `error` events.
    pub fn page_done(&self, page_number: usize, error: Option<&str>) {
        let mut state = self.snapshot();
        if state.status != RunStatus::Processing {
            warn!("Ignoring page {} in state {:?}", page_number, state.status);
            return;
        }
        if state.processed_pages >= state.total_pages {
            warn!(
                "Ignoring page {}: all {} pages already counted",
                page_number, state.total_pages
            );
            return;
        }

        state.processed_pages += 1;
        if error.is_some() {
            state.failed_pages += 1;
        }
        let percent = if state.total_pages == 0 {
            0.0
        } else {
            round2(state.processed_pages as f64 / state.total_pages as f64 * 100.0)
        };
        state.percent = state.percent.max(percent);
        self.tx.send_replace(state.clone());

        if let Some(observer) = &self.observer {
            observer.on_page_emitted(page_number, &state, error);
        }
    }

    /// `processing → completed`.
    pub fn complete(&self) {
        let mut state = self.snapshot();
        if state.status != RunStatus::Processing {
            warn!("Ignoring completion in state {:?}", state.status);
            return;
        }
        state.status = RunStatus::Completed;
        self.tx.send_replace(state.clone());

        if let Some(observer) = &self.observer {
            observer.on_run_complete(&state);
        }
    }

    /// `pending | processing → failed`. Counters keep their last values.
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.snapshot();
        if state.status.is_terminal() {
            warn!("Ignoring failure in terminal state {:?}", state.status);
            return;
        }
        state.status = RunStatus::Failed;
        state.error_message = Some(message.into());
        self.tx.send_replace(state.clone());

        if let Some(observer) = &self.observer {
            observer.on_run_failed(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        pages: AtomicUsize,
        errors: AtomicUsize,
        completes: AtomicUsize,
    }

    impl ProgressObserver for Counting {
        fn on_page_emitted(&self, _page: usize, _state: &ProgressState, error: Option<&str>) {
            self.pages.fetch_add(1, Ordering::SeqCst);
            if error.is_some() {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_run_complete(&self, _state: &ProgressState) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn percent_follows_processed_count() {
        let (tracker, rx) = ProgressTracker::new(None);
        tracker.start("r.pdf", 3);
        assert_eq!(rx.borrow().status, RunStatus::Processing);

        let mut last = 0.0;
        for (k, expected) in [(1, 33.33), (2, 66.67), (3, 100.0)] {
            tracker.page_done(k, None);
            let state = rx.borrow().clone();
            assert_eq!(state.processed_pages, k);
            assert_eq!(state.percent, expected);
            assert!(state.percent >= last);
            last = state.percent;
        }

        tracker.complete();
        assert_eq!(rx.borrow().status, RunStatus::Completed);
    }

    #[test]
    fn failed_pages_count_toward_processed() {
        let (tracker, rx) = ProgressTracker::new(None);
        tracker.start("r.pdf", 2);
        tracker.page_done(1, Some("timeout"));
        tracker.page_done(2, None);
        let state = rx.borrow().clone();
        assert_eq!(state.processed_pages, 2);
        assert_eq!(state.failed_pages, 1);
        assert_eq!(state.percent, 100.0);
    }

    #[test]
    fn illegal_transitions_are_ignored() {
        let (tracker, rx) = ProgressTracker::new(None);
        tracker.page_done(1, None);
        tracker.complete();
        assert_eq!(rx.borrow().status, RunStatus::Pending);

        tracker.start("r.pdf", 1);
        tracker.page_done(1, None);
        tracker.page_done(2, None);
        assert_eq!(rx.borrow().processed_pages, 1);

        tracker.complete();
        tracker.fail("late");
        tracker.start("r.pdf", 9);
        let state = rx.borrow().clone();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.total_pages, 1);
        assert!(state.error_message.is_none());
    }

    #[test]
    fn fail_keeps_counters() {
        let (tracker, rx) = ProgressTracker::new(None);
        tracker.start("r.pdf", 4);
        tracker.page_done(1, None);
        tracker.fail("consumer disconnected");
        let state = rx.borrow().clone();
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.processed_pages, 1);
        assert_eq!(state.percent, 25.0);
        assert_eq!(state.error_message.as_deref(), Some("consumer disconnected"));
    }

    #[test]
    fn observer_sees_every_event() {
        let observer = Arc::new(Counting::default());
        let (tracker, _rx) = ProgressTracker::new(Some(observer.clone()));
        tracker.start("r.pdf", 2);
        tracker.page_done(1, None);
        tracker.page_done(2, Some("bad json"));
        tracker.complete();

        assert_eq!(observer.pages.load(Ordering::SeqCst), 2);
        assert_eq!(observer.errors.load(Ordering::SeqCst), 1);
        assert_eq!(observer.completes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&RunStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let cb: Arc<dyn ProgressObserver> = Arc::new(NoopProgressObserver);
        cb.on_run_start("r.pdf", 1);
        cb.on_page_emitted(1, &ProgressState::default(), None);
        cb.on_run_complete(&ProgressState::default());
    }
}
