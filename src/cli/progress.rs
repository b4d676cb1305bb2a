//! Live download board
//!
//! One row per task, redrawn from the dispatcher's snapshot on every task
//! event so rows follow the display order: running tasks on top, then the
//! backlog, then finished ones. Logging to stderr is muted while the board is
//! on screen.

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::backend::Backend;
use crate::downloads::{Dispatcher, DownloadTask, Event, TaskStatus};
use crate::utils::set_board_active;

/// Terminal outcomes seen while the board was attached
#[derive(Debug, Default, Clone)]
pub struct BoardSummary {
    pub succeeded: usize,
    /// Song name and failure reason
    pub failed: Vec<(String, String)>,
}

#[derive(Default)]
struct BoardState {
    rows: Vec<ProgressBar>,
    summary: BoardSummary,
}

pub struct ProgressBoard {
    multi: MultiProgress,
    running: ProgressStyle,
    settled: ProgressStyle,
    state: Mutex<BoardState>,
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

impl ProgressBoard {
    /// Draw the board for every task of `dispatcher` from now on
    pub fn attach<B: Backend>(dispatcher: &Dispatcher<B>) -> Arc<Self> {
        let board = Arc::new(Self {
            multi: MultiProgress::new(),
            running: style("{spinner:.green} {prefix:>11} [{bar:30.cyan/blue}] {pos:>3}% {msg}"),
            settled: style("  {prefix:>11} [{bar:30.cyan/blue}] {pos:>3}% {msg}"),
            state: Mutex::new(BoardState::default()),
        });

        set_board_active(true);
        let listener = board.clone();
        let source = dispatcher.clone();
        dispatcher.on_event(move |event| {
            if let Event::TaskChanged(task) = event {
                listener.update(task, || source.snapshot());
            }
        });
        board
    }

    /// Tally `task` if it just finished and redraw every row
    fn update(&self, task: &DownloadTask, snapshot: impl FnOnce() -> Vec<DownloadTask>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        // A task finishes exactly once, so its terminal event is seen once
        match task.status {
            TaskStatus::Success => state.summary.succeeded += 1,
            TaskStatus::Error => state.summary.failed.push((
                task.song.display_name(),
                task.message.clone().unwrap_or_else(|| "failed".to_string()),
            )),
            _ => {}
        }

        // Taken under the board lock so a stale snapshot never overwrites a newer one
        let tasks = snapshot();
        self.redraw(&mut state.rows, &tasks);
    }

    fn redraw(&self, rows: &mut Vec<ProgressBar>, tasks: &[DownloadTask]) {
        while rows.len() < tasks.len() {
            let row = self.multi.add(ProgressBar::new(100));
            row.enable_steady_tick(Duration::from_millis(120));
            rows.push(row);
        }
        while rows.len() > tasks.len() {
            if let Some(row) = rows.pop() {
                row.finish_and_clear();
                self.multi.remove(&row);
            }
        }

        for (row, task) in rows.iter().zip(tasks) {
            let name = task.song.display_name();
            let (style, message) = match task.status {
                TaskStatus::Success => (&self.settled, format!("{}", name.green())),
                TaskStatus::Error => {
                    let reason = task.message.as_deref().unwrap_or("failed");
                    (&self.settled, format!("{} ({})", name.red(), reason))
                }
                TaskStatus::Queued => (&self.settled, format!("{}", name.dimmed())),
                _ => (&self.running, name),
            };
            row.set_style(style.clone());
            row.set_prefix(task.status.label());
            row.set_position(u64::from(task.progress_percent));
            row.set_message(message);
        }
    }

    /// Stop drawing and return what happened
    pub fn finish(&self) -> BoardSummary {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for row in &state.rows {
            row.abandon();
        }
        set_board_active(false);
        state.summary.clone()
    }
}

impl Drop for ProgressBoard {
    fn drop(&mut self) {
        set_board_active(false);
    }
}
