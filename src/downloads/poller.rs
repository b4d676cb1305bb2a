//! Per-task submission and status polling

use tracing::{debug, warn};

use super::dispatcher::Dispatcher;
use super::task::{Outcome, TaskId};
use crate::backend::{bounded, Backend, JobId, JobState, Source};

/// Drive one admitted task from submission to a terminal state
pub(crate) async fn execute<B: Backend>(dispatcher: Dispatcher<B>, id: TaskId) {
    let Some(song) = dispatcher.begin(id) else {
        return;
    };

    let quality = dispatcher.quality_for(&song).await;
    let config = dispatcher.config();
    let submission = dispatcher
        .backend()
        .submit_download(&song, quality, config.target_dir.as_deref());
    let job = match bounded(config.request_timeout, submission).await {
        Ok(job) => job,
        Err(e) => {
            dispatcher.finish(id, Outcome::Failed(format!("Submission failed: {}", e)));
            return;
        }
    };
    debug!("Task {} submitted as job {}", id, job);
    dispatcher.record_job(id, job.clone());

    if let Some(outcome) = poll_until_done(&dispatcher, id, song.source, &job).await {
        dispatcher.finish(id, outcome);
    }
}

/// Poll a job until the server reports a final state or a budget runs out
///
/// Returns `None` if the task was finished elsewhere in the meantime.
async fn poll_until_done<B: Backend>(
    dispatcher: &Dispatcher<B>,
    id: TaskId,
    source: Source,
    job: &JobId,
) -> Option<Outcome> {
    let config = dispatcher.config();
    let mut attempts: u32 = 0;
    let mut failures: u32 = 0;

    loop {
        tokio::time::sleep(config.poll_interval).await;
        if !dispatcher.is_live(id) {
            return None;
        }

        if attempts >= config.max_poll_attempts {
            return Some(Outcome::Failed(format!(
                "Timed out after {} status checks",
                attempts
            )));
        }
        attempts += 1;

        // A hung request counts as a failed check so the attempt budget still runs out
        let poll = dispatcher.backend().poll_job(source, job);
        let snapshot = match bounded(config.request_timeout, poll).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_transient() => {
                failures += 1;
                warn!(
                    "Status check {} for task {} failed ({}/{}): {}",
                    attempts, id, failures, config.max_poll_failures, e
                );
                if failures > config.max_poll_failures {
                    return Some(Outcome::Failed(format!("Lost contact with server: {}", e)));
                }
                continue;
            }
            // The server no longer knows the job
            Err(e) => return Some(Outcome::Failed(e.to_string())),
        };
        failures = 0;

        match snapshot.status {
            JobState::Success => return Some(Outcome::Success),
            JobState::Error => {
                return Some(Outcome::Failed(
                    snapshot
                        .message
                        .unwrap_or_else(|| "Download failed on server".to_string()),
                ));
            }
            JobState::Downloading => {
                if !dispatcher.record_progress(id, snapshot.percent()) {
                    return None;
                }
            }
            JobState::Pending | JobState::Preparing | JobState::Unknown => {}
        }
    }
}
