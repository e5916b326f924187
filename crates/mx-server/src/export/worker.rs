use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mx_common::cache::QueueError;
use mx_common::model::{ExportType, Session, ACCESS_TOKEN_HEADER};

use crate::export::pipeline;
use crate::SharedState;

/// Pause after an empty pop (or a queue hiccup) before polling again.
const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Launch the background worker pool. Workers belong to the process, not to
/// any request; the single cancellation token stops all of them between
/// tasks. The queue is left untouched on shutdown: it is durable, a future
/// process pops whatever remains.
pub fn spawn_workers(
    state: SharedState,
    count: usize,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (1..=count)
        .map(|worker_id| {
            let state = state.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker_loop(worker_id, state, shutdown).await })
        })
        .collect()
}

async fn worker_loop(worker_id: usize, state: SharedState, shutdown: CancellationToken) {
    info!(worker_id, "export worker started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let task = match state.queue.pop().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                idle(&shutdown).await;
                continue;
            }
            Err(QueueError::Malformed(detail)) => {
                warn!(worker_id, %detail, "discarded malformed task");
                continue;
            }
            Err(QueueError::Unavailable(detail)) => {
                error!(worker_id, %detail, "queue pop failed");
                idle(&shutdown).await;
                continue;
            }
        };

        let token = task
            .headers
            .get(ACCESS_TOKEN_HEADER)
            .cloned()
            .unwrap_or_default();
        let session = match Session::new(task.user_id, task.domain_id, token) {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    worker_id,
                    task_id = %task.task_id,
                    error = %err,
                    "dropping task without a usable identity snapshot"
                );
                clear_task(&state, &task.task_id).await;
                continue;
            }
        };

        match task.export_type {
            ExportType::Pdf => {
                if let Err(err) = pipeline::execute(&state, &session, &task).await {
                    error!(
                        worker_id,
                        task_id = %task.task_id,
                        error = %err,
                        "export task failed"
                    );
                    clear_task(&state, &task.task_id).await;
                }
            }
            ExportType::Zip => panic!("zip export is not implemented"),
        }
    }

    info!(worker_id, "export worker stopped");
}

async fn idle(shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(IDLE_SLEEP) => {}
    }
}

async fn clear_task(state: &SharedState, task_id: &str) {
    if let Err(err) = state.cache.clear_task(task_id).await {
        warn!(task_id, error = %err, "failed to clear task cache");
    }
}
