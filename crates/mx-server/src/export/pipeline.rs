use std::path::PathBuf;

use chrono::Utc;
use tracing::{error, info, warn};

use mx_common::db::update_export_status;
use mx_common::error::ExportError;
use mx_common::model::{
    ExportChannel, ExportStatus, ExportTask, Session, StatusUpdate, PDF_MIME,
};

use crate::export::{files, pdf};
use crate::storage::{upload_channel, SearchFilter, UploadMetadata};
use crate::AppState;

/// Removes the intermediate PDF once it has been streamed upstream.
struct TempFile(PathBuf);

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Run one export task to a terminal state. On every exit path the history
/// row has left `processing` (except when even that write fails, which the
/// caller handles by clearing the cache and leaving the row for the
/// operator).
pub async fn execute(
    state: &AppState,
    session: &Session,
    task: &ExportTask,
) -> Result<(), ExportError> {
    let task_id = task.task_id.as_str();

    // Without the history binding the row cannot be transitioned; the cache
    // keeps the failure visible until its TTL runs out.
    let Some(history_id) = state.cache.get_history_id(task_id).await? else {
        if let Err(err) = state.cache.set_status(task_id, ExportStatus::Failed).await {
            warn!(task_id, error = %err, "failed to record failed status in cache");
        }
        return Err(ExportError::Internal(format!(
            "history binding missing for task {task_id}"
        )));
    };

    set_task_status(
        state,
        history_id,
        task_id,
        ExportStatus::Processing,
        session.user_id(),
        None,
    )
    .await?;

    info!(task_id, channel = %task.channel, subject = %task.subject(), "export task started");

    // Queue content is trusted no further than its invariants.
    if let Err(err) = task.validate_subject() {
        fail_task(state, history_id, task_id, session.user_id()).await;
        return Err(err);
    }

    let filter = SearchFilter {
        ids: task.ids.clone(),
        channel: upload_channel(task.channel),
        agent_id: matches!(task.channel, ExportChannel::Screenrecording).then_some(task.agent_id),
        call_id: matches!(task.channel, ExportChannel::Call).then(|| task.call_id.clone()),
        uploaded_from: task.from,
        uploaded_to: task.to,
    };
    let manifest = match state.files.search_recordings(&task.headers, &filter).await {
        Ok(manifest) if manifest.is_empty() => {
            fail_task(state, history_id, task_id, session.user_id()).await;
            return Err(ExportError::NotFound(format!(
                "no files found for task {task_id}"
            )));
        }
        Ok(manifest) => manifest,
        Err(err) => {
            error!(task_id, error = %err, "search recordings failed");
            fail_task(state, history_id, task_id, session.user_id()).await;
            return Err(err);
        }
    };

    let downloaded = match files::download_all(
        state.files.as_ref(),
        &task.headers,
        session.domain_id(),
        &state.temp_dir,
        manifest,
    )
    .await
    {
        Ok(set) if set.is_empty() => {
            fail_task(state, history_id, task_id, session.user_id()).await;
            return Err(ExportError::Internal(format!(
                "no exportable images for task {task_id}"
            )));
        }
        Ok(set) => set,
        Err(err) => {
            error!(task_id, error = %err, "download failed");
            fail_task(state, history_id, task_id, session.user_id()).await;
            return Err(err);
        }
    };

    let items = pdf::collect_items(&downloaded);
    let captions = state.pdf_captions;
    let pdf_bytes =
        match tokio::task::spawn_blocking(move || pdf::generate(&items, captions)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                error!(task_id, error = %err, "pdf generation failed");
                fail_task(state, history_id, task_id, session.user_id()).await;
                return Err(err);
            }
            Err(err) => {
                fail_task(state, history_id, task_id, session.user_id()).await;
                return Err(ExportError::Internal(format!(
                    "pdf generation aborted: {err}"
                )));
            }
        };
    drop(downloaded);

    let file_name = task.file_name();
    let pdf_path = state.temp_dir.join(&file_name);
    if let Err(err) = tokio::fs::write(&pdf_path, &pdf_bytes).await {
        error!(task_id, error = %err, "saving pdf failed");
        fail_task(state, history_id, task_id, session.user_id()).await;
        return Err(err.into());
    }
    let _pdf_guard = TempFile(pdf_path.clone());

    let upload = {
        let file = match tokio::fs::File::open(&pdf_path).await {
            Ok(file) => file,
            Err(err) => {
                fail_task(state, history_id, task_id, session.user_id()).await;
                return Err(err.into());
            }
        };
        let metadata = UploadMetadata {
            name: file_name.clone(),
            mime_type: PDF_MIME.into(),
            uuid: task.task_id.clone(),
            channel: upload_channel(task.channel),
            uploaded_by: session.user_id(),
            domain_id: session.domain_id(),
            created_at: Utc::now().timestamp_millis(),
        };
        match state.files.upload_file(&task.headers, &metadata, file).await {
            Ok(response) => response,
            Err(err) => {
                error!(task_id, error = %err, "upload failed");
                fail_task(state, history_id, task_id, session.user_id()).await;
                return Err(err);
            }
        }
    };

    if let Err(err) = state.cache.set_url(task_id, &file_name).await {
        warn!(task_id, error = %err, "failed to record export url");
    }

    set_task_status(
        state,
        history_id,
        task_id,
        ExportStatus::Done,
        session.user_id(),
        Some(upload.file_id),
    )
    .await?;

    if let Err(err) = state.cache.clear_task(task_id).await {
        warn!(task_id, error = %err, "failed to clear task cache after commit");
    }

    info!(task_id, file_id = upload.file_id, "export task completed");
    Ok(())
}

/// Keep the cache and the history row in step. The cache write is best
/// effort; the database transition is the source of truth and its failure
/// surfaces to the caller.
async fn set_task_status(
    state: &AppState,
    history_id: i64,
    task_id: &str,
    status: ExportStatus,
    updated_by: i64,
    file_id: Option<i64>,
) -> Result<(), ExportError> {
    if let Err(err) = state.cache.set_status(task_id, status).await {
        warn!(task_id, %status, error = %err, "failed to record status in cache");
    }
    update_export_status(
        &state.pool,
        &StatusUpdate {
            id: history_id,
            status,
            updated_by,
            file_id,
        },
    )
    .await
}

async fn fail_task(state: &AppState, history_id: i64, task_id: &str, updated_by: i64) {
    if let Err(err) = set_task_status(
        state,
        history_id,
        task_id,
        ExportStatus::Failed,
        updated_by,
        None,
    )
    .await
    {
        error!(task_id, error = %err, "failed to record failed status");
    }
}
