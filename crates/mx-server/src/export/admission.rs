use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use mx_common::db::insert_export_history;
use mx_common::error::ExportError;
use mx_common::model::{
    ExportChannel, ExportStatus, ExportTask, ExportType, NewHistoryRecord, PDF_MIME,
};

use crate::auth::RequestSession;
use crate::AppState;

/// A validated create request, channel-specific subject included.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub channel: ExportChannel,
    pub agent_id: i64,
    pub call_id: String,
    pub file_ids: Vec<i64>,
    pub from: i64,
    pub to: i64,
}

/// Handle returned to the caller; the actual work happens in the background.
#[derive(Debug, Clone, Serialize)]
pub struct ExportHandle {
    pub task_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub status: ExportStatus,
    pub size: i64,
}

/// Deduplication fingerprint. The second-granularity timestamp is the dedupe
/// window: identical requests within the same second collapse onto one task.
pub fn build_task_id(channel: ExportChannel, subject: &str, at: DateTime<Utc>) -> String {
    format!(
        "pdf_{}_{}_{}",
        channel.prefix(),
        subject,
        at.format("%Y-%m-%d_%H_%M_%S")
    )
}

/// Synchronous admission path: validate, deduplicate, persist the pending
/// history row, bind it in the cache and enqueue the task.
///
/// A failed history insert leaves no cache or queue traces. Failures after
/// the insert leave the `pending` row in place for operator reconciliation
/// rather than rolling back attempted work.
pub async fn create_export(
    state: &AppState,
    caller: &RequestSession,
    request: ExportRequest,
) -> Result<ExportHandle, ExportError> {
    let subject = match request.channel {
        ExportChannel::Screenrecording => {
            if request.agent_id == 0 {
                return Err(ExportError::InvalidArgument("agent_id is required".into()));
            }
            request.agent_id.to_string()
        }
        ExportChannel::Call => {
            if request.call_id.is_empty() {
                return Err(ExportError::InvalidArgument("call_id is required".into()));
            }
            request.call_id.clone()
        }
    };

    let now = Utc::now();
    let task_id = build_task_id(request.channel, &subject, now);

    let status = state.cache.get_status(&task_id).await?;
    if status == ExportStatus::Pending.as_str() || status == ExportStatus::Processing.as_str() {
        return Err(ExportError::AlreadyInProgress(task_id));
    }
    let terminal = ExportStatus::parse(&status)
        .map(|status| status.is_terminal())
        .unwrap_or(false);
    if !terminal && state.cache.exists_any(&task_id).await? {
        return Err(ExportError::AlreadyInProgress(task_id));
    }

    let history = NewHistoryRecord {
        name: format!("{task_id}.pdf"),
        mime: PDF_MIME.into(),
        uploaded_at: now.timestamp_millis(),
        uploaded_by: caller.session.user_id(),
        status: ExportStatus::Pending,
        agent_id: matches!(request.channel, ExportChannel::Screenrecording)
            .then_some(request.agent_id),
        call_id: matches!(request.channel, ExportChannel::Call)
            .then(|| request.call_id.clone()),
        domain_id: caller.session.domain_id(),
    };
    let history_id = insert_export_history(&state.pool, &history).await?;

    state.cache.set_history_id(&task_id, history_id).await?;

    let task = ExportTask {
        task_id: task_id.clone(),
        agent_id: request.agent_id,
        call_id: request.call_id,
        user_id: caller.session.user_id(),
        domain_id: caller.session.domain_id(),
        channel: request.channel,
        from: request.from,
        to: request.to,
        export_type: ExportType::Pdf,
        headers: caller.headers.clone(),
        ids: request.file_ids,
    };
    state.queue.push(&task).await?;

    state
        .cache
        .set_status(&task_id, ExportStatus::Pending)
        .await?;

    info!(%task_id, history_id, "export task admitted");

    Ok(ExportHandle {
        task_id,
        file_name: history.name,
        mime_type: PDF_MIME.into(),
        status: ExportStatus::Pending,
        size: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn fingerprint_format_per_channel() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 30).unwrap();
        assert_eq!(
            build_task_id(ExportChannel::Screenrecording, "42", at),
            "pdf_ss_42_2024-05-01_10_20_30"
        );
        assert_eq!(
            build_task_id(ExportChannel::Call, "c-77", at),
            "pdf_vc_c-77_2024-05-01_10_20_30"
        );
    }

    #[test]
    fn fingerprint_collapses_within_a_second() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 30).unwrap();
        let same_second = at + Duration::milliseconds(900);
        let next_second = at + Duration::seconds(1);

        let base = build_task_id(ExportChannel::Screenrecording, "7", at);
        assert_eq!(
            base,
            build_task_id(ExportChannel::Screenrecording, "7", same_second)
        );
        assert_ne!(
            base,
            build_task_id(ExportChannel::Screenrecording, "7", next_second)
        );
    }
}
