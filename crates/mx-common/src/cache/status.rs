use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::ExportError;
use crate::model::ExportStatus;

const STATUS_PREFIX: &str = "export_status:";
const HISTORY_PREFIX: &str = "export_history_id:";
const URL_PREFIX: &str = "export_url:";
const TASK_PREFIX: &str = "export:task:";

/// Every cache entry expires after 24 hours; the TTL refreshes on write.
const ENTRY_TTL_SECS: u64 = 24 * 60 * 60;

/// Typed helpers over the per-task cache keys: lifecycle status, the binding
/// to the history row, and the final object name.
#[derive(Clone)]
pub struct StatusCache {
    conn: ConnectionManager,
}

impl StatusCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Returns the raw status value, or an empty string when the key is
    /// absent (absence is not an error).
    pub async fn get_status(&self, task_id: &str) -> Result<String, ExportError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(format!("{STATUS_PREFIX}{task_id}")).await?;
        Ok(value.unwrap_or_default())
    }

    pub async fn set_status(&self, task_id: &str, status: ExportStatus) -> Result<(), ExportError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(
            format!("{STATUS_PREFIX}{task_id}"),
            status.as_str(),
            ENTRY_TTL_SECS,
        )
        .await?;
        debug!(task_id, %status, "export status updated");
        Ok(())
    }

    /// Whether any status binding exists for this task id.
    pub async fn exists_any(&self, task_id: &str) -> Result<bool, ExportError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(format!("{STATUS_PREFIX}{task_id}")).await?)
    }

    pub async fn get_history_id(&self, task_id: &str) -> Result<Option<i64>, ExportError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(format!("{HISTORY_PREFIX}{task_id}")).await?)
    }

    pub async fn set_history_id(&self, task_id: &str, history_id: i64) -> Result<(), ExportError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(
            format!("{HISTORY_PREFIX}{task_id}"),
            history_id,
            ENTRY_TTL_SECS,
        )
        .await?;
        Ok(())
    }

    pub async fn get_url(&self, task_id: &str) -> Result<Option<String>, ExportError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(format!("{URL_PREFIX}{task_id}")).await?)
    }

    pub async fn set_url(&self, task_id: &str, url: &str) -> Result<(), ExportError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(format!("{URL_PREFIX}{task_id}"), url, ENTRY_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Delete every key bound to the task. Called once a task reaches a
    /// terminal state; the TTL is the backstop when this fails.
    pub async fn clear_task(&self, task_id: &str) -> Result<(), ExportError> {
        let keys = [
            format!("{STATUS_PREFIX}{task_id}"),
            format!("{HISTORY_PREFIX}{task_id}"),
            format!("{URL_PREFIX}{task_id}"),
            format!("{TASK_PREFIX}{task_id}"),
        ];
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&keys[..]).await?;
        debug!(task_id, "export task cache cleared");
        Ok(())
    }
}
