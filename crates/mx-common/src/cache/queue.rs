use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::debug;

use crate::error::ExportError;
use crate::model::ExportTask;

/// Single durable FIFO holding serialized export tasks.
const QUEUE_KEY: &str = "export_queue";

/// How long a blocking pop waits before reporting an empty queue.
const POP_TIMEOUT_SECS: f64 = 5.0;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    /// The popped blob failed to deserialize. The message is already gone
    /// from the queue by the time this is reported.
    #[error("malformed task discarded: {0}")]
    Malformed(String),
}

impl From<QueueError> for ExportError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Unavailable(detail) => ExportError::QueueUnavailable(detail),
            QueueError::Malformed(detail) => ExportError::Internal(detail),
        }
    }
}

/// Redis-backed task queue: push appends at the tail, pop blocks on the head.
/// FIFO per producer, at-least-once delivery, no redelivery on failure.
#[derive(Clone)]
pub struct TaskQueue {
    conn: ConnectionManager,
}

impl TaskQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn push(&self, task: &ExportTask) -> Result<(), QueueError> {
        let payload = serde_json::to_string(task)
            .map_err(|err| QueueError::Malformed(format!("serialize task: {err}")))?;

        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(QUEUE_KEY, payload)
            .await
            .map_err(|err| QueueError::Unavailable(err.to_string()))?;

        debug!(task_id = %task.task_id, "pushed export task");
        Ok(())
    }

    /// Blocking pop from the head, bounded by the queue timeout. `Ok(None)`
    /// means the queue stayed empty for the whole window.
    pub async fn pop(&self) -> Result<Option<ExportTask>, QueueError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn
            .blpop(QUEUE_KEY, POP_TIMEOUT_SECS)
            .await
            .map_err(|err| QueueError::Unavailable(err.to_string()))?;

        match popped {
            Some((_key, payload)) => {
                let task: ExportTask = serde_json::from_str(&payload)
                    .map_err(|err| QueueError::Malformed(format!("deserialize task: {err}")))?;
                debug!(task_id = %task.task_id, "popped export task");
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_errors_map_into_taxonomy() {
        let err: ExportError = QueueError::Unavailable("down".into()).into();
        assert!(matches!(err, ExportError::QueueUnavailable(_)));

        let err: ExportError = QueueError::Malformed("bad json".into()).into();
        assert!(matches!(err, ExportError::Internal(_)));
    }
}
