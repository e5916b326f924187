pub mod queue;
pub mod status;

pub use queue::{QueueError, TaskQueue};
pub use status::StatusCache;

use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::error::ExportError;

/// Connect to Redis and verify the connection with a bounded PING before the
/// service starts accepting work.
pub async fn connect(
    addr: &str,
    password: &str,
    db: i64,
) -> Result<ConnectionManager, ExportError> {
    let url = if password.is_empty() {
        format!("redis://{addr}/{db}")
    } else {
        format!("redis://:{password}@{addr}/{db}")
    };

    let client = redis::Client::open(url)
        .map_err(|err| ExportError::CacheUnavailable(format!("invalid redis address: {err}")))?;
    let mut conn = ConnectionManager::new(client)
        .await
        .map_err(|err| ExportError::CacheUnavailable(format!("cannot connect to redis at {addr}: {err}")))?;

    tokio::time::timeout(
        Duration::from_secs(2),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| ExportError::CacheUnavailable(format!("redis ping timed out: {addr}")))?
    .map_err(|err| ExportError::CacheUnavailable(format!("redis ping failed: {err}")))?;

    Ok(conn)
}
