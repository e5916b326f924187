use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Unified error taxonomy for the export service. Every variant carries a
/// free-form detail and maps to a stable string id used for translation in
/// the wire envelope.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("export already in progress: {0}")]
    AlreadyInProgress(String),
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExportError {
    pub fn id(&self) -> &'static str {
        match self {
            ExportError::Unauthenticated(_) => "app.auth.unauthenticated",
            ExportError::PermissionDenied(_) => "app.auth.permission_denied",
            ExportError::InvalidArgument(_) => "app.args.invalid",
            ExportError::NotFound(_) => "app.record.not_found",
            ExportError::AlreadyInProgress(_) => "app.export.already_in_progress",
            ExportError::UniqueViolation(_) => "app.store.unique_violation",
            ExportError::ForeignKeyViolation(_) => "app.store.foreign_key_violation",
            ExportError::QueueUnavailable(_) => "app.queue.unavailable",
            ExportError::CacheUnavailable(_) => "app.cache.unavailable",
            ExportError::UpstreamUnavailable(_) => "app.upstream.unavailable",
            ExportError::Internal(_) => "app.process.internal",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            ExportError::Unauthenticated(detail)
            | ExportError::PermissionDenied(detail)
            | ExportError::InvalidArgument(detail)
            | ExportError::NotFound(detail)
            | ExportError::AlreadyInProgress(detail)
            | ExportError::UniqueViolation(detail)
            | ExportError::ForeignKeyViolation(detail)
            | ExportError::QueueUnavailable(detail)
            | ExportError::CacheUnavailable(detail)
            | ExportError::UpstreamUnavailable(detail)
            | ExportError::Internal(detail) => detail,
        }
    }
}

impl From<PoolError> for ExportError {
    fn from(err: PoolError) -> Self {
        ExportError::Internal(format!("failed to get postgres connection: {err}"))
    }
}

impl From<tokio_postgres::Error> for ExportError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            if *db.code() == SqlState::UNIQUE_VIOLATION {
                return ExportError::UniqueViolation(
                    db.constraint().unwrap_or("unknown constraint").to_string(),
                );
            }
            if *db.code() == SqlState::FOREIGN_KEY_VIOLATION {
                return ExportError::ForeignKeyViolation(
                    db.table().unwrap_or("unknown table").to_string(),
                );
            }
        }
        ExportError::Internal(format!("postgres error: {err}"))
    }
}

impl From<redis::RedisError> for ExportError {
    fn from(err: redis::RedisError) -> Self {
        ExportError::CacheUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Internal(format!("io error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_per_variant() {
        assert_eq!(
            ExportError::Unauthenticated("x".into()).id(),
            "app.auth.unauthenticated"
        );
        assert_eq!(
            ExportError::AlreadyInProgress("t".into()).id(),
            "app.export.already_in_progress"
        );
        assert_eq!(
            ExportError::UniqueViolation("c".into()).id(),
            "app.store.unique_violation"
        );
        assert_eq!(ExportError::Internal("x".into()).id(), "app.process.internal");
    }

    #[test]
    fn detail_returns_inner_message_without_prefix() {
        let err = ExportError::NotFound("export history id=7".into());
        assert_eq!(err.detail(), "export history id=7");
        assert_eq!(err.to_string(), "not found: export history id=7");
    }
}
