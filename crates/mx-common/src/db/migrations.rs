use tracing::info;

use crate::db::PgPool;
use crate::error::ExportError;

/// Idempotent schema bootstrap for the export history table. The upstream
/// file registry (`storage.files`) belongs to the storage service and is not
/// created here; listings soft-join against it when present.
const SCHEMA_SQL: &str = "
CREATE SCHEMA IF NOT EXISTS media_exporter;

CREATE TABLE IF NOT EXISTS media_exporter.pdf_export_history (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT      NOT NULL,
    file_id     BIGINT,
    mime        TEXT      NOT NULL,
    uploaded_at BIGINT    NOT NULL,
    updated_at  BIGINT    NOT NULL,
    uploaded_by BIGINT,
    updated_by  BIGINT,
    status      TEXT      NOT NULL,
    agent_id    BIGINT,
    call_id     TEXT,
    dc          BIGINT    NOT NULL
);

CREATE INDEX IF NOT EXISTS pdf_export_history_agent_uploaded_idx
    ON media_exporter.pdf_export_history (agent_id, uploaded_at DESC);

CREATE INDEX IF NOT EXISTS pdf_export_history_call_uploaded_idx
    ON media_exporter.pdf_export_history (call_id, uploaded_at DESC);
";

pub async fn run_migrations(pool: &PgPool) -> Result<(), ExportError> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA_SQL).await?;
    info!("export history schema is up to date");
    Ok(())
}
