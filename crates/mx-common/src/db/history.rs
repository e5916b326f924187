use chrono::Utc;
use tokio_postgres::Row;
use tracing::instrument;

use crate::db::PgPool;
use crate::error::ExportError;
use crate::model::{ExportStatus, HistoryPage, HistoryRecord, NewHistoryRecord, StatusUpdate};

pub const DEFAULT_PAGE_SIZE: i64 = 20;

const LIST_COLUMNS: &str =
    "h.id, h.name, h.file_id, h.mime, h.uploaded_at, h.updated_at, h.uploaded_by, h.updated_by, h.status";

/// Rows whose file_id points at an upstream object that has since been
/// removed are excluded from listings.
const LIVE_FILE_FILTER: &str = "(h.file_id IS NULL OR EXISTS ( \
        SELECT 1 FROM storage.files f WHERE f.id = h.file_id AND f.removed IS NULL))";

#[instrument(skip(pool, record))]
pub async fn insert_export_history(
    pool: &PgPool,
    record: &NewHistoryRecord,
) -> Result<i64, ExportError> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "INSERT INTO media_exporter.pdf_export_history \
                (name, file_id, mime, uploaded_at, updated_at, uploaded_by, status, agent_id, call_id, dc) \
             VALUES ($1, NULL, $2, $3, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
            &[
                &record.name,
                &record.mime,
                &record.uploaded_at,
                &record.uploaded_by,
                &record.status.as_str(),
                &record.agent_id,
                &record.call_id,
                &record.domain_id,
            ],
        )
        .await?;
    Ok(row.get(0))
}

/// Transition a history row. `file_id` of zero (or `None`) keeps the stored
/// reference; a nonzero value overwrites it.
#[instrument(skip(pool, update))]
pub async fn update_export_status(pool: &PgPool, update: &StatusUpdate) -> Result<(), ExportError> {
    let client = pool.get().await?;
    let file_id = update.file_id.unwrap_or(0);
    let now = Utc::now().timestamp_millis();
    let affected = client
        .execute(
            "UPDATE media_exporter.pdf_export_history \
             SET status = $1, \
                 updated_at = $2, \
                 updated_by = $3, \
                 file_id = COALESCE(NULLIF($4, 0), file_id) \
             WHERE id = $5",
            &[
                &update.status.as_str(),
                &now,
                &update.updated_by,
                &file_id,
                &update.id,
            ],
        )
        .await?;
    if affected == 0 {
        return Err(ExportError::NotFound(format!(
            "export history id={}",
            update.id
        )));
    }
    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_history_by_agent(
    pool: &PgPool,
    agent_id: i64,
    page: i64,
    size: i64,
    sort: &str,
) -> Result<HistoryPage, ExportError> {
    let (page, size, offset, limit) = page_bounds(page, size);
    let query = format!(
        "SELECT {LIST_COLUMNS} \
         FROM media_exporter.pdf_export_history h \
         WHERE h.agent_id = $1 AND {LIVE_FILE_FILTER} \
         ORDER BY {} \
         OFFSET $2 LIMIT $3",
        parse_sort(sort)
    );
    let client = pool.get().await?;
    let rows = client
        .query(query.as_str(), &[&agent_id, &offset, &limit])
        .await?;
    build_page(rows, page, size)
}

#[instrument(skip(pool))]
pub async fn list_history_by_call(
    pool: &PgPool,
    call_id: &str,
    page: i64,
    size: i64,
    sort: &str,
) -> Result<HistoryPage, ExportError> {
    let (page, size, offset, limit) = page_bounds(page, size);
    let query = format!(
        "SELECT {LIST_COLUMNS} \
         FROM media_exporter.pdf_export_history h \
         WHERE h.call_id = $1 AND {LIVE_FILE_FILTER} \
         ORDER BY {} \
         OFFSET $2 LIMIT $3",
        parse_sort(sort)
    );
    let client = pool.get().await?;
    let rows = client
        .query(query.as_str(), &[&call_id, &offset, &limit])
        .await?;
    build_page(rows, page, size)
}

/// Delete a history row, scoped to the caller's domain.
#[instrument(skip(pool))]
pub async fn delete_export_history(
    pool: &PgPool,
    id: i64,
    domain_id: i64,
) -> Result<(), ExportError> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            "DELETE FROM media_exporter.pdf_export_history WHERE id = $1 AND dc = $2",
            &[&id, &domain_id],
        )
        .await?;
    if affected == 0 {
        return Err(ExportError::NotFound(format!("export history id={id}")));
    }
    Ok(())
}

/// Normalise page/size and derive offset plus the over-fetch-by-one limit
/// used to compute the `next` flag.
fn page_bounds(page: i64, size: i64) -> (i64, i64, i64, i64) {
    let page = if page < 1 { 1 } else { page };
    let size = if size <= 0 { DEFAULT_PAGE_SIZE } else { size };
    (page, size, (page - 1) * size, size + 1)
}

/// Translate a `+field`/`-field` sort expression into an ORDER BY clause.
/// Unknown fields and missing direction markers fall back to the default.
fn parse_sort(sort: &str) -> String {
    const DEFAULT: &str = "h.updated_at DESC";

    let Some(direction_marker) = sort.chars().next() else {
        return DEFAULT.into();
    };
    let direction = match direction_marker {
        '+' => "ASC",
        '-' => "DESC",
        _ => return DEFAULT.into(),
    };

    let column = match sort[1..].trim().to_ascii_lowercase().as_str() {
        "created_at" => "h.uploaded_at",
        "updated_at" => "h.updated_at",
        "created_by" => "h.uploaded_by",
        "name" => "h.name",
        "status" => "h.status",
        _ => return DEFAULT.into(),
    };

    format!("{column} {direction}")
}

fn build_page(rows: Vec<Row>, page: i64, size: i64) -> Result<HistoryPage, ExportError> {
    let mut items = rows
        .into_iter()
        .map(record_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let next = items.len() as i64 > size;
    if next {
        items.truncate(size as usize);
    }

    Ok(HistoryPage { page, next, items })
}

fn record_from_row(row: Row) -> Result<HistoryRecord, ExportError> {
    let status: String = row.get("status");
    let status = ExportStatus::parse(&status)
        .ok_or_else(|| ExportError::Internal(format!("unknown export status: {status}")))?;

    Ok(HistoryRecord {
        id: row.get("id"),
        name: row.get("name"),
        file_id: row.get("file_id"),
        mime: row.get("mime"),
        uploaded_at: row.get("uploaded_at"),
        updated_at: row.get("updated_at"),
        uploaded_by: row.get("uploaded_by"),
        updated_by: row.get("updated_by"),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_allowlist_and_direction() {
        assert_eq!(parse_sort("-updated_at"), "h.updated_at DESC");
        assert_eq!(parse_sort("+name"), "h.name ASC");
        assert_eq!(parse_sort("+created_at"), "h.uploaded_at ASC");
        assert_eq!(parse_sort("-created_by"), "h.uploaded_by DESC");
        assert_eq!(parse_sort("+status"), "h.status ASC");
    }

    #[test]
    fn sort_falls_back_to_default() {
        assert_eq!(parse_sort(""), "h.updated_at DESC");
        assert_eq!(parse_sort("updated_at"), "h.updated_at DESC");
        assert_eq!(parse_sort("-uploaded_by"), "h.updated_at DESC");
        assert_eq!(parse_sort("-id; DROP TABLE x"), "h.updated_at DESC");
    }

    #[test]
    fn page_bounds_defaults_and_overfetch() {
        assert_eq!(page_bounds(1, 20), (1, 20, 0, 21));
        assert_eq!(page_bounds(3, 10), (3, 10, 20, 11));
        assert_eq!(page_bounds(0, 0), (1, DEFAULT_PAGE_SIZE, 0, DEFAULT_PAGE_SIZE + 1));
        assert_eq!(page_bounds(-5, -1), (1, DEFAULT_PAGE_SIZE, 0, DEFAULT_PAGE_SIZE + 1));
    }
}
