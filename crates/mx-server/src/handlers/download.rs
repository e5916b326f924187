use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use serde::Deserialize;

use mx_common::error::ExportError;
use mx_common::model::PDF_MIME;

use crate::auth::RequestSession;
use crate::error::ApiError;
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub domain_id: i64,
}

/// Stream the finished export back to the caller, chunk by chunk, straight
/// from the upstream file service.
pub async fn download_export(
    State(state): State<SharedState>,
    session: RequestSession,
    Path(id): Path<i64>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    if id == 0 {
        return Err(ApiError(ExportError::InvalidArgument(
            "file_id is required".into(),
        )));
    }

    let stream = state
        .files
        .download_file(&session.headers, id, query.domain_id)
        .await?;

    Response::builder()
        .header(CONTENT_TYPE, PDF_MIME)
        .body(Body::from_stream(stream))
        .map_err(|err| ApiError(ExportError::Internal(format!("build response: {err}"))))
}
