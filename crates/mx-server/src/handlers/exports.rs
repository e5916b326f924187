use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use mx_common::db::{delete_export_history, list_history_by_agent, list_history_by_call};
use mx_common::error::ExportError;
use mx_common::model::{ExportChannel, HistoryPage};

use crate::auth::RequestSession;
use crate::error::ApiError;
use crate::export::admission::{self, ExportHandle, ExportRequest};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct CreateScreenrecordingExport {
    pub agent_id: i64,
    #[serde(default)]
    pub file_ids: Vec<i64>,
    #[serde(default)]
    pub from: i64,
    #[serde(default)]
    pub to: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCallExport {
    pub call_id: String,
    #[serde(default)]
    pub file_ids: Vec<i64>,
    #[serde(default)]
    pub from: i64,
    #[serde(default)]
    pub to: i64,
}

pub async fn create_screenrecording_export(
    State(state): State<SharedState>,
    session: RequestSession,
    Json(request): Json<CreateScreenrecordingExport>,
) -> Result<Json<ExportHandle>, ApiError> {
    let handle = admission::create_export(
        &state,
        &session,
        ExportRequest {
            channel: ExportChannel::Screenrecording,
            agent_id: request.agent_id,
            call_id: String::new(),
            file_ids: request.file_ids,
            from: request.from,
            to: request.to,
        },
    )
    .await?;
    Ok(Json(handle))
}

pub async fn create_call_export(
    State(state): State<SharedState>,
    session: RequestSession,
    Json(request): Json<CreateCallExport>,
) -> Result<Json<ExportHandle>, ApiError> {
    let handle = admission::create_export(
        &state,
        &session,
        ExportRequest {
            channel: ExportChannel::Call,
            agent_id: 0,
            call_id: request.call_id,
            file_ids: request.file_ids,
            from: request.from,
            to: request.to,
        },
    )
    .await?;
    Ok(Json(handle))
}

fn default_page() -> i64 {
    1
}

fn default_size() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct ListScreenrecordingQuery {
    #[serde(default)]
    pub agent_id: i64,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
    #[serde(default)]
    pub sort: String,
}

#[derive(Debug, Deserialize)]
pub struct ListCallQuery {
    #[serde(default)]
    pub call_id: String,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
    #[serde(default)]
    pub sort: String,
}

pub async fn list_screenrecording_exports(
    State(state): State<SharedState>,
    _session: RequestSession,
    Query(query): Query<ListScreenrecordingQuery>,
) -> Result<Json<HistoryPage>, ApiError> {
    if query.agent_id == 0 {
        return Err(ApiError(ExportError::InvalidArgument(
            "agent_id is required".into(),
        )));
    }
    let page = list_history_by_agent(
        &state.pool,
        query.agent_id,
        query.page,
        query.size,
        &query.sort,
    )
    .await?;
    Ok(Json(page))
}

pub async fn list_call_exports(
    State(state): State<SharedState>,
    _session: RequestSession,
    Query(query): Query<ListCallQuery>,
) -> Result<Json<HistoryPage>, ApiError> {
    if query.call_id.is_empty() {
        return Err(ApiError(ExportError::InvalidArgument(
            "call_id is required".into(),
        )));
    }
    let page = list_history_by_call(
        &state.pool,
        &query.call_id,
        query.page,
        query.size,
        &query.sort,
    )
    .await?;
    Ok(Json(page))
}

#[derive(Debug, Serialize)]
pub struct DeleteExportResponse {
    pub id: i64,
}

pub async fn delete_export(
    State(state): State<SharedState>,
    session: RequestSession,
    Path(id): Path<i64>,
) -> Result<Json<DeleteExportResponse>, ApiError> {
    if id == 0 {
        return Err(ApiError(ExportError::InvalidArgument(
            "id is required".into(),
        )));
    }
    delete_export_history(&state.pool, id, session.session.domain_id()).await?;
    info!(id, "export history record deleted");
    Ok(Json(DeleteExportResponse { id }))
}
