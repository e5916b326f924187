use std::any::Any;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use mx_common::error::ExportError;

/// Wire-level wrapper carrying the JSON error envelope
/// `{id, detail, code, status}` inside the response body.
#[derive(Debug)]
pub struct ApiError(pub ExportError);

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    id: &'a str,
    detail: &'a str,
    code: u16,
    status: &'a str,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            ExportError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ExportError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ExportError::InvalidArgument(_)
            | ExportError::NotFound(_)
            | ExportError::AlreadyInProgress(_)
            | ExportError::UniqueViolation(_)
            | ExportError::ForeignKeyViolation(_) => StatusCode::BAD_REQUEST,
            ExportError::QueueUnavailable(_)
            | ExportError::CacheUnavailable(_)
            | ExportError::UpstreamUnavailable(_)
            | ExportError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorEnvelope {
            id: self.0.id(),
            detail: self.0.detail(),
            code: status.as_u16(),
            status: status.canonical_reason().unwrap_or(""),
        });
        (status, body).into_response()
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        ApiError(err)
    }
}

/// Recovery boundary for panicking handlers: log the payload with the
/// request outcome and answer with the internal-error envelope.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic payload not string".into());

    error!(panic_message = %detail, "request handler panicked");

    ApiError(ExportError::Internal("request handler panicked".into())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_error_class() {
        let cases = [
            (ExportError::Unauthenticated("x".into()), StatusCode::UNAUTHORIZED),
            (ExportError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (ExportError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (ExportError::NotFound("x".into()), StatusCode::BAD_REQUEST),
            (ExportError::AlreadyInProgress("x".into()), StatusCode::BAD_REQUEST),
            (ExportError::UniqueViolation("x".into()), StatusCode::BAD_REQUEST),
            (ExportError::QueueUnavailable("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ExportError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status_code(), expected);
        }
    }

    #[tokio::test]
    async fn envelope_carries_id_detail_code_and_status() {
        let response =
            ApiError(ExportError::AlreadyInProgress("pdf_ss_42".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["id"], "app.export.already_in_progress");
        assert_eq!(body["detail"], "pdf_ss_42");
        assert_eq!(body["code"], 400);
        assert_eq!(body["status"], "Bad Request");
    }
}
