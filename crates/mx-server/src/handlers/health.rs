use axum::http::StatusCode;

/// Liveness probe; registry health is tracked separately through the TTL
/// check.
pub async fn livez() -> StatusCode {
    StatusCode::OK
}
