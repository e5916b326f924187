use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;

use mx_common::error::ExportError;
use mx_common::model::{Session, ACCESS_TOKEN_HEADER, CARRIED_HEADERS};

use crate::error::ApiError;
use crate::registry::ConsulResolver;
use crate::SharedState;

/// Permission required by every export endpoint.
pub const CONTROL_AGENT_SCREEN: &str = "control_agent_screen";

/// Consul name of the identity provider.
const AUTH_SERVICE: &str = "go.webitel.app";

/// Resolution of a bearer credential by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Authz {
    pub user_id: i64,
    pub domain_id: i64,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Authz {
    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.iter().any(|perm| perm == name)
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authorize(&self, token: &str) -> Result<Authz, ExportError>;
}

/// Identity provider client resolving the auth service through Consul.
pub struct HttpAuthProvider {
    http: reqwest::Client,
    resolver: Arc<ConsulResolver>,
}

impl HttpAuthProvider {
    pub fn new(resolver: Arc<ConsulResolver>) -> Self {
        Self {
            http: reqwest::Client::new(),
            resolver,
        }
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn authorize(&self, token: &str) -> Result<Authz, ExportError> {
        let base = self.resolver.resolve(AUTH_SERVICE).await?;
        let response = self
            .http
            .get(format!("{base}/userinfo"))
            .header(ACCESS_TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|err| ExportError::UpstreamUnavailable(format!("identity provider: {err}")))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ExportError::Unauthenticated(
                "token rejected by identity provider".into(),
            )),
            status if status.is_success() => response.json::<Authz>().await.map_err(|err| {
                ExportError::UpstreamUnavailable(format!("decode identity response: {err}"))
            }),
            status => Err(ExportError::UpstreamUnavailable(format!(
                "identity provider answered {status}"
            ))),
        }
    }
}

/// Authenticated request context: the caller's session, their permissions
/// and the subset of inbound headers snapshotted into background tasks.
#[derive(Debug, Clone)]
pub struct RequestSession {
    pub session: Session,
    pub permissions: Vec<String>,
    pub headers: HashMap<String, String>,
}

/// The explicit subset of inbound headers carried into tasks so workers can
/// authenticate upstream calls after the request context is gone.
pub fn carried_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut carried = HashMap::with_capacity(CARRIED_HEADERS.len());
    for key in CARRIED_HEADERS {
        if let Some(value) = headers.get(key).and_then(|value| value.to_str().ok()) {
            carried.insert(key.to_string(), value.to_string());
        }
    }
    carried
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestSession
where
    SharedState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = SharedState::from_ref(state);

        let token = parts
            .headers
            .get(ACCESS_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ApiError(ExportError::Unauthenticated(format!(
                    "missing {ACCESS_TOKEN_HEADER} header"
                )))
            })?;

        let authz = state.auth.authorize(token).await?;
        if !authz.has_permission(CONTROL_AGENT_SCREEN) {
            return Err(ApiError(ExportError::PermissionDenied(format!(
                "missing required permission {CONTROL_AGENT_SCREEN}"
            ))));
        }

        let session = Session::new(authz.user_id, authz.domain_id, token)?;
        let headers = carried_headers(&parts.headers);

        Ok(RequestSession {
            session,
            permissions: authz.permissions,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn permission_lookup_is_exact() {
        let authz = Authz {
            user_id: 1,
            domain_id: 1,
            permissions: vec!["read_recordings".into(), CONTROL_AGENT_SCREEN.into()],
        };
        assert!(authz.has_permission(CONTROL_AGENT_SCREEN));
        assert!(!authz.has_permission("control_agent"));
    }

    #[test]
    fn carried_headers_keeps_only_the_allowlisted_subset() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("x-webitel-access", HeaderValue::from_static("token-1"));
        headers.insert("x-req-id", HeaderValue::from_static("req-9"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("cookie", HeaderValue::from_static("secret"));

        let carried = carried_headers(&headers);
        assert_eq!(carried.len(), 3);
        assert_eq!(carried["authorization"], "Bearer abc");
        assert_eq!(carried["x-webitel-access"], "token-1");
        assert_eq!(carried["x-req-id"], "req-9");
        assert!(!carried.contains_key("cookie"));
    }
}
