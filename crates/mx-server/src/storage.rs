use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use mx_common::error::ExportError;
use mx_common::model::ExportChannel;

use crate::registry::ConsulResolver;

/// Consul name of the upstream file service.
const STORAGE_SERVICE: &str = "storage";

/// Upload chunking granularity.
pub const UPLOAD_CHUNK_SIZE: usize = 32 * 1024;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ExportError>> + Send>>;

/// Channel understood by the upstream file service. Both export channels
/// produce screen-recording media upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadChannel {
    ScreenRecording,
}

pub fn upload_channel(channel: ExportChannel) -> UploadChannel {
    match channel {
        ExportChannel::Screenrecording | ExportChannel::Call => UploadChannel::ScreenRecording,
    }
}

/// One entry of the manifest returned by the upstream search.
#[derive(Debug, Clone, Deserialize)]
pub struct FileDescriptor {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Unix timestamp of the upload; upstream descriptors carry either
    /// seconds or milliseconds.
    #[serde(default)]
    pub uploaded_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchFilter {
    pub ids: Vec<i64>,
    pub channel: UploadChannel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub uploaded_from: i64,
    pub uploaded_to: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadMetadata {
    pub name: String,
    pub mime_type: String,
    pub uuid: String,
    pub channel: UploadChannel,
    pub uploaded_by: i64,
    pub domain_id: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub file_id: i64,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<FileDescriptor>,
}

/// Upstream file service. Workers authenticate with the header snapshot
/// carried inside the task, not with any ambient request context.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn search_recordings(
        &self,
        headers: &HashMap<String, String>,
        filter: &SearchFilter,
    ) -> Result<Vec<FileDescriptor>, ExportError>;

    async fn download_file(
        &self,
        headers: &HashMap<String, String>,
        id: i64,
        domain_id: i64,
    ) -> Result<ByteStream, ExportError>;

    async fn upload_file(
        &self,
        headers: &HashMap<String, String>,
        metadata: &UploadMetadata,
        file: tokio::fs::File,
    ) -> Result<UploadResponse, ExportError>;
}

/// HTTP client for the file service, resolved through Consul with
/// round-robin across healthy backends.
pub struct HttpFileService {
    http: reqwest::Client,
    resolver: Arc<ConsulResolver>,
}

impl HttpFileService {
    pub fn new(resolver: Arc<ConsulResolver>) -> Self {
        Self {
            http: reqwest::Client::new(),
            resolver,
        }
    }

    fn apply_headers(
        mut request: reqwest::RequestBuilder,
        headers: &HashMap<String, String>,
    ) -> reqwest::RequestBuilder {
        for (name, value) in headers {
            request = request.header(name, value);
        }
        request
    }
}

fn upstream_err(context: &str, err: reqwest::Error) -> ExportError {
    ExportError::UpstreamUnavailable(format!("{context}: {err}"))
}

#[async_trait]
impl FileService for HttpFileService {
    async fn search_recordings(
        &self,
        headers: &HashMap<String, String>,
        filter: &SearchFilter,
    ) -> Result<Vec<FileDescriptor>, ExportError> {
        let base = self.resolver.resolve(STORAGE_SERVICE).await?;
        let request = self
            .http
            .post(format!("{base}/v1/recordings/search"))
            .json(filter);

        let response = Self::apply_headers(request, headers)
            .send()
            .await
            .map_err(|err| upstream_err("search recordings", err))?;
        if !response.status().is_success() {
            return Err(ExportError::UpstreamUnavailable(format!(
                "search recordings answered {}",
                response.status()
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|err| upstream_err("decode search response", err))?;
        Ok(body.items)
    }

    async fn download_file(
        &self,
        headers: &HashMap<String, String>,
        id: i64,
        domain_id: i64,
    ) -> Result<ByteStream, ExportError> {
        let base = self.resolver.resolve(STORAGE_SERVICE).await?;
        let request = self
            .http
            .get(format!("{base}/v1/files/{id}/stream"))
            .query(&[("domain_id", domain_id)]);

        let response = Self::apply_headers(request, headers)
            .send()
            .await
            .map_err(|err| upstream_err("init download stream", err))?;
        if !response.status().is_success() {
            return Err(ExportError::UpstreamUnavailable(format!(
                "download of file {id} answered {}",
                response.status()
            )));
        }

        let stream = response
            .bytes_stream()
            .map_err(|err| upstream_err("recv chunk", err));
        Ok(Box::pin(stream))
    }

    async fn upload_file(
        &self,
        headers: &HashMap<String, String>,
        metadata: &UploadMetadata,
        file: tokio::fs::File,
    ) -> Result<UploadResponse, ExportError> {
        let base = self.resolver.resolve(STORAGE_SERVICE).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::with_capacity(file, UPLOAD_CHUNK_SIZE));
        let request = self
            .http
            .post(format!("{base}/v1/files"))
            .query(metadata)
            .body(body);

        let response = Self::apply_headers(request, headers)
            .send()
            .await
            .map_err(|err| upstream_err("upload file", err))?;
        if !response.status().is_success() {
            return Err(ExportError::UpstreamUnavailable(format!(
                "upload answered {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| upstream_err("decode upload response", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_export_channels_map_to_screen_recording() {
        assert_eq!(
            upload_channel(ExportChannel::Screenrecording),
            UploadChannel::ScreenRecording
        );
        assert_eq!(
            upload_channel(ExportChannel::Call),
            UploadChannel::ScreenRecording
        );
    }

    #[test]
    fn upload_channel_serializes_snake_case() {
        let value = serde_json::to_value(UploadChannel::ScreenRecording).unwrap();
        assert_eq!(value, "screen_recording");
    }
}
