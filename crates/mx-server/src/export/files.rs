use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::{stream, StreamExt};
use image::imageops::FilterType;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use mx_common::error::ExportError;

use crate::storage::{FileDescriptor, FileService};

/// Sub-workers downloading concurrently per task; bounds peak disk and
/// memory regardless of the worker-pool size.
pub const DOWNLOAD_WORKERS: usize = 4;

/// Target width for page images; height stays proportional.
pub const RESIZE_WIDTH: u32 = 400;

const VALID_IMAGE_MIMES: [&str; 5] = [
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "image/bmp",
];

pub fn is_valid_image_mime(mime: &str) -> bool {
    VALID_IMAGE_MIMES.contains(&mime)
}

/// File extension derived from the MIME type; unknown types fall back to the
/// subtype tail, or nothing when there is none.
pub fn file_ext(mime: &str) -> String {
    match mime {
        "image/png" => ".png".into(),
        "image/jpeg" | "image/jpg" => ".jpg".into(),
        "image/gif" => ".gif".into(),
        "image/bmp" => ".bmp".into(),
        other => match other.rsplit_once('/') {
            Some((_, tail)) if !tail.is_empty() => format!(".{tail}"),
            _ => String::new(),
        },
    }
}

#[derive(Debug)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub descriptor: FileDescriptor,
}

/// Downloaded manifest keyed by stringified file id. Owns the temp files:
/// they are removed when the set is dropped, on success and failure alike.
#[derive(Debug, Default)]
pub struct DownloadSet {
    files: HashMap<String, DownloadedFile>,
}

impl DownloadSet {
    fn insert(&mut self, descriptor: FileDescriptor, path: PathBuf) {
        self.files
            .insert(descriptor.id.to_string(), DownloadedFile { path, descriptor });
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn files(&self) -> impl Iterator<Item = &DownloadedFile> {
        self.files.values()
    }
}

impl Drop for DownloadSet {
    fn drop(&mut self) {
        for file in self.files.values() {
            if let Err(err) = std::fs::remove_file(&file.path) {
                debug!(path = %file.path.display(), error = %err, "temp image already gone");
            }
        }
    }
}

/// Fetch and downscale the whole manifest with a bounded sub-worker pool.
/// MIME rejections and stale descriptors are skipped with a warning; a hard
/// download failure aborts the task (partial files are cleaned up by the
/// returned set's drop).
pub async fn download_all(
    service: &dyn FileService,
    headers: &HashMap<String, String>,
    domain_id: i64,
    temp_dir: &Path,
    descriptors: Vec<FileDescriptor>,
) -> Result<DownloadSet, ExportError> {
    let mut set = DownloadSet::default();

    let mut downloads = stream::iter(descriptors.into_iter().map(|descriptor| async move {
        let outcome = download_and_resize(service, headers, domain_id, temp_dir, &descriptor).await;
        (descriptor, outcome)
    }))
    .buffer_unordered(DOWNLOAD_WORKERS);

    // Drain every in-flight download even after a failure so no partially
    // written temp file escapes the cleanup below.
    let mut failure = None;
    while let Some((descriptor, outcome)) = downloads.next().await {
        match outcome {
            Ok(Some(path)) => set.insert(descriptor, path),
            Ok(None) => {}
            Err(err) => failure = failure.or(Some(err)),
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(set),
    }
}

async fn download_and_resize(
    service: &dyn FileService,
    headers: &HashMap<String, String>,
    domain_id: i64,
    temp_dir: &Path,
    descriptor: &FileDescriptor,
) -> Result<Option<PathBuf>, ExportError> {
    // Upstream occasionally returns stale or half-filled descriptors; those
    // are skipped rather than failing the whole export.
    if descriptor.id == 0 || descriptor.name.is_empty() {
        warn!(
            file_id = descriptor.id,
            name = %descriptor.name,
            "skipping invalid file descriptor"
        );
        return Ok(None);
    }
    if !is_valid_image_mime(&descriptor.mime_type) {
        warn!(
            file_id = descriptor.id,
            mime = %descriptor.mime_type,
            "skipping file with unsupported mime type"
        );
        return Ok(None);
    }

    let path = temp_dir.join(format!(
        "{}_{}{}",
        descriptor.id,
        descriptor.name,
        file_ext(&descriptor.mime_type)
    ));

    download_to_file(service, headers, domain_id, descriptor.id, &path).await?;

    let resize_target = path.clone();
    match tokio::task::spawn_blocking(move || resize_image(&resize_target, RESIZE_WIDTH)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(
            file_id = descriptor.id,
            error = %err,
            "resize failed, keeping original image"
        ),
        Err(err) => warn!(
            file_id = descriptor.id,
            error = %err,
            "resize task aborted, keeping original image"
        ),
    }

    Ok(Some(path))
}

async fn download_to_file(
    service: &dyn FileService,
    headers: &HashMap<String, String>,
    domain_id: i64,
    file_id: i64,
    path: &Path,
) -> Result<(), ExportError> {
    match write_stream_to_file(service, headers, domain_id, file_id, path).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = tokio::fs::remove_file(path).await;
            Err(err)
        }
    }
}

async fn write_stream_to_file(
    service: &dyn FileService,
    headers: &HashMap<String, String>,
    domain_id: i64,
    file_id: i64,
    path: &Path,
) -> Result<(), ExportError> {
    let mut stream = service.download_file(headers, file_id, domain_id).await?;
    let mut out = tokio::fs::File::create(path).await?;
    while let Some(chunk) = stream.next().await {
        out.write_all(&chunk?).await?;
    }
    out.flush().await?;
    Ok(())
}

/// Downscale an image on disk to the given width (Lanczos, height kept
/// proportional), writing back in place. Non-image content fails to decode
/// and leaves the file untouched.
pub fn resize_image(path: &Path, width: u32) -> Result<(), ExportError> {
    let img = image::open(path)
        .map_err(|err| ExportError::Internal(format!("decode image: {err}")))?;
    let resized = img.resize(width, u32::MAX, FilterType::Lanczos3);
    resized
        .save(path)
        .map_err(|err| ExportError::Internal(format!("save resized image: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ByteStream, SearchFilter, UploadMetadata, UploadResponse};
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageOutputFormat::Png).unwrap();
        buf.into_inner()
    }

    /// File service stub backed by in-memory blobs; ids listed in `broken`
    /// fail the download stream mid-transfer.
    struct StubFileService {
        blobs: HashMap<i64, Vec<u8>>,
        broken: Vec<i64>,
    }

    #[async_trait]
    impl FileService for StubFileService {
        async fn search_recordings(
            &self,
            _headers: &HashMap<String, String>,
            _filter: &SearchFilter,
        ) -> Result<Vec<FileDescriptor>, ExportError> {
            unimplemented!("not exercised here")
        }

        async fn download_file(
            &self,
            _headers: &HashMap<String, String>,
            id: i64,
            _domain_id: i64,
        ) -> Result<ByteStream, ExportError> {
            if self.broken.contains(&id) {
                let chunks: Vec<Result<Bytes, ExportError>> = vec![
                    Ok(Bytes::from_static(b"partial")),
                    Err(ExportError::UpstreamUnavailable("stream reset".into())),
                ];
                return Ok(Box::pin(futures::stream::iter(chunks)));
            }
            let blob = self
                .blobs
                .get(&id)
                .cloned()
                .ok_or_else(|| ExportError::NotFound(format!("file {id}")))?;
            let chunks: Vec<Result<Bytes, ExportError>> = vec![Ok(Bytes::from(blob))];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        async fn upload_file(
            &self,
            _headers: &HashMap<String, String>,
            _metadata: &UploadMetadata,
            _file: tokio::fs::File,
        ) -> Result<UploadResponse, ExportError> {
            unimplemented!("not exercised here")
        }
    }

    fn descriptor(id: i64, name: &str, mime: &str) -> FileDescriptor {
        FileDescriptor {
            id,
            name: name.into(),
            mime_type: mime.into(),
            uploaded_at: 0,
        }
    }

    #[test]
    fn mime_allowlist() {
        for mime in ["image/png", "image/jpeg", "image/jpg", "image/gif", "image/bmp"] {
            assert!(is_valid_image_mime(mime), "{mime} should be accepted");
        }
        assert!(!is_valid_image_mime("video/mp4"));
        assert!(!is_valid_image_mime("application/pdf"));
        assert!(!is_valid_image_mime(""));
    }

    #[test]
    fn extension_from_mime() {
        assert_eq!(file_ext("image/png"), ".png");
        assert_eq!(file_ext("image/jpeg"), ".jpg");
        assert_eq!(file_ext("image/jpg"), ".jpg");
        assert_eq!(file_ext("image/gif"), ".gif");
        assert_eq!(file_ext("image/bmp"), ".bmp");
        assert_eq!(file_ext("image/webp"), ".webp");
        assert_eq!(file_ext("image/"), "");
        assert_eq!(file_ext("garbage"), "");
    }

    #[test]
    fn resize_shrinks_to_width_keeping_aspect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, png_bytes(800, 600)).unwrap();

        resize_image(&path, RESIZE_WIDTH).unwrap();

        let resized = image::open(&path).unwrap();
        assert_eq!(resized.width(), 400);
        assert_eq!(resized.height(), 300);
    }

    #[test]
    fn resize_rejects_non_image_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, b"definitely not an image").unwrap();

        assert!(resize_image(&path, RESIZE_WIDTH).is_err());
        // The original content stays in place for the caller to keep.
        assert_eq!(std::fs::read(&path).unwrap(), b"definitely not an image");
    }

    #[tokio::test]
    async fn fan_out_skips_unsupported_mime_and_keeps_valid_images() {
        let dir = tempfile::tempdir().unwrap();
        let service = StubFileService {
            blobs: HashMap::from([(1, png_bytes(16, 16)), (2, png_bytes(16, 16))]),
            broken: vec![],
        };
        let descriptors = vec![
            descriptor(1, "a", "image/png"),
            descriptor(2, "b", "image/png"),
            descriptor(3, "c", "video/mp4"),
            descriptor(0, "missing-id", "image/png"),
        ];

        let set = download_all(&service, &HashMap::new(), 1, dir.path(), descriptors)
            .await
            .unwrap();

        assert_eq!(set.len(), 2);
        for file in set.files() {
            assert!(file.path.exists());
        }
    }

    #[tokio::test]
    async fn fan_out_aborts_on_download_failure_and_cleans_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = StubFileService {
            blobs: HashMap::from([(1, png_bytes(16, 16))]),
            broken: vec![2],
        };
        let descriptors = vec![
            descriptor(1, "ok", "image/png"),
            descriptor(2, "broken", "image/png"),
        ];

        let result = download_all(&service, &HashMap::new(), 1, dir.path(), descriptors).await;
        assert!(result.is_err());

        // Nothing under the temp dir survives the failed task.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }
}
