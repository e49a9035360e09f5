//! Upload progress reporting and multipart file bodies

use crate::error::ApiError;
use bytes::Bytes;
use futures::stream;
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Size of the chunks handed to the transport
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Form field each file is attached under
pub const UPLOAD_FIELD: &str = "files[]";

/// Callback receiving the completed percentage (0-100)
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Debug, Default)]
struct ProgressState {
    sent: u64,
    last: u8,
}

/// Tracks bytes handed to the transport for one upload
#[derive(Clone)]
pub struct UploadProgress {
    total: u64,
    state: Arc<Mutex<ProgressState>>,
    callback: ProgressCallback,
}

impl UploadProgress {
    pub fn new(total: u64, callback: ProgressCallback) -> Self {
        Self {
            total,
            state: Arc::new(Mutex::new(ProgressState::default())),
            callback,
        }
    }

    /// Total number of bytes expected
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Record `bytes` more sent and report the new percentage
    pub fn advance(&self, bytes: u64) -> u8 {
        let percent = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.sent = state.sent.saturating_add(bytes).min(self.total);
            state.last = state.last.max(percentage(state.sent, self.total));
            state.last
        };
        (self.callback)(percent);
        percent
    }
}

/// `round(sent * 100 / total)`; an empty transfer is complete
pub fn percentage(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let sent = u128::from(sent.min(total));
    let total = u128::from(total);
    // Bounded to 0..=100 by the clamp above
    u8::try_from((sent * 200 + total) / (total * 2)).unwrap_or(100)
}

/// One file queued for upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub contents: Bytes,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: "application/pdf".to_string(),
            contents: contents.into(),
        }
    }

    /// Read a file from disk
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let contents = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map_or_else(|| "upload.pdf".to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self::new(file_name, contents))
    }
}

/// A multipart body made of one or more files
#[derive(Debug, Clone, Default)]
pub struct MultipartUpload {
    files: Vec<UploadFile>,
}

impl MultipartUpload {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn file(mut self, file: UploadFile) -> Self {
        self.files.push(file);
        self
    }

    /// Read every path into an upload
    pub async fn from_paths(paths: &[PathBuf]) -> Result<Self, ApiError> {
        let mut upload = Self::new();
        for path in paths {
            upload = upload.file(UploadFile::from_path(path).await?);
        }
        Ok(upload)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Sum of file sizes; the basis for progress percentages
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.contents.len() as u64).sum()
    }

    /// Build the reqwest form, streaming each file through `progress`
    pub(crate) fn into_form(self, progress: Option<&UploadProgress>) -> Result<Form, ApiError> {
        // No chunk will ever be streamed, so completion is reported up front
        if let Some(progress) = progress.filter(|p| p.total() == 0) {
            progress.advance(0);
        }

        let mut form = Form::new();
        for file in self.files {
            let length = file.contents.len() as u64;
            let part = match progress {
                Some(progress) => {
                    let body = reqwest::Body::wrap_stream(chunked(file.contents, progress.clone()));
                    Part::stream_with_length(body, length)
                }
                None => Part::bytes(file.contents.to_vec()),
            };
            let part = part
                .file_name(file.file_name)
                .mime_str(&file.content_type)
                .map_err(|e| ApiError::Configuration(format!("invalid content type: {e}")))?;
            form = form.part(UPLOAD_FIELD, part);
        }
        Ok(form)
    }
}

fn chunked(
    contents: Bytes,
    progress: UploadProgress,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let chunks: Vec<Bytes> = (0..contents.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| contents.slice(start..contents.len().min(start + UPLOAD_CHUNK_SIZE)))
        .collect();

    stream::iter(chunks.into_iter().map(move |chunk| {
        let percent = progress.advance(chunk.len() as u64);
        debug!(bytes = chunk.len(), percent, "Upload chunk sent");
        Ok(chunk)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));
        (callback, seen)
    }

    #[test]
    fn test_two_equal_chunks() {
        let (callback, seen) = recorder();
        let progress = UploadProgress::new(200, callback);
        progress.advance(100);
        progress.advance(100);
        assert_eq!(*seen.lock().unwrap(), vec![50, 100]);
    }

    #[test]
    fn test_percentage_rounds_to_nearest() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 200), 1);
        assert_eq!(percentage(0, 10), 0);
        assert_eq!(percentage(0, 0), 100);
        assert_eq!(percentage(50, 10), 100);
    }

    #[test]
    fn test_progress_never_exceeds_total() {
        let (callback, seen) = recorder();
        let progress = UploadProgress::new(10, callback);
        progress.advance(8);
        progress.advance(8);
        assert_eq!(*seen.lock().unwrap(), vec![80, 100]);
    }

    #[tokio::test]
    async fn test_chunked_stream_reports_monotonic_progress() {
        let (callback, seen) = recorder();
        let contents = Bytes::from(vec![7u8; UPLOAD_CHUNK_SIZE * 2 + 10]);
        let progress = UploadProgress::new(contents.len() as u64, callback);

        let chunks: Vec<_> = chunked(contents.clone(), progress).collect().await;
        let total: usize = chunks.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(total, contents.len());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn test_total_bytes() {
        let upload = MultipartUpload::new()
            .file(UploadFile::new("a.pdf", vec![0u8; 100]))
            .file(UploadFile::new("b.pdf", vec![0u8; 100]));
        assert_eq!(upload.total_bytes(), 200);
        assert_eq!(upload.len(), 2);
    }
}
