//! Turns local files into server-hosted attachments.

use std::path::Path;
use std::sync::Arc;

use corpchat_shared::{guess_mime, Attachment, AttachmentKind};
use futures_util::future::join_all;

use crate::api_client::ChatApi;
use crate::error::ChatError;

/// A file picked for upload, held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime = guess_mime(&name);
        Self { name, bytes, mime }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Read a file from disk.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = tokio::fs::read(path).await.map_err(|e| ChatError::Upload {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(name, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// `image` for image MIME types or image file extensions, else `file`.
    pub fn kind(&self) -> AttachmentKind {
        AttachmentKind::detect(&self.name, self.mime.as_deref())
    }
}

/// A file that could not be uploaded, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedUpload {
    pub file: LocalFile,
    pub error: ChatError,
}

/// Result of a fan-out upload. Both lists keep the input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOutcome {
    pub uploaded: Vec<Attachment>,
    pub failed: Vec<FailedUpload>,
}

impl UploadOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct AttachmentUploader {
    api: Arc<dyn ChatApi>,
    max_upload_bytes: u64,
}

impl AttachmentUploader {
    pub fn new(api: Arc<dyn ChatApi>, max_upload_bytes: u64) -> Self {
        Self {
            api,
            max_upload_bytes,
        }
    }

    /// Upload one file. Oversized files fail without touching the network.
    pub async fn upload(&self, file: &LocalFile) -> Result<Attachment, ChatError> {
        if file.size() > self.max_upload_bytes {
            return Err(ChatError::Upload {
                name: file.name.clone(),
                reason: format!(
                    "file is {} bytes, the limit is {} bytes",
                    file.size(),
                    self.max_upload_bytes
                ),
            });
        }

        let mut attachment = self.api.upload(file).await.map_err(|e| ChatError::Upload {
            name: file.name.clone(),
            reason: e.user_message(),
        })?;
        if attachment.size.is_none() {
            attachment.size = Some(file.size());
        }
        crate::log_debug!("uploaded {} -> {}", file.name, attachment.url);
        Ok(attachment)
    }

    /// Upload all files in parallel and wait for every one to settle.
    /// A failure never aborts its siblings.
    pub async fn upload_all(&self, files: Vec<LocalFile>) -> UploadOutcome {
        let results = join_all(files.iter().map(|file| self.upload(file))).await;

        let mut outcome = UploadOutcome::default();
        for (file, result) in files.into_iter().zip(results) {
            match result {
                Ok(attachment) => outcome.uploaded.push(attachment),
                Err(error) => {
                    crate::log_warn!("upload failed: {}", error);
                    outcome.failed.push(FailedUpload { file, error });
                }
            }
        }
        outcome
    }
}
