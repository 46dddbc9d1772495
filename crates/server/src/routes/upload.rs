//! Attachment upload route.

use std::path::Path;

use axum::{
    extract::{Multipart, State},
    Json,
};
use corpchat_shared::{Attachment, AttachmentKind};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// Upload one file (POST /api/chat/upload, multipart field `file`)
///
/// The file is stored under a fresh name and served back from `/uploads`.
pub async fn upload(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<Attachment>, AppError> {
    let upload_dir = &state.config.upload_dir;
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create upload dir: {e}")))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read form: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field
            .file_name()
            .map(sanitize_file_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "file".to_string());
        let kind = AttachmentKind::detect(&name, field.content_type());
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("failed to read file: {e}")))?;

        let size = data.len() as u64;
        if size > state.config.max_upload_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "{name} is {size} bytes; the limit is {} bytes",
                state.config.max_upload_bytes
            )));
        }

        let stored = format!("{}-{}", Uuid::new_v4(), name);
        tokio::fs::write(upload_dir.join(&stored), &data)
            .await
            .map_err(|e| AppError::Internal(format!("failed to save {name}: {e}")))?;
        tracing::info!("{} uploaded {} ({} bytes)", me.id, stored, size);

        return Ok(Json(Attachment {
            name,
            url: state.upload_url(&stored),
            kind,
            size: Some(size),
        }));
    }

    Err(AppError::BadRequest("no file field in form".into()))
}

/// Keep only the last path component and characters safe in a URL path.
fn sanitize_file_name(raw: &str) -> String {
    let base = Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_flattened() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("my report (v2).pdf"), "my_report__v2_.pdf");
    }

    #[test]
    fn kind_agrees_with_the_client() {
        // The client labels a file before upload; the stored kind must match.
        for name in ["logo.svg", "photo.JPG", "scan.tiff", "report.pdf", "notes"] {
            let file = corpchat_client::uploader::LocalFile::new(name, vec![]);
            assert_eq!(
                AttachmentKind::detect(name, file.mime.as_deref()),
                file.kind(),
                "{name}"
            );
        }
        assert_eq!(AttachmentKind::detect("x", Some("image/png")), AttachmentKind::Image);
    }
}
