use std::path::PathBuf;

use async_trait::async_trait;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;

use pulse_types::ChatError;
use pulse_types::api::{Claims, MediaResponse};
use pulse_types::models::MessageKind;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// 25 MB upload limit for media
pub const MAX_MEDIA_SIZE: usize = 25 * 1024 * 1024;

/// Where uploaded media ends up. The pipeline only ever sees the returned
/// URL, so swapping in an object-store implementation touches nothing else.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Persist one media object, returning the URL clients reference it by.
    async fn store(&self, data: Bytes, content_type: &str) -> anyhow::Result<String>;
}

/// Disk-backed store writing into a single flat directory.
pub struct LocalMediaStore {
    dir: PathBuf,
    public_base: String,
}

impl LocalMediaStore {
    pub fn new(dir: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_base: public_base.into(),
        }
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn store(&self, data: Bytes, content_type: &str) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let file_name = format!("{}.{}", Uuid::new_v4(), extension_for(content_type));
        let path = self.dir.join(&file_name);
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&data).await?;

        Ok(format!(
            "{}/{}",
            self.public_base.trim_end_matches('/'),
            file_name
        ))
    }
}

/// POST /media — raw bytes in, `{url, kind}` out, for a subsequent message
/// submit carrying the URL.
pub async fn upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    if body.is_empty() {
        return Err(ChatError::validation("upload is empty").into());
    }
    if body.len() > MAX_MEDIA_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let kind = kind_for(&content_type);

    let url = state.media.store(body, &content_type).await.map_err(|e| {
        error!("media store failed: {:#}", e);
        ChatError::Internal("media store failed".into())
    })?;

    info!(
        "Participant {} uploaded {} media to {}",
        claims.sub,
        kind.as_str(),
        url
    );

    Ok((StatusCode::CREATED, Json(MediaResponse { url, kind })))
}

/// Coarse message kind from the upload's Content-Type.
fn kind_for(content_type: &str) -> MessageKind {
    if content_type.starts_with("image/") {
        MessageKind::Image
    } else if content_type.starts_with("video/") {
        MessageKind::Video
    } else if content_type.starts_with("audio/") {
        MessageKind::Voice
    } else {
        MessageKind::Document
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/wav" => "wav",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_maps_to_coarse_kind() {
        assert_eq!(kind_for("image/png"), MessageKind::Image);
        assert_eq!(kind_for("video/webm"), MessageKind::Video);
        assert_eq!(kind_for("audio/ogg"), MessageKind::Voice);
        assert_eq!(kind_for("application/pdf"), MessageKind::Document);
        assert_eq!(kind_for("application/octet-stream"), MessageKind::Document);
    }

    #[tokio::test]
    async fn local_store_writes_and_builds_urls() {
        let dir = std::env::temp_dir().join(format!("pulse-media-{}", Uuid::new_v4()));
        let store = LocalMediaStore::new(&dir, "/media/");

        let url = store
            .store(Bytes::from_static(b"\x89PNG"), "image/png")
            .await
            .unwrap();
        assert!(url.starts_with("/media/"));
        assert!(url.ends_with(".png"));

        let file_name = url.rsplit('/').next().unwrap();
        let on_disk = tokio::fs::read(dir.join(file_name)).await.unwrap();
        assert_eq!(on_disk, b"\x89PNG");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
