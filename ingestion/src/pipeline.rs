use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::multipart::MultipartError;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use auth_check::TokenValidator;

use crate::config::Config;
use crate::db::{VideoRecord, VideoRepository};
use crate::error::IngestError;
use crate::media::CommandRunner;
use crate::media::faststart::StreamOptimizer;
use crate::media::probe::MediaInspector;
use crate::object_key::ObjectKey;
use crate::upload::ObjectStore;

pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";
pub const MAX_THUMBNAIL_BYTES: u64 = 10 << 20;

const STAGING_PREFIX: &str = "tubely-upload";

/// Drives one upload request from credential check to the updated record.
///
/// Every step runs in order and the first failure ends the request. Files
/// staged on local disk are owned by the step that created them and are
/// removed on drop, so every exit path cleans up.
pub struct Ingestion {
    tokens: TokenValidator,
    videos: Arc<dyn VideoRepository>,
    store: Arc<dyn ObjectStore>,
    inspector: MediaInspector,
    optimizer: StreamOptimizer,
    bucket: String,
    public_base_url: String,
    upload_dir: PathBuf,
    max_upload_bytes: u64,
    presign_expiry: Option<Duration>,
}

impl Ingestion {
    pub fn new(
        config: &Config,
        videos: Arc<dyn VideoRepository>,
        store: Arc<dyn ObjectStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Ingestion {
            tokens: TokenValidator::new(config.jwt_secret.clone(), config.jwt_issuer.clone()),
            videos,
            store,
            inspector: MediaInspector::new(runner.clone(), config.ffprobe_path.clone()),
            optimizer: StreamOptimizer::new(runner, config.ffmpeg_path.clone()),
            bucket: config.s3_bucket.clone(),
            public_base_url: config.public_base_url.clone(),
            upload_dir: config.upload_dir.clone(),
            max_upload_bytes: config.max_upload_bytes as u64,
            presign_expiry: config.presign_expiry,
        }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Uuid, IngestError> {
        let token = auth_check::extract_token(headers).map_err(IngestError::Unauthenticated)?;
        self.tokens.validate(&token).map_err(IngestError::Unauthenticated)
    }

    /// Loads the record behind `video_id` and checks that `user_id` owns it.
    pub async fn authorize(&self, user_id: Uuid, video_id: &str) -> Result<VideoRecord, IngestError> {
        let id = Uuid::parse_str(video_id).map_err(|_| IngestError::InvalidIdentifier(video_id.to_string()))?;

        let video = self.videos.get_video(id).await?;
        if video.user_id != user_id {
            return Err(IngestError::Unauthorized);
        }

        Ok(video)
    }

    /// Stage, probe, remux and upload a video, then point the record at it.
    ///
    /// Everything after staging runs on its own task, so a caller that goes
    /// away mid-request does not interrupt a running remux or upload. The
    /// task owns the temp files and removes them when it finishes.
    pub async fn ingest_video<R>(
        self: &Arc<Self>,
        video: VideoRecord,
        content_type: Option<&str>,
        body: R,
    ) -> Result<VideoRecord, IngestError>
    where
        R: AsyncRead + Send,
    {
        let media_type = media_type(content_type);
        if media_type != VIDEO_CONTENT_TYPE {
            return Err(IngestError::InvalidMediaType(media_type));
        }

        let (staged, mut file) = self.stage(".mp4", body, None).await?;
        file.seek(SeekFrom::Start(0)).await.map_err(IngestError::Staging)?;
        drop(file);

        let ingestion = Arc::clone(self);
        tokio::spawn(async move { ingestion.process_video(video, staged).await }).await?
    }

    /// Store a JPEG or PNG thumbnail and point the record at it.
    pub async fn ingest_thumbnail<R>(
        self: &Arc<Self>,
        video: VideoRecord,
        content_type: Option<&str>,
        body: R,
    ) -> Result<VideoRecord, IngestError>
    where
        R: AsyncRead + Send,
    {
        let media_type = media_type(content_type);
        let extension = match media_type.as_str() {
            "image/jpeg" => "jpeg",
            "image/png" => "png",
            _ => return Err(IngestError::InvalidMediaType(media_type)),
        };

        let (staged, file) = self
            .stage(&format!(".{extension}"), body, Some(MAX_THUMBNAIL_BYTES))
            .await?;
        drop(file);

        let ingestion = Arc::clone(self);
        tokio::spawn(async move {
            ingestion
                .process_thumbnail(video, staged, &media_type, extension)
                .await
        })
        .await?
    }

    async fn process_video(&self, mut video: VideoRecord, staged: NamedTempFile) -> Result<VideoRecord, IngestError> {
        let class = self.inspector.aspect_class(staged.path()).await?;

        let optimized = self.optimizer.optimize(staged.path()).await?;
        drop(staged);

        let key = ObjectKey::for_video(class)?;

        tracing::info!("Uploading video {} to bucket {} as {}", video.id, self.bucket, key);
        self.store
            .put_object(&self.bucket, key.as_str(), VIDEO_CONTENT_TYPE, &optimized)
            .await?;
        drop(optimized);

        video.video_url = Some(key.url(&self.public_base_url));
        let mut video = self.persist(video).await?;

        if let Some(url) = self.presigned_url(&key).await? {
            video.video_url = Some(url);
        }
        Ok(video)
    }

    async fn process_thumbnail(
        &self,
        mut video: VideoRecord,
        staged: NamedTempFile,
        media_type: &str,
        extension: &str,
    ) -> Result<VideoRecord, IngestError> {
        let key = ObjectKey::for_thumbnail(extension)?;

        tracing::info!("Uploading thumbnail for video {} to bucket {} as {}", video.id, self.bucket, key);
        self.store
            .put_object(&self.bucket, key.as_str(), media_type, staged.path())
            .await?;
        drop(staged);

        video.thumbnail_url = Some(key.url(&self.public_base_url));
        let mut video = self.persist(video).await?;

        if let Some(url) = self.presigned_url(&key).await? {
            video.thumbnail_url = Some(url);
        }
        Ok(video)
    }

    /// A time-limited GET URL for the response, when the bucket is private.
    /// The stored record keeps the public URL.
    async fn presigned_url(&self, key: &ObjectKey) -> Result<Option<String>, IngestError> {
        let Some(expires_in) = self.presign_expiry else {
            return Ok(None);
        };

        let url = self
            .store
            .presigned_url(&self.bucket, key.as_str(), expires_in)
            .await?;
        Ok(Some(url))
    }

    /// Copy the whole body into a fresh temp file in the upload directory. The
    /// returned `NamedTempFile` deletes the file when dropped.
    async fn stage<R>(
        &self,
        suffix: &str,
        body: R,
        limit: Option<u64>,
    ) -> Result<(NamedTempFile, tokio::fs::File), IngestError>
    where
        R: AsyncRead + Send,
    {
        let staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(suffix)
            .tempfile_in(&self.upload_dir)
            .map_err(IngestError::Staging)?;

        let std_file = staged.as_file().try_clone().map_err(IngestError::Staging)?;
        let mut file = tokio::fs::File::from_std(std_file);

        let body = pin!(body);
        // one byte past the limit is enough to tell an oversized upload apart
        let mut body = body.take(limit.map_or(u64::MAX, |limit| limit + 1));

        let written = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|err| self.body_error(err))?;
        file.flush().await.map_err(IngestError::Staging)?;

        if let Some(limit) = limit {
            if written > limit {
                return Err(IngestError::UploadTooLarge(limit));
            }
        }

        tracing::info!("{} bytes written to {}", written, staged.path().display());
        Ok((staged, file))
    }

    /// The request body limit surfaces as a multipart error, either while
    /// looking for the field or halfway through copying it.
    pub fn multipart_error(&self, err: MultipartError) -> IngestError {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            IngestError::UploadTooLarge(self.max_upload_bytes)
        } else {
            IngestError::MalformedUpload(err)
        }
    }

    fn body_error(&self, err: std::io::Error) -> IngestError {
        let from_multipart = err
            .get_ref()
            .is_some_and(|inner| inner.is::<MultipartError>());
        if !from_multipart {
            return IngestError::Staging(err);
        }

        match err.into_inner().map(|inner| inner.downcast::<MultipartError>()) {
            Some(Ok(multipart)) => self.multipart_error(*multipart),
            _ => IngestError::Staging(std::io::Error::other("upload body read failed")),
        }
    }

    async fn persist(&self, mut video: VideoRecord) -> Result<VideoRecord, IngestError> {
        video.updated_at = Utc::now();
        self.videos
            .update_video(&video)
            .await
            .map_err(IngestError::Persistence)?;

        Ok(video)
    }
}

/// The essence of a declared content type: parameters dropped, lower-cased.
fn media_type(content_type: Option<&str>) -> String {
    content_type
        .and_then(|content_type| content_type.split(';').next())
        .map(|essence| essence.trim().to_ascii_lowercase())
        .unwrap_or_default()
}
