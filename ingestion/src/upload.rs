use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use aws_sdk_s3::{self as s3};
use s3::presigning::PresigningConfig;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};

use tokio::io::AsyncReadExt;

/// Files above this size go through S3 multipart upload.
const MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;
const PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read upload source: {0}")]
    Io(#[from] std::io::Error),
    #[error("object store request failed: {0}")]
    Request(String),
}

impl StoreError {
    fn request(err: impl std::error::Error) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        StoreError::Request(message)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` to `bucket`/`key`.
    async fn put_object(&self, bucket: &str, key: &str, content_type: &str, path: &Path) -> Result<(), StoreError>;

    /// Time-limited GET URL for an object in a private bucket.
    async fn presigned_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String, StoreError>;
}

pub async fn get_s3_client(use_path_style_buckets: bool) -> s3::Client {
    let config = aws_config::load_from_env().await;
    let client = s3::Client::new(&config);

    if use_path_style_buckets {
        tracing::info!("Using path-style buckets");
        let config_builder = client.config().clone().to_builder();
        s3::Client::from_conf(config_builder.force_path_style(true).build())
    } else {
        client
    }
}

#[derive(Clone)]
pub struct S3Store {
    client: s3::Client,
}

impl S3Store {
    pub fn new(client: s3::Client) -> Self {
        S3Store { client }
    }

    async fn put_single(&self, bucket: &str, key: &str, content_type: &str, path: &Path) -> Result<(), StoreError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(StoreError::request)?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(StoreError::request)?;

        Ok(())
    }

    /// Upload a large file as S3 multipart upload. The upload is aborted when
    /// any part fails.
    async fn put_multipart(&self, bucket: &str, key: &str, content_type: &str, path: &Path) -> Result<(), StoreError> {
        let multi_part_upload = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(StoreError::request)?;

        let upload_id = multi_part_upload
            .upload_id()
            .ok_or_else(|| StoreError::Request("multipart upload returned no upload id".to_string()))?;
        tracing::info!("Created multipart upload with ID: {}", upload_id);

        match self.upload_parts(bucket, key, upload_id, path).await {
            Ok(completed_parts) => {
                let completed_multipart_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(completed_multipart_upload)
                    .send()
                    .await
                    .map_err(StoreError::request)?;
                Ok(())
            }
            Err(err) => {
                tracing::error!("Multipart upload of {} failed, aborting: {}", key, err);
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    tracing::error!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(&self, bucket: &str, key: &str, upload_id: &str, path: &Path) -> Result<Vec<CompletedPart>, StoreError> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut completed_parts = Vec::new();
        let mut part_number = 1;

        loop {
            let buffer = read_part(&mut file).await?;
            if buffer.is_empty() {
                break;
            }

            tracing::info!("Uploading part {} with size: {}", part_number, buffer.len());
            let part = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .part_number(part_number)
                .upload_id(upload_id)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(StoreError::request)?;

            let e_tag = part
                .e_tag()
                .ok_or_else(|| StoreError::Request(format!("part {} returned no etag", part_number)))?;
            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(e_tag)
                    .build(),
            );
            part_number += 1;
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(&self, bucket: &str, key: &str, content_type: &str, path: &Path) -> Result<(), StoreError> {
        let size = tokio::fs::metadata(path).await?.len();
        tracing::info!("Uploading {} ({} bytes) to s3://{}/{}", path.display(), size, bucket, key);

        if size > MULTIPART_THRESHOLD {
            self.put_multipart(bucket, key, content_type, path).await
        } else {
            self.put_single(bucket, key, content_type, path).await
        }
    }

    async fn presigned_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(expires_in).map_err(StoreError::request)?)
            .await
            .map_err(StoreError::request)?;

        Ok(presigned.uri().to_string())
    }
}

/// Read up to `PART_SIZE` bytes; a short buffer means the file is exhausted.
async fn read_part<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(PART_SIZE);
    let mut limited = reader.take(PART_SIZE as u64);
    limited.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parts_are_split_at_part_size() {
        let data = vec![7u8; PART_SIZE * 2 + 10];
        let mut reader = &data[..];

        assert_eq!(read_part(&mut reader).await.unwrap().len(), PART_SIZE);
        assert_eq!(read_part(&mut reader).await.unwrap().len(), PART_SIZE);
        assert_eq!(read_part(&mut reader).await.unwrap().len(), 10);
        assert!(read_part(&mut reader).await.unwrap().is_empty());
    }
}
