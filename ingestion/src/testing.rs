//! In-memory stand-ins for the database, the bucket and the media tools.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use josekit::jws::{JwsHeader, HS256};
use josekit::jwt::{self, JwtPayload};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{DbError, VideoRecord, VideoRepository};
use crate::media::{CommandRunner, ToolError};
use crate::upload::{ObjectStore, StoreError};

pub const JWT_SECRET: &str = "test-signing-key-with-enough-entropy-for-hs256";
pub const BUCKET: &str = "tubely-test";
pub const PUBLIC_BASE_URL: &str = "https://d111111abcdef8.cloudfront.net";

pub fn config(upload_dir: &Path) -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_string(),
        database_url: "postgres://unused".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        jwt_issuer: None,
        s3_bucket: BUCKET.to_string(),
        public_base_url: PUBLIC_BASE_URL.to_string(),
        use_path_style_buckets: false,
        upload_dir: upload_dir.to_path_buf(),
        max_upload_bytes: 64 * 1024 * 1024,
        ffprobe_path: "ffprobe".to_string(),
        ffmpeg_path: "ffmpeg".to_string(),
        presign_expiry: None,
    }
}

pub fn sign_token(user_id: Uuid) -> String {
    let now = SystemTime::now();
    let mut header = JwsHeader::new();
    header.set_token_type("JWT");

    let mut payload = JwtPayload::new();
    payload.set_subject(user_id.to_string());
    payload.set_issued_at(&now);
    payload.set_expires_at(&(now + Duration::from_secs(600)));

    let signer = HS256.signer_from_bytes(JWT_SECRET.as_bytes()).unwrap();
    jwt::encode_with_signer(&payload, &header, &signer).unwrap()
}

pub fn video_owned_by(user_id: Uuid) -> VideoRecord {
    let now = Utc::now();
    VideoRecord {
        id: Uuid::new_v4(),
        created_at: now,
        updated_at: now,
        title: "Boots at the beach".to_string(),
        description: Some("A short clip".to_string()),
        thumbnail_url: None,
        video_url: None,
        user_id,
    }
}

/// Answers ffprobe with canned JSON and fakes ffmpeg by copying the input
/// to the output path.
pub struct FakeRunner {
    probe_output: String,
    fail_remux: bool,
    remux_delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn with_probe_output(probe_output: &str) -> Self {
        FakeRunner {
            probe_output: probe_output.to_string(),
            fail_remux: false,
            remux_delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dimensions(width: u32, height: u32) -> Self {
        let output = serde_json::json!({
            "streams": [
                { "index": 0, "codec_type": "video", "codec_name": "h264", "width": width, "height": height },
                { "index": 1, "codec_type": "audio", "codec_name": "aac" }
            ]
        });
        Self::with_probe_output(&output.to_string())
    }

    pub fn landscape() -> Self {
        Self::with_dimensions(1920, 1080)
    }

    pub fn failing_remux(mut self) -> Self {
        self.fail_remux = true;
        self
    }

    pub fn slow_remux(mut self, delay: Duration) -> Self {
        self.remux_delay = Some(delay);
        self
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[OsString]) -> Result<Vec<u8>, ToolError> {
        self.calls.lock().unwrap().push(program.to_string());

        if program == "ffprobe" {
            return Ok(self.probe_output.clone().into_bytes());
        }

        let input = args
            .iter()
            .position(|arg| arg.as_os_str() == "-i")
            .and_then(|i| args.get(i + 1))
            .expect("remux called without -i");
        let output = args.last().expect("remux called without output");

        if let Some(delay) = self.remux_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_remux {
            tokio::fs::write(output, b"partial").await.unwrap();
            return Err(ToolError::Failed {
                program: program.to_string(),
                code: Some(1),
                stderr: "moov atom not found".to_string(),
            });
        }

        tokio::fs::copy(input, output)
            .await
            .map_err(|source| ToolError::Io {
                program: program.to_string(),
                source,
            })?;
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<Vec<StoredObject>>,
    fail: bool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        MemoryStore {
            fail: true,
            ..Default::default()
        }
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, bucket: &str, key: &str, content_type: &str, path: &Path) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Request("bucket unavailable".to_string()));
        }

        let bytes = tokio::fs::read(path).await?;
        self.objects.lock().unwrap().push(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            bytes,
        });
        Ok(())
    }

    async fn presigned_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        Ok(format!(
            "https://{bucket}.s3.test/{key}?X-Amz-Expires={}",
            expires_in.as_secs()
        ))
    }
}

#[derive(Default)]
pub struct MemoryVideos {
    videos: Mutex<HashMap<Uuid, VideoRecord>>,
    fail_updates: bool,
}

impl MemoryVideos {
    pub fn with(video: VideoRecord) -> Self {
        let videos = MemoryVideos::default();
        videos.videos.lock().unwrap().insert(video.id, video);
        videos
    }

    pub fn failing_updates(mut self) -> Self {
        self.fail_updates = true;
        self
    }

    pub fn get(&self, id: Uuid) -> Option<VideoRecord> {
        self.videos.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl VideoRepository for MemoryVideos {
    async fn get_video(&self, id: Uuid) -> Result<VideoRecord, DbError> {
        self.get(id).ok_or(DbError::NotFound(id))
    }

    async fn update_video(&self, video: &VideoRecord) -> Result<(), DbError> {
        if self.fail_updates {
            return Err(DbError::Query(diesel::result::Error::BrokenTransactionManager));
        }

        let mut videos = self.videos.lock().unwrap();
        match videos.get_mut(&video.id) {
            Some(stored) => {
                *stored = video.clone();
                Ok(())
            }
            None => Err(DbError::NotFound(video.id)),
        }
    }
}
