mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use schema::videos;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("video {0} not found")]
    NotFound(Uuid),
    #[error("error connecting to database: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("database worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = videos)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct VideoRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub user_id: Uuid,
}

/// Metadata store for video records.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn get_video(&self, id: Uuid) -> Result<VideoRecord, DbError>;

    /// Write the full record back, replacing every column.
    async fn update_video(&self, video: &VideoRecord) -> Result<(), DbError>;
}

/// Postgres-backed repository. Diesel is synchronous, so each call opens its
/// connection on the blocking pool.
#[derive(Clone)]
pub struct PgVideoRepository {
    database_url: String,
}

impl PgVideoRepository {
    pub fn new(database_url: impl Into<String>) -> Self {
        PgVideoRepository {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    async fn get_video(&self, id: Uuid) -> Result<VideoRecord, DbError> {
        let database_url = self.database_url.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = get_connection(&database_url)?;

            videos::table
                .find(id)
                .select(VideoRecord::as_select())
                .first(&mut conn)
                .optional()?
                .ok_or(DbError::NotFound(id))
        })
        .await?
    }

    async fn update_video(&self, video: &VideoRecord) -> Result<(), DbError> {
        let database_url = self.database_url.clone();
        let video = video.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = get_connection(&database_url)?;

            let updated = diesel::update(videos::table.find(video.id))
                .set(&video)
                .execute(&mut conn)?;

            if updated == 0 {
                return Err(DbError::NotFound(video.id));
            }
            Ok(())
        })
        .await?
    }
}

fn get_connection(database_url: &str) -> Result<PgConnection, DbError> {
    PgConnection::establish(database_url).map_err(|err| {
        tracing::error!("Error connecting to database: {}", err);
        DbError::from(err)
    })
}
