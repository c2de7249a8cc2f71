use std::io;
use std::sync::Arc;

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use futures_util::TryStreamExt;
use tokio_util::io::StreamReader;
use tower::ServiceBuilder;

use crate::db::VideoRecord;
use crate::error::IngestError;
use crate::pipeline::Ingestion;

const VIDEO_FIELD: &str = "video";
const THUMBNAIL_FIELD: &str = "thumbnail";

/// Skip ahead to the multipart field called `name`.
///
/// A macro rather than an `async fn` so the returned field borrows the
/// handler's local `Multipart`: returning it from a loop through a named
/// lifetime is rejected by the current borrow checker (E0499).
macro_rules! next_file_field {
    ($ingestion:expr, $multipart:expr, $name:expr) => {{
        let ingestion: &Ingestion = $ingestion;
        let multipart: &mut Multipart = $multipart;
        let name: &'static str = $name;
        loop {
            let Some(field) = multipart
                .next_field()
                .await
                .map_err(|err| ingestion.multipart_error(err))?
            else {
                return Err(IngestError::MissingUpload(name));
            };
            tracing::info!(
                "Received field: name={:?}, content_type={:?}, filename={:?}",
                field.name(),
                field.content_type(),
                field.file_name()
            );
            if field.name() == Some(name) {
                break field;
            }
        }
    }};
}

pub fn router(ingestion: Arc<Ingestion>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/videos/health", get(|| async { "ok" }))
        .route("/videos/{video_id}/video", post(upload_video))
        .route("/videos/{video_id}/thumbnail", post(upload_thumbnail))
        .layer(ServiceBuilder::new().layer(DefaultBodyLimit::max(max_upload_bytes)))
        .with_state(ingestion)
}

async fn upload_video(
    State(ingestion): State<Arc<Ingestion>>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<VideoRecord>, IngestError> {
    let user_id = ingestion.authenticate(&headers)?;
    tracing::info!("uploading video {} by user {}", video_id, user_id);

    let video = ingestion.authorize(user_id, &video_id).await?;

    let field = next_file_field!(&ingestion, &mut multipart, VIDEO_FIELD);
    let content_type = field.content_type().map(str::to_owned);
    let video = ingestion
        .ingest_video(video, content_type.as_deref(), field_reader(field))
        .await?;

    Ok(Json(video))
}

async fn upload_thumbnail(
    State(ingestion): State<Arc<Ingestion>>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<VideoRecord>, IngestError> {
    let user_id = ingestion.authenticate(&headers)?;
    tracing::info!("uploading thumbnail for video {} by user {}", video_id, user_id);

    let video = ingestion.authorize(user_id, &video_id).await?;

    let field = next_file_field!(&ingestion, &mut multipart, THUMBNAIL_FIELD);
    let content_type = field.content_type().map(str::to_owned);
    let video = ingestion
        .ingest_thumbnail(video, content_type.as_deref(), field_reader(field))
        .await?;

    Ok(Json(video))
}

fn field_reader(field: Field<'_>) -> impl tokio::io::AsyncRead + Send + '_ {
    StreamReader::new(field.map_err(io::Error::other))
}
