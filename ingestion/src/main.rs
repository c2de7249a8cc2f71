mod config;
mod db;
mod error;
mod media;
mod models;
mod object_key;
mod pipeline;
mod routes;
mod upload;

#[cfg(test)]
mod testing;

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use config::Config;
use db::PgVideoRepository;
use media::ProcessRunner;
use pipeline::Ingestion;
use upload::{get_s3_client, S3Store};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .pretty()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Invalid configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let store = S3Store::new(get_s3_client(config.use_path_style_buckets).await);
    let ingestion = Ingestion::new(
        &config,
        Arc::new(PgVideoRepository::new(config.database_url.clone())),
        Arc::new(store),
        Arc::new(ProcessRunner),
    );

    let app = routes::router(Arc::new(ingestion), config.max_upload_bytes);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("Failed to bind tcp listener on {}: {}", config.listen_addr, err);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Listening on {}", config.listen_addr);

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", err);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
