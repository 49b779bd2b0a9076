//! Fellowship Uploads - member file upload service
//!
//! HTTP service that stores member files (avatars, event photos, documents)
//! on behalf of signed-in users. Makes sure the uploader's `users` row
//! exists first, then retries uploads the storage backend rejects while that
//! row is still replicating.

mod config;
mod dto;
mod handlers;
mod routes;
mod storage;

use anyhow::Result;
use fellowship_baas::{BaasClient, BaasObjectStore};
use fellowship_domain::upload::UploadConfig;
use fellowship_s3::S3ObjectStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    config::{AppConfig, StorageBackendKind},
    storage::ObjectStoreBackend,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub baas: BaasClient,
    pub storage: ObjectStoreBackend,
    pub upload_config: UploadConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;

    init_tracing(config.log_json);

    info!("Starting Fellowship uploads service");

    let baas = BaasClient::new(&config.baas)?;
    info!(url = %baas.base_url(), users_table = %config.baas.users_table, "BaaS client ready");

    let storage = match &config.storage {
        StorageBackendKind::Baas => ObjectStoreBackend::Baas(BaasObjectStore::new(baas.clone())),
        StorageBackendKind::S3 { public_url } => {
            let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

            // Path-style addressing for MinIO
            let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true)
                .build();

            let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
            ObjectStoreBackend::S3(S3ObjectStore::new(s3_client, public_url.clone())?)
        }
    };

    info!(
        backend = storage.name(),
        max_attempts = config.upload.max_attempts,
        worst_case_wait_ms = config.upload.worst_case_wait().as_millis() as u64,
        "Upload coordinator configured"
    );

    let addr = config.bind_addr();
    let state = AppState {
        baas,
        storage,
        upload_config: config.upload,
    };

    let app = routes::create_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Install the global subscriber, honoring `RUST_LOG`
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
