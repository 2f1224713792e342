// ABOUTME: Serve command: runs the HTTP export and upload-URL service
// ABOUTME: Requires a storage bucket because the upload endpoint signs requests

use crate::config::AppConfig;
use crate::utils;
use anyhow::Result;

pub async fn serve(config: &AppConfig) -> Result<()> {
    config.storage.require_bucket()?;

    tracing::info!("Starting schema export service");
    tracing::info!(
        "Database: {} (schema '{}')",
        utils::redact_password(&config.database.url),
        config.database.schema
    );
    tracing::info!("Upload bucket: {}", config.storage.bucket);

    crate::server::serve(config).await
}
