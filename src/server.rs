// ABOUTME: HTTP surface: streamed schema export download and upload URL issuing
// ABOUTME: Axum router, shared state and the plain-text error mapping

use crate::archive::ZipStreamWriter;
use crate::config::AppConfig;
use crate::export::{is_client_disconnect, stream_archive, ExportSession};
use crate::postgres::PgConnector;
use crate::source::SourceConnector;
use crate::upload::{issue_upload_url, S3UploadSigner, UploadSigner};
use crate::utils::sanitize_identifier;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

pub const EXPORT_PATH: &str = "/snowflake/export_all";
pub const UPLOAD_URL_PATH: &str = "/api/upload-url";
pub const HEALTH_PATH: &str = "/health";

pub const EXPORT_FILENAME: &str = "snowflake_tables.zip";

/// Bytes buffered between the export task and the response body
const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Export failed: {0:#}")]
    Export(anyhow::Error),

    #[error("Upload URL unavailable: {0:#}")]
    Signing(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Signing(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Shared state for every request
pub struct AppState<C, U> {
    connector: C,
    signer: U,
    schema: String,
}

impl<C, U> AppState<C, U>
where
    C: SourceConnector,
    U: UploadSigner,
{
    pub fn new(connector: C, signer: U, schema: &str) -> Self {
        Self {
            connector,
            signer,
            schema: schema.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadUrlParams {
    pub filename: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
}

pub fn build_router<C, U>(state: Arc<AppState<C, U>>) -> Router
where
    C: SourceConnector,
    U: UploadSigner,
{
    Router::new()
        .route(EXPORT_PATH, get(export_all::<C, U>))
        .route(UPLOAD_URL_PATH, post(upload_url::<C, U>))
        .route(HEALTH_PATH, get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Stream every table of the configured schema as a zip download
///
/// The connection is opened and the catalog read before any byte is sent,
/// so those failures still produce a 500. Once the body starts, a failure
/// can only truncate the archive.
async fn export_all<C, U>(State(state): State<Arc<AppState<C, U>>>) -> Result<Response, ApiError>
where
    C: SourceConnector,
    U: UploadSigner,
{
    let schema = sanitize_identifier(&state.schema);
    tracing::info!("Starting export of schema '{}'", schema);

    let mut session = ExportSession::open(&state.connector, &state.schema)
        .await
        .map_err(|e| {
            tracing::error!("Export could not start: {:#}", e);
            ApiError::Export(e)
        })?;

    let tables = match session.discover_tables().await {
        Ok(tables) => tables,
        Err(e) => {
            tracing::error!("Export of schema '{}' could not list tables: {:#}", schema, e);
            if let Err(close_err) = session.close().await {
                tracing::warn!("Also failed to close connection: {:#}", close_err);
            }
            return Err(ApiError::Export(e));
        }
    };

    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::spawn(async move {
        let mut sink = ZipStreamWriter::new(writer);
        match stream_archive(session, &tables, &mut sink).await {
            Ok(summary) => tracing::info!(
                "Export of schema '{}' complete: {} tables, {} rows, {} bytes",
                schema,
                summary.tables,
                summary.rows,
                summary.bytes
            ),
            Err(e) if is_client_disconnect(&e) => {
                tracing::warn!("Client disconnected during export of '{}': {:#}", schema, e)
            }
            Err(e) => tracing::error!("Export of schema '{}' failed: {:#}", schema, e),
        }
    });

    let disposition = format!("attachment; filename=\"{}\"", EXPORT_FILENAME);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

async fn upload_url<C, U>(
    State(state): State<Arc<AppState<C, U>>>,
    Query(params): Query<UploadUrlParams>,
) -> Result<String, ApiError>
where
    C: SourceConnector,
    U: UploadSigner,
{
    let credential = issue_upload_url(&state.signer, &params.filename, &params.content_type)
        .await
        .map_err(|e| {
            tracing::error!("Failed to issue upload URL: {:#}", e);
            ApiError::Signing(e)
        })?;
    Ok(credential.url)
}

async fn health() -> &'static str {
    "ok"
}

/// Bind `listen` and serve until Ctrl-C
pub async fn run<C, U>(state: Arc<AppState<C, U>>, listen: &str) -> Result<()>
where
    C: SourceConnector,
    U: UploadSigner,
{
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wire the production PostgreSQL connector and S3 signer, then serve
pub async fn serve(config: &AppConfig) -> Result<()> {
    let signer = S3UploadSigner::from_config(&config.storage).await?;
    let connector = PgConnector::new(config.database.clone());
    let state = Arc::new(AppState::new(connector, signer, &config.database.schema));
    run(state, &config.server.listen).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
