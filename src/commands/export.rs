// ABOUTME: Export command: writes every table of a schema to a local zip or directory
// ABOUTME: Uses the same pipeline as the HTTP download, minus the network

use crate::archive::{ArchiveSink, DirectorySink, ZipStreamWriter};
use crate::config::DatabaseConfig;
use crate::export::{export_schema, ExportSummary};
use crate::postgres::PgConnector;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// One `.zip` file with an entry per table
    ZipFile(PathBuf),
    /// One `.csv` file per table inside this directory
    Directory(PathBuf),
}

pub async fn export(database: &DatabaseConfig, schema: &str, target: ExportTarget) -> Result<()> {
    tracing::info!("Exporting schema '{}'", schema);
    let connector = PgConnector::new(database.clone());

    let summary = match &target {
        ExportTarget::ZipFile(path) => export_to_zip(&connector, schema, path).await?,
        ExportTarget::Directory(path) => {
            let mut sink = DirectorySink::create(path).await?;
            export_schema(&connector, schema, &mut sink).await?
        }
    };

    let destination = match &target {
        ExportTarget::ZipFile(path) | ExportTarget::Directory(path) => path.display().to_string(),
    };
    tracing::info!(
        "✓ Wrote {} tables ({} rows, {} bytes) to {}",
        summary.tables,
        summary.rows,
        summary.bytes,
        destination
    );
    Ok(())
}

async fn export_to_zip(
    connector: &PgConnector,
    schema: &str,
    path: &Path,
) -> Result<ExportSummary> {
    let file = File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut sink = ZipStreamWriter::new(BufWriter::new(file));

    match export_schema(connector, schema, &mut sink).await {
        Ok(summary) => {
            let mut output = sink.into_inner().await?;
            output
                .shutdown()
                .await
                .with_context(|| format!("Failed to close {}", path.display()))?;
            Ok(summary)
        }
        Err(e) => {
            tracing::warn!(
                "Removing incomplete archive {} ({} bytes written)",
                path.display(),
                sink.bytes_written()
            );
            drop(sink);
            if let Err(remove_err) = tokio::fs::remove_file(path).await {
                tracing::warn!("Failed to remove {}: {}", path.display(), remove_err);
            }
            Err(e)
        }
    }
}
