// ABOUTME: Schema export pipeline: one connection, one archive, one entry per table
// ABOUTME: Streams each table's rows as CSV into the archive without buffering the table

pub mod encoder;

use crate::archive::ArchiveSink;
use crate::source::{ColumnMetadata, SourceConnector, TableSource};
use crate::utils::{self, sanitize_identifier};
use anyhow::{Context, Result};
use encoder::{CsvEncoder, CHUNK_SIZE};
use futures::TryStreamExt;
use std::collections::HashSet;
use std::io::ErrorKind;

/// Table name plus its ordinal-ordered column names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub tables: usize,
    pub rows: u64,
    pub bytes: u64,
}

/// Resolve column names from result metadata, in ordinal order
///
/// Each lookup is independent: a column whose metadata cannot be read is
/// named `col<ordinal>` (1-based) and the other columns keep their names.
pub fn resolve_columns(table: &str, metadata: &dyn ColumnMetadata) -> Vec<String> {
    (1..=metadata.column_count())
        .map(|ordinal| match metadata.column_name(ordinal) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(
                    "Column {} of table '{}' has no readable name, using col{}: {}",
                    ordinal,
                    sanitize_identifier(table),
                    ordinal,
                    e
                );
                format!("col{}", ordinal)
            }
        })
        .collect()
}

/// Archive entry names for `tables`, in the same order
///
/// Names come from [`utils::entry_name_for_table`]; when two tables map to
/// the same name, later ones get a numeric suffix (`orders_2.csv`).
pub fn entry_names(tables: &[String]) -> Vec<String> {
    let mut used = HashSet::new();
    tables
        .iter()
        .map(|table| {
            let base = utils::entry_name_for_table(table);
            let stem = base.strip_suffix(".csv").unwrap_or(&base).to_string();
            let mut name = base;
            let mut suffix = 2;
            while !used.insert(name.clone()) {
                name = format!("{}_{}.csv", stem, suffix);
                suffix += 1;
            }
            name
        })
        .collect()
}

/// True when the error chain shows the receiving side went away
pub fn is_client_disconnect(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<std::io::Error>().is_some_and(|io| {
            matches!(
                io.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
            )
        })
    })
}

/// One export request's hold on the database
///
/// The session owns the single connection used for the catalog lookup and
/// every table query. It never owns the archive sink; callers pass the sink
/// in and keep it afterwards. Call [`ExportSession::close`] exactly once.
pub struct ExportSession<S> {
    source: S,
    schema: String,
}

impl<S: TableSource> ExportSession<S> {
    pub fn new(source: S, schema: &str) -> Self {
        Self {
            source,
            schema: schema.to_string(),
        }
    }

    /// Open the session's connection
    pub async fn open<C>(connector: &C, schema: &str) -> Result<Self>
    where
        C: SourceConnector<Source = S>,
    {
        let source = connector
            .connect()
            .await
            .context("Failed to open database connection for export")?;
        tracing::debug!("Opened export session for schema '{}'", sanitize_identifier(schema));
        Ok(Self::new(source, schema))
    }

    /// List the schema's tables, fully materialized before any export starts
    pub async fn discover_tables(&mut self) -> Result<Vec<String>> {
        let tables = self
            .source
            .list_tables(&self.schema)
            .await
            .with_context(|| {
                format!(
                    "Failed to list tables in schema '{}'",
                    sanitize_identifier(&self.schema)
                )
            })?;
        tracing::info!(
            "Found {} table(s) in schema '{}'",
            tables.len(),
            sanitize_identifier(&self.schema)
        );
        Ok(tables)
    }

    /// Export one table into a new entry of `sink`
    ///
    /// Opens the entry, queries the table through a fresh statement, writes
    /// the header and every row, then closes the entry. The sink itself is
    /// left open for the next entry.
    pub async fn export_table<A>(
        &mut self,
        table: &str,
        entry_name: &str,
        sink: &mut A,
    ) -> Result<(TableDescriptor, u64)>
    where
        A: ArchiveSink + ?Sized,
    {
        let table_name = sanitize_identifier(table);

        sink.start_entry(entry_name)
            .await
            .with_context(|| format!("Failed to open archive entry '{}'", entry_name))?;

        let mut query = self
            .source
            .query_table(&self.schema, table)
            .await
            .with_context(|| format!("Failed to query table '{}'", table_name))?;

        let descriptor = TableDescriptor {
            name: table.to_string(),
            columns: resolve_columns(table, query.columns.as_ref()),
        };
        tracing::debug!(
            "Table '{}' has {} columns: {:?}",
            table_name,
            descriptor.columns.len(),
            descriptor.columns
        );

        let mut encoder = CsvEncoder::with_header(&descriptor.columns)?;
        while let Some(row) = query
            .rows
            .try_next()
            .await
            .with_context(|| format!("Failed to read rows from table '{}'", table_name))?
        {
            encoder
                .write_row(&row)
                .with_context(|| format!("Failed to encode row of table '{}'", table_name))?;
            if encoder.pending() >= CHUNK_SIZE {
                sink.write(&encoder.take_chunk()?).await?;
            }
        }
        // Release the cursor before the entry boundary.
        drop(query);

        sink.write(&encoder.take_chunk()?).await?;
        sink.close_entry()
            .await
            .with_context(|| format!("Failed to close archive entry '{}'", entry_name))?;

        let rows = encoder.rows();
        tracing::info!("  ✓ Exported '{}' ({} rows)", table_name, rows);
        Ok((descriptor, rows))
    }

    /// Export `tables` strictly in order, one entry each
    pub async fn export_tables<A>(&mut self, tables: &[String], sink: &mut A) -> Result<ExportSummary>
    where
        A: ArchiveSink + ?Sized,
    {
        let mut summary = ExportSummary::default();
        for (table, entry_name) in tables.iter().zip(entry_names(tables)) {
            let (_, rows) = self.export_table(table, &entry_name, sink).await?;
            summary.tables += 1;
            summary.rows += rows;
        }
        summary.bytes = sink.bytes_written();
        Ok(summary)
    }

    /// Close the session's connection
    pub async fn close(self) -> Result<()> {
        self.source
            .close()
            .await
            .context("Failed to close database connection")
    }
}

/// Stream already-discovered `tables` into `sink`, seal it, and close the session
///
/// The connection is closed on every path. The sink is sealed only when
/// every table was exported.
pub async fn stream_archive<S, A>(
    mut session: ExportSession<S>,
    tables: &[String],
    sink: &mut A,
) -> Result<ExportSummary>
where
    S: TableSource,
    A: ArchiveSink + ?Sized,
{
    let outcome = async {
        let mut summary = session.export_tables(tables, sink).await?;
        sink.finish().await.context("Failed to finalize archive")?;
        summary.bytes = sink.bytes_written();
        Ok::<_, anyhow::Error>(summary)
    }
    .await;

    let closed = session.close().await;
    match (outcome, closed) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            tracing::warn!("Also failed to close connection after export error: {:#}", close_err);
            Err(e)
        }
    }
}

/// Export every table of `schema` into `sink` over one fresh connection
pub async fn export_schema<C, A>(connector: &C, schema: &str, sink: &mut A) -> Result<ExportSummary>
where
    C: SourceConnector,
    A: ArchiveSink + ?Sized,
{
    let mut session = ExportSession::open(connector, schema).await?;
    let tables = match session.discover_tables().await {
        Ok(tables) => tables,
        Err(e) => {
            if let Err(close_err) = session.close().await {
                tracing::warn!("Also failed to close connection: {:#}", close_err);
            }
            return Err(e);
        }
    };

    let summary = stream_archive(session, &tables, sink).await?;
    tracing::info!(
        "Export of schema '{}' complete: {} tables, {} rows, {} bytes",
        sanitize_identifier(schema),
        summary.tables,
        summary.rows,
        summary.bytes
    );
    Ok(summary)
}
