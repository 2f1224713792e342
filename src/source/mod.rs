// ABOUTME: Abstractions over the relational database the exporter reads from
// ABOUTME: Defines the TableSource session contract, column metadata and row streams

pub mod memory;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// One row projected to text: `None` is SQL NULL
pub type RowFields = Vec<Option<String>>;

/// Rows of one `SELECT *`, yielded as they arrive from the server
pub type RowStream = BoxStream<'static, Result<RowFields>>;

/// Result-set metadata for one table query
///
/// Lookups are per column and may fail independently of each other. Ordinals
/// are 1-based, matching the placeholder names (`col1`, `col2`, ...).
pub trait ColumnMetadata: Send {
    fn column_count(&self) -> usize;

    fn column_name(&self, ordinal: usize) -> Result<String>;
}

/// Column names taken straight from a prepared statement description
#[derive(Debug, Clone, Default)]
pub struct NamedColumns(pub Vec<String>);

impl ColumnMetadata for NamedColumns {
    fn column_count(&self) -> usize {
        self.0.len()
    }

    fn column_name(&self, ordinal: usize) -> Result<String> {
        ordinal
            .checked_sub(1)
            .and_then(|idx| self.0.get(idx))
            .cloned()
            .ok_or_else(|| anyhow!("Column ordinal {} is out of range", ordinal))
    }
}

/// An open `SELECT *` on a single table
pub struct TableQuery {
    pub columns: Box<dyn ColumnMetadata>,
    pub rows: RowStream,
}

/// An open connection to the database being exported
///
/// Implementations hold exactly one connection. Calls are strictly
/// sequential: the exporter never issues a new query while a previous
/// [`RowStream`] is still being consumed.
#[async_trait]
pub trait TableSource: Send {
    /// List table names of `schema`, fully materialized, in catalog order
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>>;

    /// Run `SELECT *` on `schema.table` through a fresh statement
    async fn query_table(&mut self, schema: &str, table: &str) -> Result<TableQuery>;

    /// Close the underlying connection
    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Opens new [`TableSource`] connections, one per export request
#[async_trait]
pub trait SourceConnector: Send + Sync + 'static {
    type Source: TableSource + 'static;

    async fn connect(&self) -> Result<Self::Source>;
}
