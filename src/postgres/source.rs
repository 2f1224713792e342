// ABOUTME: PostgreSQL implementation of TableSource for schema exports
// ABOUTME: Lists tables through information_schema and streams rows as text

use super::connection::{self, PgConnection};
use crate::config::DatabaseConfig;
use crate::source::{NamedColumns, RowFields, SourceConnector, TableQuery, TableSource};
use crate::utils::quote_ident;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tokio_postgres::{SimpleQueryMessage, SimpleQueryRow};

const LIST_TABLES_SQL: &str = "SELECT table_name::text
     FROM information_schema.tables
     WHERE table_schema = $1::text";

/// One PostgreSQL connection serving a whole export
pub struct PgSource {
    connection: PgConnection,
}

impl PgSource {
    pub fn new(connection: PgConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TableSource for PgSource {
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        // `query` collects every row before returning, so the catalog
        // statement is finished before any table query starts.
        let rows = self
            .connection
            .client()
            .query(LIST_TABLES_SQL, &[&schema])
            .await
            .context("Failed to query information_schema.tables")?;

        let tables = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read table names from catalog")?;

        Ok(tables)
    }

    async fn query_table(&mut self, schema: &str, table: &str) -> Result<TableQuery> {
        let sql = format!("SELECT * FROM {}.{}", quote_ident(schema), quote_ident(table));
        let client = self.connection.client();

        // Describe first so the header is known even for empty tables.
        let statement = client
            .prepare(&sql)
            .await
            .with_context(|| format!("Failed to prepare query for table '{}'", table))?;
        let columns = NamedColumns(
            statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        );
        drop(statement);

        // Simple-query protocol: every value arrives in PostgreSQL's text format.
        let stream = client
            .simple_query_raw(sql.as_str())
            .await
            .with_context(|| format!("Failed to query table '{}'", table))?;

        let rows = stream
            .map_err(anyhow::Error::from)
            .try_filter_map(|message| async move {
                match message {
                    SimpleQueryMessage::Row(row) => row_fields(&row).map(Some),
                    _ => Ok(None),
                }
            })
            .boxed();

        Ok(TableQuery {
            columns: Box::new(columns),
            rows,
        })
    }

    async fn close(self) -> Result<()> {
        self.connection.close().await
    }
}

fn row_fields(row: &SimpleQueryRow) -> Result<RowFields> {
    (0..row.len())
        .map(|idx| {
            row.try_get(idx)
                .map(|value| value.map(str::to_string))
                .with_context(|| format!("Failed to read column {} of row", idx + 1))
        })
        .collect()
}

/// Opens [`PgSource`] connections from `[database]` settings
#[derive(Debug, Clone)]
pub struct PgConnector {
    settings: DatabaseConfig,
}

impl PgConnector {
    pub fn new(settings: DatabaseConfig) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SourceConnector for PgConnector {
    type Source = PgSource;

    async fn connect(&self) -> Result<PgSource> {
        let connection = connection::connect(&self.settings).await?;
        Ok(PgSource::new(connection))
    }
}
