// ABOUTME: In-memory TableSource with connection accounting and failure injection
// ABOUTME: Backs hermetic pipeline and router tests that run without a database server

use super::{ColumnMetadata, RowFields, SourceConnector, TableQuery, TableSource};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<RowFields>,
    failing_columns: Vec<usize>,
    fail_after_rows: Option<usize>,
}

impl MemoryTable {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Append a row; `None` cells are NULL
    pub fn row(mut self, values: &[Option<&str>]) -> Self {
        self.rows
            .push(values.iter().map(|v| v.map(str::to_string)).collect());
        self
    }

    /// Make the metadata lookup of a 1-based column ordinal fail
    pub fn failing_column(mut self, ordinal: usize) -> Self {
        self.failing_columns.push(ordinal);
        self
    }

    /// Make the row stream fail after yielding `count` rows
    pub fn fail_after_rows(mut self, count: usize) -> Self {
        self.fail_after_rows = Some(count);
        self
    }
}

/// Counters shared by every connection opened from one [`MemoryDatabase`]
#[derive(Debug, Default)]
pub struct ConnectionStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    queries: AtomicUsize,
}

impl ConnectionStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Table queries issued (catalog listings excluded)
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    schemas: Vec<(String, Vec<MemoryTable>)>,
    fail_connect: bool,
    fail_catalog: bool,
    failing_queries: Vec<String>,
    stats: Arc<ConnectionStats>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table to `schema`; catalog order is insertion order
    pub fn with_table(mut self, schema: &str, table: MemoryTable) -> Self {
        match self.schemas.iter_mut().find(|(name, _)| name == schema) {
            Some((_, tables)) => tables.push(table),
            None => self.schemas.push((schema.to_string(), vec![table])),
        }
        self
    }

    /// Register a schema with no tables
    pub fn with_empty_schema(mut self, schema: &str) -> Self {
        if !self.schemas.iter().any(|(name, _)| name == schema) {
            self.schemas.push((schema.to_string(), Vec::new()));
        }
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_catalog(mut self) -> Self {
        self.fail_catalog = true;
        self
    }

    pub fn failing_query(mut self, table: &str) -> Self {
        self.failing_queries.push(table.to_string());
        self
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Open a new connection
    pub fn open(&self) -> Result<MemorySource> {
        if self.fail_connect {
            bail!("Connection refused: in-memory database is configured to reject connections");
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySource {
            db: self.clone(),
            cursor_open: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl SourceConnector for MemoryDatabase {
    type Source = MemorySource;

    async fn connect(&self) -> Result<MemorySource> {
        self.open()
    }
}

pub struct MemorySource {
    db: MemoryDatabase,
    cursor_open: Arc<AtomicBool>,
}

impl MemorySource {
    fn tables(&self, schema: &str) -> &[MemoryTable] {
        self.db
            .schemas
            .iter()
            .find(|(name, _)| name == schema)
            .map(|(_, tables)| tables.as_slice())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TableSource for MemorySource {
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        if self.db.fail_catalog {
            bail!("Failed to list tables in schema '{}': catalog unavailable", schema);
        }
        Ok(self.tables(schema).iter().map(|t| t.name.clone()).collect())
    }

    async fn query_table(&mut self, schema: &str, table: &str) -> Result<TableQuery> {
        // Single active statement per connection, like most drivers.
        if self.cursor_open.load(Ordering::SeqCst) {
            bail!(
                "Query on '{}' issued while a previous cursor is still open",
                table
            );
        }
        self.db.stats.queries.fetch_add(1, Ordering::SeqCst);

        if self.db.failing_queries.iter().any(|t| t == table) {
            bail!("relation \"{}.{}\" is not readable", schema, table);
        }

        let table_def = self
            .tables(schema)
            .iter()
            .find(|t| t.name == table)
            .cloned()
            .ok_or_else(|| anyhow!("relation \"{}.{}\" does not exist", schema, table))?;

        self.cursor_open.store(true, Ordering::SeqCst);
        let cursor = CursorGuard(Arc::clone(&self.cursor_open));

        let state = (VecDeque::from(table_def.rows), 0usize, table_def.fail_after_rows, cursor);
        let rows = stream::unfold(state, |(mut pending, yielded, fail_after, cursor)| async move {
            if fail_after == Some(yielded) {
                return Some((
                    Err(anyhow!("connection lost while fetching rows")),
                    (VecDeque::new(), yielded, None, cursor),
                ));
            }
            let row = pending.pop_front()?;
            Some((Ok(row), (pending, yielded + 1, fail_after, cursor)))
        })
        .boxed();

        Ok(TableQuery {
            columns: Box::new(MemoryColumns {
                names: table_def.columns,
                failing: table_def.failing_columns,
            }),
            rows,
        })
    }

    async fn close(self) -> Result<()> {
        self.db.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct CursorGuard(Arc<AtomicBool>);

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct MemoryColumns {
    names: Vec<String>,
    failing: Vec<usize>,
}

impl ColumnMetadata for MemoryColumns {
    fn column_count(&self) -> usize {
        self.names.len()
    }

    fn column_name(&self, ordinal: usize) -> Result<String> {
        if self.failing.contains(&ordinal) {
            bail!("metadata for column {} is unavailable", ordinal);
        }
        ordinal
            .checked_sub(1)
            .and_then(|idx| self.names.get(idx))
            .cloned()
            .ok_or_else(|| anyhow!("Column ordinal {} is out of range", ordinal))
    }
}
