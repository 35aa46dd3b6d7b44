// SPDX-License-Identifier: Apache-2.0

//! Indexes exposed by a linked table
//!
//! Only the scan index reads data: it streams the remote table in remote
//! order. Primary key and secondary indexes are descriptive, so the host
//! planner can reason about uniqueness; lookups through them still go to the
//! remote as full scans.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::{RemoteDriver, SessionContext};
use crate::engine::types::{Column, Row};
use crate::link::connection::ConnectionHandle;
use crate::link::sql::{self, LinkDialect};

/// Rows buffered between the remote connection and a cursor.
pub const FETCH_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Full scan over the remote table.
    Scan,
    PrimaryKey,
    Unique,
    NonUnique,
}

impl IndexKind {
    pub fn is_unique(self) -> bool {
        matches!(self, IndexKind::PrimaryKey | IndexKind::Unique)
    }
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: Option<String>,
    pub kind: IndexKind,
    /// `None` marks a column the host could not resolve (an expression, or a
    /// gap in the key sequence).
    pub columns: Vec<Option<Arc<Column>>>,
}

impl IndexDef {
    pub fn scan(columns: &[Arc<Column>]) -> Self {
        Self {
            name: None,
            kind: IndexKind::Scan,
            columns: columns.iter().cloned().map(Some).collect(),
        }
    }

    /// Whether every column of the index resolved to a table column.
    pub fn is_complete(&self) -> bool {
        self.columns.iter().all(Option::is_some)
    }
}

/// The table's scan index. Row writes go through it as single-row DML.
pub struct LinkedIndex<D: RemoteDriver> {
    connection: Arc<ConnectionHandle<D>>,
    table: String,
    qualified_name: String,
    columns: Vec<Arc<Column>>,
    dialect: LinkDialect,
    read_only: bool,
}

impl<D: RemoteDriver> LinkedIndex<D> {
    pub(crate) fn new(
        connection: Arc<ConnectionHandle<D>>,
        table: String,
        qualified_name: String,
        columns: Vec<Arc<Column>>,
        dialect: LinkDialect,
        read_only: bool,
    ) -> Self {
        Self {
            connection,
            table,
            qualified_name,
            columns,
            dialect,
            read_only,
        }
    }

    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    /// Streams the rows of the remote table.
    ///
    /// The remote connection stays busy until the cursor is drained or
    /// dropped; other statements on the same table wait for it.
    pub async fn scan(&self, session: &dyn SessionContext) -> EngineResult<LinkedCursor> {
        session.check_canceled()?;
        let sql = sql::scan_sql(&self.qualified_name);
        let (tx, rx) = mpsc::channel(FETCH_SIZE);
        let connection = Arc::clone(&self.connection);
        tokio::spawn(async move { connection.stream(&sql, &[], tx).await });
        LinkedCursor::open(rx).await
    }

    pub async fn add(&self, row: &Row) -> EngineResult<()> {
        self.check_writable()?;
        let (sql, params) = self.dialect.insert(&self.qualified_name, &self.columns, row);
        self.connection.execute(&sql, &params, true).await?;
        Ok(())
    }

    pub async fn remove(&self, row: &Row) -> EngineResult<()> {
        self.check_writable()?;
        let (sql, params) = self.dialect.delete(&self.qualified_name, &self.columns, row);
        self.connection.execute(&sql, &params, true).await?;
        Ok(())
    }

    /// Rewrites `old_row` to `new_row` with one UPDATE.
    pub async fn update(&self, old_row: &Row, new_row: &Row) -> EngineResult<()> {
        self.check_writable()?;
        let (sql, params) =
            self.dialect
                .update(&self.qualified_name, &self.columns, old_row, new_row);
        self.connection.execute(&sql, &params, true).await?;
        Ok(())
    }

    fn check_writable(&self) -> EngineResult<()> {
        if self.read_only {
            return Err(EngineError::read_only(&self.table));
        }
        Ok(())
    }
}

/// Rows of one scan, pulled from the remote as they are read. The prepared
/// scan statement returns to the cache once the last row was read; dropping
/// the cursor early discards it.
pub struct LinkedCursor {
    rows: mpsc::Receiver<EngineResult<Row>>,
    /// First row, read ahead so a failing scan fails in `scan`.
    first: Option<Row>,
}

impl LinkedCursor {
    async fn open(mut rows: mpsc::Receiver<EngineResult<Row>>) -> EngineResult<Self> {
        let first = match rows.recv().await {
            Some(Ok(row)) => Some(row),
            Some(Err(err)) => return Err(err),
            None => None,
        };
        Ok(Self { rows, first })
    }

    pub async fn next_row(&mut self, session: &dyn SessionContext) -> EngineResult<Option<Row>> {
        if let Err(err) = session.check_canceled() {
            self.rows.close();
            return Err(err);
        }
        if let Some(row) = self.first.take() {
            return Ok(Some(row));
        }
        match self.rows.recv().await {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    /// Drains the cursor.
    pub async fn collect(mut self, session: &dyn SessionContext) -> EngineResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row(session).await? {
            rows.push(row);
        }
        Ok(rows)
    }
}
