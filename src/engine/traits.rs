// SPDX-License-Identifier: Apache-2.0

//! Trait seams of the linked table engine
//!
//! [`RemoteDriver`] and [`RemoteConnection`] are implemented once per remote
//! database vendor. [`SessionContext`] and [`HostCatalog`] are implemented by
//! the host engine that mounts linked tables.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::engine::error::{EngineError, EngineResult, RemoteResult};
use crate::engine::types::{
    CatalogColumn, CatalogTable, Column, IdentifierCase, IndexInfoRow, PrimaryKeyRow, Row,
    StatementResult, Value,
};
use crate::link::config::LinkConfig;
use crate::link::index::IndexDef;

/// Factory for connections to one kind of remote database.
#[async_trait]
pub trait RemoteDriver: Send + Sync + 'static {
    type Connection: RemoteConnection;

    /// Returns the unique identifier for this driver (e.g., "postgres", "sqlite")
    fn driver_id(&self) -> &'static str;

    /// Character used to quote identifiers in generated SQL.
    fn identifier_quote(&self) -> char {
        '"'
    }

    /// Opens a new connection using the link's URL and credentials.
    async fn open(&self, config: &LinkConfig) -> RemoteResult<Self::Connection>;
}

/// One live connection to a remote database.
///
/// Implementations are not required to be safe for concurrent use; the
/// connection handle serializes every call.
#[async_trait]
pub trait RemoteConnection: Send + 'static {
    /// A prepared statement bound to this connection.
    type Statement: Send + 'static;

    /// How the remote stores and compares unquoted identifiers.
    async fn identifier_case(&mut self) -> RemoteResult<IdentifierCase>;

    /// Tables (and views) matching the given schema and table name.
    async fn tables(&mut self, schema: Option<&str>, table: &str)
        -> RemoteResult<Vec<CatalogTable>>;

    /// Columns of the matching table(s), in ordinal order per table.
    async fn columns(&mut self, schema: Option<&str>, table: &str)
        -> RemoteResult<Vec<CatalogColumn>>;

    /// Primary key columns. Rows may arrive in any order.
    async fn primary_keys(
        &mut self,
        schema: Option<&str>,
        table: &str,
    ) -> RemoteResult<Vec<PrimaryKeyRow>>;

    /// Index columns, sorted by index name then column position.
    async fn index_info(&mut self, schema: Option<&str>, table: &str)
        -> RemoteResult<Vec<IndexInfoRow>>;

    async fn prepare(&mut self, sql: &str) -> RemoteResult<Self::Statement>;

    /// Binds `params` positionally and runs the statement.
    async fn execute(
        &mut self,
        statement: &mut Self::Statement,
        params: &[Value],
    ) -> RemoteResult<StatementResult>;

    /// Binds `params` positionally and yields result rows as the remote
    /// produces them.
    ///
    /// The default runs [`RemoteConnection::execute`] and replays its rows.
    fn fetch<'c>(
        &'c mut self,
        statement: &'c mut Self::Statement,
        params: &'c [Value],
    ) -> BoxStream<'c, RemoteResult<Row>> {
        stream::once(self.execute(statement, params))
            .map(|result| match result {
                Ok(result) => stream::iter(result.rows.into_iter().map(Ok)).left_stream(),
                Err(err) => stream::iter(vec![Err(err)]).right_stream(),
            })
            .flatten()
            .boxed()
    }

    /// Releases the connection. Errors while closing are not reported.
    async fn close(&mut self);
}

/// Host session callbacks consulted between logical operations.
pub trait SessionContext: Send + Sync {
    /// Fails with [`EngineError::Cancelled`] once the host statement was aborted.
    fn check_canceled(&self) -> EngineResult<()>;
}

impl SessionContext for CancellationToken {
    fn check_canceled(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Session that is never cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedSession;

impl SessionContext for DetachedSession {
    fn check_canceled(&self) -> EngineResult<()> {
        Ok(())
    }
}

/// Host catalog bookkeeping for linked tables.
pub trait HostCatalog: Send + Sync {
    /// Records the columns and indexes of a linked table once its remote
    /// metadata has been read. `indexes` starts with the scan index.
    fn register_shape(&self, table_id: u32, columns: &[Arc<Column>], indexes: &[IndexDef]);

    /// Removes the persisted definition of the table with this id.
    fn remove_meta(&self, table_id: u32);
}
