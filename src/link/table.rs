// SPDX-License-Identifier: Apache-2.0

//! Linked table facade
//!
//! The object the host engine mounts as a table. It owns the connection
//! handle, the column list fixed by the first successful metadata read and
//! the index descriptors built from it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::{HostCatalog, RemoteDriver, SessionContext};
use crate::engine::types::{Column, Row, Value};
use crate::link::config::LinkConfig;
use crate::link::connection::ConnectionHandle;
use crate::link::index::{IndexDef, IndexKind, LinkedIndex};
use crate::link::introspect::TableMetadata;
use crate::link::sql::{self, LinkDialect};

/// Row count reported to cost estimation without asking the remote.
pub const ROW_COUNT_APPROXIMATION: u64 = 100_000;

pub const TABLE_TYPE: &str = "TABLE LINK";

/// Marks statements carrying credentials so they are kept out of logs.
pub const HIDE_SQL: &str = "/*--hide--*/";

/// What [`LinkedTable::update_rows`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Each pair was sent as one UPDATE.
    Applied(usize),
    /// Emit-updates is off; the host deletes the old rows and inserts the new ones.
    DeleteInsertRequired,
}

/// Columns and indexes as known to the host.
#[derive(Debug)]
struct TableShape {
    columns: Vec<Arc<Column>>,
    qualified_name: String,
    scan: IndexDef,
    /// Primary key first, then secondary indexes in catalog order.
    indexes: Vec<IndexDef>,
    /// False while a forced table has never read remote metadata.
    resolved: bool,
}

impl TableShape {
    fn from_metadata(metadata: TableMetadata) -> Self {
        let mut indexes = Vec::new();
        indexes.extend(metadata.primary_key);
        indexes.extend(metadata.secondary_indexes);
        Self {
            scan: IndexDef::scan(&metadata.columns),
            columns: metadata.columns,
            qualified_name: metadata.qualified_name,
            indexes,
            resolved: true,
        }
    }

    /// Scan index first.
    fn all_indexes(&self) -> Vec<IndexDef> {
        let mut indexes = Vec::with_capacity(self.indexes.len() + 1);
        indexes.push(self.scan.clone());
        indexes.extend(self.indexes.iter().cloned());
        indexes
    }

    fn unresolved(table: &str) -> Self {
        Self {
            columns: Vec::new(),
            qualified_name: table.to_string(),
            scan: IndexDef::scan(&[]),
            indexes: Vec::new(),
            resolved: false,
        }
    }
}

pub struct LinkedTable<D: RemoteDriver> {
    id: u32,
    name: String,
    comment: Option<String>,
    config: LinkConfig,
    dialect: LinkDialect,
    connection: Arc<ConnectionHandle<D>>,
    shape: RwLock<TableShape>,
    valid: AtomicBool,
}

impl<D: RemoteDriver> LinkedTable<D> {
    /// Creates the table and connects to the remote.
    ///
    /// A failed connect aborts creation unless the config sets `force`, in
    /// which case the table is created without columns and every later
    /// operation reports the connect error.
    #[instrument(skip_all, fields(id = id, driver = driver.driver_id()))]
    pub async fn create(
        id: u32,
        name: impl Into<String>,
        driver: D,
        config: LinkConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        let name = name.into();
        let dialect = LinkDialect::new(driver.identifier_quote(), config.is_oracle());
        let connection = Arc::new(ConnectionHandle::new(driver, config.clone(), name.clone()));

        let shape = match connection.connect().await {
            Ok(metadata) => TableShape::from_metadata(metadata),
            Err(err) if config.force => {
                warn!(table = %name, error = %err, "creating linked table without connection");
                TableShape::unresolved(&config.table)
            }
            Err(err) => return Err(err),
        };
        info!(
            table = %name,
            remote = %shape.qualified_name,
            columns = shape.columns.len(),
            "linked table created"
        );

        Ok(Self {
            id,
            name,
            comment: None,
            config,
            dialect,
            connection,
            shape: RwLock::new(shape),
            valid: AtomicBool::new(true),
        })
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Remote table name used in generated SQL.
    pub fn qualified_table(&self) -> String {
        self.shape.read().qualified_name.clone()
    }

    pub fn columns(&self) -> Vec<Arc<Column>> {
        self.shape.read().columns.clone()
    }

    pub fn column(&self, name: &str) -> Option<Arc<Column>> {
        self.shape
            .read()
            .columns
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// The scan index followed by the primary key and secondary indexes.
    pub fn indexes(&self) -> Vec<IndexDef> {
        self.shape.read().all_indexes()
    }

    /// The first unique index whose columns all resolved, preferring the
    /// primary key.
    pub fn unique_index(&self) -> Option<IndexDef> {
        let shape = self.shape.read();
        shape
            .indexes
            .iter()
            .filter(|idx| idx.kind.is_unique() && idx.is_complete())
            .min_by_key(|idx| idx.kind != IndexKind::PrimaryKey)
            .cloned()
    }

    pub fn scan_index(&self) -> LinkedIndex<D> {
        let shape = self.shape.read();
        LinkedIndex::new(
            Arc::clone(&self.connection),
            self.name.clone(),
            shape.qualified_name.clone(),
            shape.columns.clone(),
            self.dialect,
            self.config.read_only,
        )
    }

    pub fn is_oracle(&self) -> bool {
        self.config.is_oracle()
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn emit_updates(&self) -> bool {
        self.config.emit_updates
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Statement that recreates this table.
    pub fn create_sql(&self) -> String {
        let mut buff = String::from("CREATE FORCE ");
        if self.config.temporary || self.config.global_temporary {
            if self.config.global_temporary {
                buff.push_str("GLOBAL ");
            } else {
                buff.push_str("LOCAL ");
            }
            buff.push_str("TEMPORARY ");
        }
        buff.push_str("LINKED TABLE ");
        buff.push_str(&host_identifier(&self.name));
        if let Some(comment) = &self.comment {
            buff.push_str(" COMMENT ");
            buff.push_str(&sql::quote_string(comment));
        }

        let mut args = vec![
            sql::quote_string(&self.config.driver),
            sql::quote_string(&self.config.url),
            sql::quote_string(&self.config.user),
            sql::quote_string(self.config.password.expose()),
        ];
        if let Some(schema) = &self.config.schema {
            args.push(sql::quote_string(schema));
        }
        args.push(sql::quote_string(&self.config.table));
        buff.push('(');
        buff.push_str(&args.join(", "));
        buff.push(')');

        if self.config.emit_updates {
            buff.push_str(" EMIT UPDATES");
        }
        if self.config.read_only {
            buff.push_str(" READONLY");
        }
        buff.push(' ');
        buff.push_str(HIDE_SQL);
        buff
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", host_identifier(&self.name))
    }

    /// Exact row count from the remote.
    #[instrument(skip(self, session), fields(table = %self.name))]
    pub async fn row_count(&self, session: &dyn SessionContext) -> EngineResult<u64> {
        self.ensure_valid()?;
        session.check_canceled()?;
        let sql = sql::count_sql(&self.qualified_table());
        let executed = self.connection.execute(&sql, &[], false).await?;
        let count = executed
            .result
            .rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64);
        if let Some(lease) = executed.lease {
            self.connection.reuse_statement(lease).await;
        }
        match count {
            Some(count) => Ok(count.max(0) as u64),
            None => Err(EngineError::LinkedTableAccess {
                sql,
                message: "COUNT(*) returned no value".to_string(),
            }),
        }
    }

    pub fn row_count_approximation(&self) -> u64 {
        ROW_COUNT_APPROXIMATION
    }

    /// Storage is remote.
    pub fn disk_space_used(&self) -> u64 {
        0
    }

    pub fn add_index(&self, _name: &str, _columns: &[Arc<Column>]) -> EngineResult<IndexDef> {
        Err(EngineError::not_supported("LINK"))
    }

    pub fn check_support_alter(&self) -> EngineResult<()> {
        Err(EngineError::not_supported("LINK"))
    }

    pub fn truncate(&self) -> EngineResult<()> {
        Err(EngineError::not_supported("LINK"))
    }

    pub fn check_rename(&self) -> EngineResult<()> {
        Ok(())
    }

    pub async fn add_row(&self, row: &Row) -> EngineResult<()> {
        self.ensure_valid()?;
        self.scan_index().add(row).await
    }

    pub async fn remove_row(&self, row: &Row) -> EngineResult<()> {
        self.ensure_valid()?;
        self.scan_index().remove(row).await
    }

    /// Applies `(old, new)` row pairs as remote UPDATEs when emit-updates is
    /// on. Cancellation is checked before each pair.
    pub async fn update_rows(
        &self,
        session: &dyn SessionContext,
        rows: &[(Row, Row)],
    ) -> EngineResult<UpdateOutcome> {
        self.ensure_valid()?;
        if self.config.read_only {
            return Err(EngineError::read_only(&self.name));
        }
        if !self.config.emit_updates {
            return Ok(UpdateOutcome::DeleteInsertRequired);
        }
        let index = self.scan_index();
        for (old_row, new_row) in rows {
            session.check_canceled()?;
            index.update(old_row, new_row).await?;
        }
        Ok(UpdateOutcome::Applied(rows.len()))
    }

    /// Replaces the connection and clears a stored connect error. A table
    /// created without a connection adopts the remote columns on its first
    /// successful reconnect.
    #[instrument(skip(self), fields(table = %self.name))]
    pub async fn reconnect(&self) -> EngineResult<()> {
        self.ensure_valid()?;
        let metadata = self.connection.connect().await?;
        let mut shape = self.shape.write();
        if !shape.resolved {
            *shape = TableShape::from_metadata(metadata);
            info!(columns = shape.columns.len(), "linked table columns resolved");
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }

    /// Hands the resolved columns and indexes to the host catalog. A forced
    /// table that never reached its remote has nothing to register yet and
    /// returns false; the host calls again after a successful reconnect.
    pub fn register_with(&self, catalog: &dyn HostCatalog) -> EngineResult<bool> {
        self.ensure_valid()?;
        let shape = self.shape.read();
        if !shape.resolved {
            return Ok(false);
        }
        catalog.register_shape(self.id, &shape.columns, &shape.all_indexes());
        Ok(true)
    }

    /// Drops the table: closes the connection, forgets cached statements,
    /// removes the catalog entry and invalidates this object.
    pub async fn remove_children_and_resources(&self, catalog: &dyn HostCatalog) {
        self.connection.close().await;
        catalog.remove_meta(self.id);
        self.valid.store(false, Ordering::Release);
        info!(table = %self.name, "linked table dropped");
    }

    pub fn table_type(&self) -> &'static str {
        TABLE_TYPE
    }

    pub fn can_drop(&self) -> bool {
        true
    }

    pub fn can_get_row_count(&self) -> bool {
        true
    }

    /// The remote may change at any time.
    pub fn is_deterministic(&self) -> bool {
        false
    }

    pub fn max_data_modification_id(&self) -> u64 {
        u64::MAX
    }

    /// Never takes a host-side lock; returns whether one was taken.
    pub fn lock(&self, _exclusive: bool) -> bool {
        false
    }

    /// Defaults are applied by the remote.
    pub fn default_value(&self, _column: &Column) -> Option<Value> {
        None
    }

    fn ensure_valid(&self) -> EngineResult<()> {
        if !self.is_valid() {
            return Err(EngineError::invalidated(&self.name));
        }
        Ok(())
    }
}

fn host_identifier(name: &str) -> String {
    if sql::is_plain_identifier(name) {
        name.to_string()
    } else {
        sql::quote_identifier(name, '"')
    }
}
