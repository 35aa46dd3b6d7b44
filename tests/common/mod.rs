// SPDX-License-Identifier: Apache-2.0

//! Scripted in-memory remote used by the linked table tests.
//!
//! Every driver call is recorded. Calls that overlap in time are counted as
//! violations, which is how the tests check that the connection handle never
//! interleaves calls into the driver.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use qore_link::engine::error::{RemoteError, RemoteResult};
use qore_link::engine::traits::{HostCatalog, RemoteConnection, RemoteDriver};
use qore_link::engine::types::{
    CatalogColumn, CatalogTable, Column, IdentifierCase, IndexInfoKind, IndexInfoRow, PrimaryKeyRow,
    ResultColumn, Row, SqlType, StatementResult, Value,
};
use qore_link::link::{IndexDef, IndexKind, LinkConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open,
    Prepare(String),
    Execute(String, Vec<Value>),
    Close,
}

/// What the fake remote reports.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub case: IdentifierCase,
    pub tables: Vec<CatalogTable>,
    pub columns: Vec<CatalogColumn>,
    pub probe_columns: Vec<ResultColumn>,
    pub primary_keys: Vec<PrimaryKeyRow>,
    pub index_info: Vec<IndexInfoRow>,
    pub count: i64,
    pub rows: Vec<Row>,
}

impl Script {
    /// `ORDERS(ID int, name varchar)` on a lower-case storing remote, 42 rows.
    pub fn orders() -> Self {
        Self {
            case: IdentifierCase {
                stores_lower_case: true,
                ..IdentifierCase::default()
            },
            tables: vec![table("PUBLIC", "ORDERS")],
            columns: vec![
                catalog_column("PUBLIC", "ID", SqlType::Integer, 10),
                catalog_column("PUBLIC", "name", SqlType::VarChar, 255),
            ],
            probe_columns: vec![
                result_column("ID", SqlType::Integer),
                result_column("name", SqlType::VarChar),
            ],
            count: 42,
            rows: vec![
                Row::new(vec![Value::Int(1), Value::Text("first".into())]),
                Row::new(vec![Value::Int(2), Value::Null]),
            ],
            ..Self::default()
        }
    }
}

pub fn table(schema: &str, name: &str) -> CatalogTable {
    CatalogTable {
        catalog: Some("REMOTE".into()),
        schema: Some(schema.into()),
        name: name.into(),
    }
}

pub fn catalog_column(schema: &str, name: &str, sql_type: SqlType, size: i64) -> CatalogColumn {
    CatalogColumn {
        catalog: Some("REMOTE".into()),
        schema: Some(schema.into()),
        name: name.into(),
        sql_type,
        column_size: size,
        decimal_digits: 0,
    }
}

pub fn result_column(name: &str, sql_type: SqlType) -> ResultColumn {
    ResultColumn {
        name: name.into(),
        sql_type,
        precision: 0,
        scale: 0,
        display_size: 0,
    }
}

pub fn index_row(name: &str, non_unique: bool, column: &str) -> IndexInfoRow {
    IndexInfoRow {
        kind: IndexInfoKind::Index,
        index_name: Some(name.into()),
        non_unique,
        column_name: Some(column.into()),
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    pub script: Script,
    pub calls: Vec<Call>,
    in_flight: bool,
    pub violations: usize,
    /// The next N opens fail.
    pub failing_opens: usize,
    pub opens_always_fail: bool,
    /// The next N data statements (everything but the probe) fail.
    pub failing_executes: usize,
    pub probe_fails: bool,
    /// Time spent inside each driver call.
    pub latency: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MockDriver {
    pub state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new(script: Script) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script,
                ..MockState::default()
            })),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn opens(&self) -> usize {
        self.count(|c| matches!(c, Call::Open))
    }

    pub fn closes(&self) -> usize {
        self.count(|c| matches!(c, Call::Close))
    }

    pub fn prepares_of(&self, prefix: &str) -> usize {
        self.count(|c| matches!(c, Call::Prepare(sql) if sql.starts_with(prefix)))
    }

    pub fn executes_of(&self, prefix: &str) -> usize {
        self.count(|c| matches!(c, Call::Execute(sql, _) if sql.starts_with(prefix)))
    }

    pub fn violations(&self) -> usize {
        self.state.lock().violations
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

/// Records the call, flags overlap with another call, then waits out the
/// configured latency.
async fn enter(state: &Mutex<MockState>, call: Call) {
    let latency = {
        let mut s = state.lock();
        if s.in_flight {
            s.violations += 1;
        }
        s.in_flight = true;
        s.calls.push(call);
        s.latency
    };
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
    state.lock().in_flight = false;
}

#[async_trait]
impl RemoteDriver for MockDriver {
    type Connection = MockConnection;

    fn driver_id(&self) -> &'static str {
        "mock"
    }

    async fn open(&self, _config: &LinkConfig) -> RemoteResult<MockConnection> {
        enter(&self.state, Call::Open).await;
        let mut s = self.state.lock();
        if s.opens_always_fail {
            return Err(RemoteError::new("connection refused"));
        }
        if s.failing_opens > 0 {
            s.failing_opens -= 1;
            return Err(RemoteError::new("connection refused"));
        }
        Ok(MockConnection {
            state: Arc::clone(&self.state),
        })
    }
}

pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

pub struct MockStatement {
    sql: String,
}

#[async_trait]
impl RemoteConnection for MockConnection {
    type Statement = MockStatement;

    async fn identifier_case(&mut self) -> RemoteResult<IdentifierCase> {
        Ok(self.state.lock().script.case)
    }

    async fn tables(
        &mut self,
        _schema: Option<&str>,
        _table: &str,
    ) -> RemoteResult<Vec<CatalogTable>> {
        Ok(self.state.lock().script.tables.clone())
    }

    async fn columns(
        &mut self,
        _schema: Option<&str>,
        _table: &str,
    ) -> RemoteResult<Vec<CatalogColumn>> {
        Ok(self.state.lock().script.columns.clone())
    }

    async fn primary_keys(
        &mut self,
        _schema: Option<&str>,
        _table: &str,
    ) -> RemoteResult<Vec<PrimaryKeyRow>> {
        Ok(self.state.lock().script.primary_keys.clone())
    }

    async fn index_info(
        &mut self,
        _schema: Option<&str>,
        _table: &str,
    ) -> RemoteResult<Vec<IndexInfoRow>> {
        Ok(self.state.lock().script.index_info.clone())
    }

    async fn prepare(&mut self, sql: &str) -> RemoteResult<MockStatement> {
        enter(&self.state, Call::Prepare(sql.to_string())).await;
        Ok(MockStatement {
            sql: sql.to_string(),
        })
    }

    async fn execute(
        &mut self,
        statement: &mut MockStatement,
        params: &[Value],
    ) -> RemoteResult<StatementResult> {
        let sql = statement.sql.clone();
        enter(&self.state, Call::Execute(sql.clone(), params.to_vec())).await;

        let mut s = self.state.lock();
        if sql.ends_with("WHERE 1=0") {
            if s.probe_fails {
                return Err(RemoteError::new("table not found").with_sql_state("42S02"));
            }
            return Ok(StatementResult::rows(s.script.probe_columns.clone(), Vec::new()));
        }
        if s.failing_executes > 0 {
            s.failing_executes -= 1;
            return Err(RemoteError::new("connection reset").with_sql_state("08S01"));
        }
        if sql.starts_with("SELECT COUNT(*)") {
            return Ok(StatementResult::rows(
                vec![result_column("COUNT(*)", SqlType::BigInt)],
                vec![Row::new(vec![Value::Int(s.script.count)])],
            ));
        }
        if sql.starts_with("SELECT") {
            return Ok(StatementResult::rows(
                s.script.probe_columns.clone(),
                s.script.rows.clone(),
            ));
        }
        Ok(StatementResult::affected(1))
    }

    async fn close(&mut self) {
        enter(&self.state, Call::Close).await;
    }
}

/// Host catalog that remembers registered shapes and removed table ids.
#[derive(Default)]
pub struct RecordingCatalog {
    /// `(table id, column names, index kinds)` per registration.
    pub registered: Mutex<Vec<(u32, Vec<String>, Vec<IndexKind>)>>,
    pub removed: Mutex<Vec<u32>>,
}

impl HostCatalog for RecordingCatalog {
    fn register_shape(&self, table_id: u32, columns: &[Arc<Column>], indexes: &[IndexDef]) {
        self.registered.lock().push((
            table_id,
            columns.iter().map(|c| c.name.clone()).collect(),
            indexes.iter().map(|i| i.kind).collect(),
        ));
    }

    fn remove_meta(&self, table_id: u32) {
        self.removed.lock().push(table_id);
    }
}

pub fn orders_config() -> LinkConfig {
    LinkConfig::new(
        "org.h2.Driver",
        "jdbc:h2:mem:remote",
        "sa",
        "secret",
        "ORDERS",
    )
}
