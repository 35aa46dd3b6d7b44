// SPDX-License-Identifier: Apache-2.0

//! SQLite Driver
//!
//! Links tables stored in a SQLite database file.
//!
//! ## SQLite Specifics
//!
//! - The URL is a SQLx SQLite URL (`sqlite:/path/app.db`, `sqlite::memory:`),
//!   optionally prefixed with `jdbc:`; a bare path is accepted too
//! - Attached databases act as schemas, `main` by default
//! - Identifiers are stored as written but compared case-insensitively, so
//!   every remote name is folded to upper case
//! - Catalog queries use the table-valued `pragma_*` functions

use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{
    Column as _, ConnectOptions, Connection as _, Executor as _, Row as _, Statement as _,
    TypeInfo as _,
};

use crate::engine::drivers::{
    declared_precision, default_precision, result_column, split_qualified, sql_type_from_name,
    strip_jdbc, PreparedSql,
};
use crate::engine::error::{RemoteError, RemoteResult};
use crate::engine::traits::{RemoteConnection, RemoteDriver};
use crate::engine::types::{
    CatalogColumn, CatalogTable, IdentifierCase, IndexInfoKind, IndexInfoRow, PrimaryKeyRow,
    Row as QRow, StatementResult, Value,
};
use crate::link::config::LinkConfig;

const DEFAULT_SCHEMA: &str = "main";

/// SQLite driver implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }

    fn build_connect_options(url: &str) -> RemoteResult<SqliteConnectOptions> {
        let url = strip_jdbc(url);
        let opts = if url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(url)?
        } else {
            SqliteConnectOptions::new().filename(url)
        };
        Ok(opts.busy_timeout(std::time::Duration::from_secs(30)))
    }
}

#[async_trait]
impl RemoteDriver for SqliteDriver {
    type Connection = SqliteLink;

    fn driver_id(&self) -> &'static str {
        "sqlite"
    }

    async fn open(&self, config: &LinkConfig) -> RemoteResult<SqliteLink> {
        let conn = Self::build_connect_options(&config.url)?.connect().await?;
        Ok(SqliteLink { conn: Some(conn) })
    }
}

/// One open SQLite connection.
pub struct SqliteLink {
    conn: Option<SqliteConnection>,
}

impl SqliteLink {
    fn conn(&mut self) -> RemoteResult<&mut SqliteConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| RemoteError::new("SQLite connection is closed"))
    }

    /// Helper to bind a Value to a SQLite query
    fn bind_param<'q>(
        query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Bytes(b) => query.bind(b.as_slice()),
            Value::Json(j) => query.bind(j.to_string()),
            Value::Array(items) => query.bind(serde_json::to_string(items).ok()),
        }
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(sqlite_row: &SqliteRow) -> QRow {
        let values: Vec<Value> = sqlite_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(sqlite_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a SqliteRow at the given index
    ///
    /// SQLite has dynamic typing, so we try multiple types in order of likelihood
    fn extract_value(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        // SQLite stores booleans as 0/1
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }

        Value::Null
    }
}

#[async_trait]
impl RemoteConnection for SqliteLink {
    type Statement = PreparedSql;

    async fn identifier_case(&mut self) -> RemoteResult<IdentifierCase> {
        Ok(IdentifierCase {
            stores_lower_case: false,
            stores_mixed_case: true,
            stores_mixed_case_quoted: true,
            supports_mixed_case: false,
        })
    }

    async fn tables(
        &mut self,
        schema: Option<&str>,
        table: &str,
    ) -> RemoteResult<Vec<CatalogTable>> {
        let (schema, table) = split_qualified(schema, table);
        let schema = schema.unwrap_or(DEFAULT_SCHEMA);
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM pragma_table_list(?1, ?2) WHERE type IN ('table', 'view')",
        )
        .bind(table)
        .bind(schema)
        .fetch_all(self.conn()?)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name,)| CatalogTable {
                catalog: None,
                schema: Some(schema.to_string()),
                name,
            })
            .collect())
    }

    async fn columns(
        &mut self,
        schema: Option<&str>,
        table: &str,
    ) -> RemoteResult<Vec<CatalogColumn>> {
        let (schema, table) = split_qualified(schema, table);
        let schema = schema.unwrap_or(DEFAULT_SCHEMA);
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info(?1, ?2) ORDER BY cid")
                .bind(table)
                .bind(schema)
                .fetch_all(self.conn()?)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(name, type_name)| {
                let sql_type = sql_type_from_name(&type_name);
                let (column_size, decimal_digits) = declared_precision(&type_name)
                    .unwrap_or((default_precision(sql_type), 0));
                CatalogColumn {
                    catalog: None,
                    schema: Some(schema.to_string()),
                    name,
                    sql_type,
                    column_size,
                    decimal_digits,
                }
            })
            .collect())
    }

    async fn primary_keys(
        &mut self,
        schema: Option<&str>,
        table: &str,
    ) -> RemoteResult<Vec<PrimaryKeyRow>> {
        let (schema, table) = split_qualified(schema, table);
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT name, pk FROM pragma_table_info(?1, ?2) WHERE pk > 0")
                .bind(table)
                .bind(schema.unwrap_or(DEFAULT_SCHEMA))
                .fetch_all(self.conn()?)
                .await?;

        // SQLite primary keys are unnamed
        Ok(rows
            .into_iter()
            .map(|(column_name, pk)| PrimaryKeyRow {
                column_name,
                key_seq: pk as i32,
                pk_name: None,
            })
            .collect())
    }

    async fn index_info(
        &mut self,
        schema: Option<&str>,
        table: &str,
    ) -> RemoteResult<Vec<IndexInfoRow>> {
        let (schema, table) = split_qualified(schema, table);
        // The automatic index behind a PRIMARY KEY constraint has origin 'pk'
        let rows: Vec<(String, i64, Option<String>)> = sqlx::query_as(
            "SELECT il.name, il.\"unique\", ii.name \
             FROM pragma_index_list(?1, ?2) AS il \
             JOIN pragma_index_info(il.name, ?2) AS ii \
             WHERE il.origin <> 'pk' \
             ORDER BY il.name, ii.seqno",
        )
        .bind(table)
        .bind(schema.unwrap_or(DEFAULT_SCHEMA))
        .fetch_all(self.conn()?)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(index_name, unique, column_name)| IndexInfoRow {
                kind: IndexInfoKind::Index,
                index_name: Some(index_name),
                non_unique: unique == 0,
                column_name,
            })
            .collect())
    }

    async fn prepare(&mut self, sql: &str) -> RemoteResult<PreparedSql> {
        let statement = self.conn()?.prepare(sql).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|col| result_column(col.name(), col.type_info().name()))
            .collect();
        Ok(PreparedSql {
            sql: sql.to_string(),
            columns,
            param_types: Vec::new(),
        })
    }

    async fn execute(
        &mut self,
        statement: &mut PreparedSql,
        params: &[Value],
    ) -> RemoteResult<StatementResult> {
        let mut query = sqlx::query(&statement.sql);
        for param in params {
            query = Self::bind_param(query, param);
        }

        if statement.columns.is_empty() {
            let done = query.execute(self.conn()?).await?;
            return Ok(StatementResult::affected(done.rows_affected()));
        }

        let rows = query.fetch_all(self.conn()?).await?;
        let rows = rows.iter().map(Self::convert_row).collect();
        Ok(StatementResult::rows(statement.columns.clone(), rows))
    }

    fn fetch<'c>(
        &'c mut self,
        statement: &'c mut PreparedSql,
        params: &'c [Value],
    ) -> BoxStream<'c, RemoteResult<QRow>> {
        let mut query = sqlx::query(&statement.sql);
        for param in params {
            query = Self::bind_param(query, param);
        }
        let conn = match self.conn() {
            Ok(conn) => conn,
            Err(err) => return stream::iter([Err(err)]).boxed(),
        };
        query
            .fetch(conn)
            .map(|row| row.map(|r| Self::convert_row(&r)).map_err(RemoteError::from))
            .boxed()
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.close().await;
        }
    }
}
