// SPDX-License-Identifier: Apache-2.0

//! MySQL Driver
//!
//! Links tables of a MySQL/MariaDB database using SQLx.
//!
//! Identifiers are quoted with backticks. With no schema configured the
//! connection's current database is searched.

use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{
    Column as _, ConnectOptions, Connection as _, Executor as _, Row as _, Statement as _,
    TypeInfo as _,
};

use crate::engine::drivers::{
    result_column, split_qualified, sql_type_from_name, strip_jdbc, PreparedSql,
};
use crate::engine::error::{RemoteError, RemoteResult};
use crate::engine::traits::{RemoteConnection, RemoteDriver};
use crate::engine::types::{
    CatalogColumn, CatalogTable, IdentifierCase, IndexInfoKind, IndexInfoRow, PrimaryKeyRow,
    Row as QRow, StatementResult, Value,
};
use crate::link::config::LinkConfig;

const TABLES_QUERY: &str = "\
    SELECT CAST(TABLE_CATALOG AS CHAR), CAST(TABLE_SCHEMA AS CHAR), CAST(TABLE_NAME AS CHAR) \
    FROM information_schema.TABLES \
    WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())";

const COLUMNS_QUERY: &str = "\
    SELECT CAST(TABLE_CATALOG AS CHAR), CAST(TABLE_SCHEMA AS CHAR), CAST(COLUMN_NAME AS CHAR), \
           CAST(COLUMN_TYPE AS CHAR), \
           CAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, DATETIME_PRECISION, 0) \
                AS SIGNED), \
           CAST(COALESCE(NUMERIC_SCALE, 0) AS SIGNED) \
    FROM information_schema.COLUMNS \
    WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE()) \
    ORDER BY TABLE_SCHEMA, ORDINAL_POSITION";

const PRIMARY_KEYS_QUERY: &str = "\
    SELECT CAST(COLUMN_NAME AS CHAR), CAST(SEQ_IN_INDEX AS SIGNED), CAST(INDEX_NAME AS CHAR) \
    FROM information_schema.STATISTICS \
    WHERE INDEX_NAME = 'PRIMARY' AND TABLE_NAME = ? \
      AND TABLE_SCHEMA = COALESCE(?, DATABASE())";

const INDEX_INFO_QUERY: &str = "\
    SELECT CAST(INDEX_NAME AS CHAR), CAST(NON_UNIQUE AS SIGNED), CAST(COLUMN_NAME AS CHAR) \
    FROM information_schema.STATISTICS \
    WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE()) \
    ORDER BY INDEX_NAME, SEQ_IN_INDEX";

/// MySQL driver implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn new() -> Self {
        Self
    }

    fn build_connect_options(config: &LinkConfig) -> RemoteResult<MySqlConnectOptions> {
        let mut opts = MySqlConnectOptions::from_str(strip_jdbc(&config.url))?;
        if !config.user.is_empty() {
            opts = opts.username(&config.user);
        }
        if !config.password.expose().is_empty() {
            opts = opts.password(config.password.expose());
        }
        Ok(opts)
    }
}

#[async_trait]
impl RemoteDriver for MySqlDriver {
    type Connection = MySqlLink;

    fn driver_id(&self) -> &'static str {
        "mysql"
    }

    fn identifier_quote(&self) -> char {
        '`'
    }

    async fn open(&self, config: &LinkConfig) -> RemoteResult<MySqlLink> {
        let conn = Self::build_connect_options(config)?.connect().await?;
        Ok(MySqlLink { conn: Some(conn) })
    }
}

/// One open MySQL connection.
pub struct MySqlLink {
    conn: Option<MySqlConnection>,
}

impl MySqlLink {
    fn conn(&mut self) -> RemoteResult<&mut MySqlConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| RemoteError::new("MySQL connection is closed"))
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, MySql, MySqlArguments>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
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
    fn convert_row(mysql_row: &MySqlRow) -> QRow {
        let values: Vec<Value> = mysql_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(mysql_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a MySqlRow at the given index
    fn extract_value(row: &MySqlRow, idx: usize) -> Value {
        // Try u64 first for BIGINT UNSIGNED columns
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
            return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v
                .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }

        Value::Null
    }
}

#[async_trait]
impl RemoteConnection for MySqlLink {
    type Statement = PreparedSql;

    /// Unquoted identifiers keep their case; table name comparison follows
    /// the server's file system, column names are case-insensitive.
    async fn identifier_case(&mut self) -> RemoteResult<IdentifierCase> {
        Ok(IdentifierCase {
            stores_lower_case: false,
            stores_mixed_case: true,
            stores_mixed_case_quoted: false,
            supports_mixed_case: true,
        })
    }

    async fn tables(
        &mut self,
        schema: Option<&str>,
        table: &str,
    ) -> RemoteResult<Vec<CatalogTable>> {
        let (schema, table) = split_qualified(schema, table);
        let rows: Vec<(Option<String>, Option<String>, String)> = sqlx::query_as(TABLES_QUERY)
            .bind(table)
            .bind(schema)
            .fetch_all(self.conn()?)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(catalog, schema, name)| CatalogTable {
                catalog,
                schema,
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
        let rows: Vec<(Option<String>, Option<String>, String, String, i64, i64)> =
            sqlx::query_as(COLUMNS_QUERY)
                .bind(table)
                .bind(schema)
                .fetch_all(self.conn()?)
                .await?;

        Ok(rows
            .into_iter()
            .map(
                |(catalog, schema, name, column_type, column_size, decimal_digits)| CatalogColumn {
                    catalog,
                    schema,
                    name,
                    sql_type: sql_type_from_name(&column_type),
                    column_size,
                    decimal_digits: decimal_digits as i32,
                },
            )
            .collect())
    }

    async fn primary_keys(
        &mut self,
        schema: Option<&str>,
        table: &str,
    ) -> RemoteResult<Vec<PrimaryKeyRow>> {
        let (schema, table) = split_qualified(schema, table);
        let rows: Vec<(String, i64, String)> = sqlx::query_as(PRIMARY_KEYS_QUERY)
            .bind(table)
            .bind(schema)
            .fetch_all(self.conn()?)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(column_name, key_seq, pk_name)| PrimaryKeyRow {
                column_name,
                key_seq: key_seq as i32,
                pk_name: Some(pk_name),
            })
            .collect())
    }

    async fn index_info(
        &mut self,
        schema: Option<&str>,
        table: &str,
    ) -> RemoteResult<Vec<IndexInfoRow>> {
        let (schema, table) = split_qualified(schema, table);
        let rows: Vec<(String, i64, Option<String>)> = sqlx::query_as(INDEX_INFO_QUERY)
            .bind(table)
            .bind(schema)
            .fetch_all(self.conn()?)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(index_name, non_unique, column_name)| IndexInfoRow {
                kind: IndexInfoKind::Index,
                index_name: Some(index_name),
                non_unique: non_unique != 0,
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
