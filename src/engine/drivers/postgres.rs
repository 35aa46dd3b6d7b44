// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL Driver
//!
//! Links tables of a PostgreSQL database over a single dedicated connection.
//!
//! ## PostgreSQL Specifics
//!
//! - URLs are `postgres://` / `postgresql://` URLs, optionally prefixed with
//!   `jdbc:`; user and password from the link configuration take precedence
//! - Unquoted identifiers are stored in lower case
//! - Positional `?` parameters are rewritten to `$n` at prepare time
//! - Parameters are converted to the types the server described for the
//!   prepared statement; a binary int8 is not accepted for an int4 slot
//! - Primary keys and indexes are read from `pg_constraint` / `pg_index`
//!   because `information_schema` does not expose index columns

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow, Postgres};
use sqlx::{
    Column as _, ConnectOptions, Connection as _, Either, Executor as _, Row as _,
    Statement as _, TypeInfo as _,
};
use uuid::Uuid;

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
    SELECT table_catalog::text, table_schema::text, table_name::text \
    FROM information_schema.tables \
    WHERE table_name = $1 AND ($2::text IS NULL OR table_schema = $2)";

const COLUMNS_QUERY: &str = "\
    SELECT table_catalog::text, table_schema::text, column_name::text, \
           CASE WHEN data_type = 'ARRAY' THEN udt_name::text ELSE data_type::text END, \
           COALESCE(character_maximum_length, numeric_precision, datetime_precision, \
                    CASE WHEN data_type IN ('text', 'character varying', 'bytea') \
                         THEN 2147483647 ELSE 0 END)::int8, \
           COALESCE(numeric_scale, 0)::int4 \
    FROM information_schema.columns \
    WHERE table_name = $1 AND ($2::text IS NULL OR table_schema = $2) \
    ORDER BY table_schema, ordinal_position";

const PRIMARY_KEYS_QUERY: &str = "\
    SELECT a.attname::text, k.ord::int4, c.conname::text \
    FROM pg_constraint c \
    JOIN pg_class t ON t.oid = c.conrelid \
    JOIN pg_namespace n ON n.oid = t.relnamespace \
    CROSS JOIN LATERAL unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord) \
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
    WHERE c.contype = 'p' AND t.relname = $1 AND ($2::text IS NULL OR n.nspname = $2)";

const INDEX_INFO_QUERY: &str = "\
    SELECT i.relname::text, NOT x.indisunique, a.attname::text \
    FROM pg_index x \
    JOIN pg_class t ON t.oid = x.indrelid \
    JOIN pg_class i ON i.oid = x.indexrelid \
    JOIN pg_namespace n ON n.oid = t.relnamespace \
    CROSS JOIN LATERAL unnest(x.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) \
    LEFT JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum AND k.attnum > 0 \
    WHERE t.relname = $1 AND ($2::text IS NULL OR n.nspname = $2) \
    ORDER BY i.relname, k.ord";

/// PostgreSQL driver implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }

    fn build_connect_options(config: &LinkConfig) -> RemoteResult<PgConnectOptions> {
        let mut opts = PgConnectOptions::from_str(strip_jdbc(&config.url))?;
        if !config.user.is_empty() {
            opts = opts.username(&config.user);
        }
        if !config.password.expose().is_empty() {
            opts = opts.password(config.password.expose());
        }
        Ok(opts.application_name("qore-link"))
    }
}

#[async_trait]
impl RemoteDriver for PostgresDriver {
    type Connection = PostgresLink;

    fn driver_id(&self) -> &'static str {
        "postgres"
    }

    async fn open(&self, config: &LinkConfig) -> RemoteResult<PostgresLink> {
        let conn = Self::build_connect_options(config)?.connect().await?;
        Ok(PostgresLink { conn: Some(conn) })
    }
}

/// One open PostgreSQL connection.
pub struct PostgresLink {
    conn: Option<PgConnection>,
}

impl PostgresLink {
    fn conn(&mut self) -> RemoteResult<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| RemoteError::new("PostgreSQL connection is closed"))
    }

    /// Builds the query for a prepared statement, converting each parameter
    /// to its described type.
    fn bound_query<'q>(
        statement: &'q PreparedSql,
        params: &[Value],
    ) -> RemoteResult<sqlx::query::Query<'q, Postgres, PgArguments>> {
        let mut query = sqlx::query(&statement.sql);
        for (i, value) in params.iter().enumerate() {
            let pg_type = statement.param_types.get(i).map(String::as_str);
            query = PgParam::new(value, pg_type)?.bind(query);
        }
        Ok(query)
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(pg_row: &PgRow) -> QRow {
        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(pg_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a PgRow at the given index
    fn extract_value(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
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
        if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
            return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Uuid>, _>(idx) {
            return v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.format(TIMESTAMP_FORMAT).to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return v
                .map(|d| Value::Text(d.format(DATE_FORMAT).to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return v
                .map(|t| Value::Text(t.format(TIME_FORMAT).to_string()))
                .unwrap_or(Value::Null);
        }

        Value::Null
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A parameter converted to the type PostgreSQL described for its slot.
///
/// Temporal, numeric and uuid values reach the host as text; they are parsed
/// back here so a scanned row can be written to the same table.
#[derive(Debug, Clone, PartialEq)]
enum PgParam {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
}

impl PgParam {
    /// `pg_type` is the described type name, `None` if the server gave none.
    fn new(value: &Value, pg_type: Option<&str>) -> RemoteResult<Self> {
        if value.is_null() {
            return Ok(PgParam::Null);
        }
        let Some(pg_type) = pg_type else {
            return Ok(Self::untyped(value));
        };
        let converted = match pg_type {
            "BOOL" => as_bool(value).map(PgParam::Bool),
            "INT2" => value
                .as_i64()
                .and_then(|i| i16::try_from(i).ok())
                .map(PgParam::Int2),
            "INT4" => value
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(PgParam::Int4),
            "INT8" => value.as_i64().map(PgParam::Int8),
            "FLOAT4" => as_float(value).map(|f| PgParam::Float4(f as f32)),
            "FLOAT8" => as_float(value).map(PgParam::Float8),
            "NUMERIC" => as_decimal(value).map(PgParam::Numeric),
            "DATE" => as_text(value)
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok())
                .map(PgParam::Date),
            "TIME" => as_text(value)
                .and_then(|s| NaiveTime::parse_from_str(s.trim(), TIME_FORMAT).ok())
                .map(PgParam::Time),
            "TIMESTAMP" => as_text(value)
                .and_then(|s| parse_timestamp(s.trim()))
                .map(PgParam::Timestamp),
            "TIMESTAMPTZ" => as_text(value)
                .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                .map(|dt| PgParam::TimestampTz(dt.with_timezone(&Utc))),
            "UUID" => as_text(value)
                .and_then(|s| Uuid::parse_str(s.trim()).ok())
                .map(PgParam::Uuid),
            "JSON" | "JSONB" => Some(PgParam::Json(as_json(value))),
            "BYTEA" => match value {
                Value::Bytes(b) => Some(PgParam::Bytes(b.clone())),
                Value::Text(s) => Some(PgParam::Bytes(s.as_bytes().to_vec())),
                _ => None,
            },
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => as_text(value).map(PgParam::Text),
            _ => Some(Self::untyped(value)),
        };
        converted.ok_or_else(|| {
            RemoteError::new(format!(
                "cannot bind {} as {}",
                value.sql_literal(),
                pg_type
            ))
        })
    }

    fn untyped(value: &Value) -> Self {
        match value {
            Value::Null => PgParam::Null,
            Value::Bool(b) => PgParam::Bool(*b),
            Value::Int(i) => PgParam::Int8(*i),
            Value::Float(f) => PgParam::Float8(*f),
            Value::Text(s) => PgParam::Text(s.clone()),
            Value::Bytes(b) => PgParam::Bytes(b.clone()),
            Value::Json(_) | Value::Array(_) => PgParam::Json(as_json(value)),
        }
    }

    fn bind<'q>(
        self,
        query: sqlx::query::Query<'q, Postgres, PgArguments>,
    ) -> sqlx::query::Query<'q, Postgres, PgArguments> {
        match self {
            PgParam::Null => query.bind(Option::<String>::None),
            PgParam::Bool(v) => query.bind(v),
            PgParam::Int2(v) => query.bind(v),
            PgParam::Int4(v) => query.bind(v),
            PgParam::Int8(v) => query.bind(v),
            PgParam::Float4(v) => query.bind(v),
            PgParam::Float8(v) => query.bind(v),
            PgParam::Numeric(v) => query.bind(v),
            PgParam::Text(v) => query.bind(v),
            PgParam::Bytes(v) => query.bind(v),
            PgParam::Json(v) => query.bind(v),
            PgParam::Date(v) => query.bind(v),
            PgParam::Time(v) => query.bind(v),
            PgParam::Timestamp(v) => query.bind(v),
            PgParam::TimestampTz(v) => query.bind(v),
            PgParam::Uuid(v) => query.bind(v),
        }
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int(i) => Some(*i != 0),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "1" | "yes" | "on" => Some(true),
            "f" | "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Int(i) => Some(Decimal::from(*i)),
        Value::Float(f) => Decimal::try_from(*f).ok(),
        Value::Text(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Json(j) => Some(j.to_string()),
        Value::Null | Value::Bytes(_) | Value::Array(_) => None,
    }
}

fn as_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Json(j) => j.clone(),
        Value::Text(s) => serde_json::from_str(s)
            .unwrap_or_else(|_| serde_json::Value::String(s.clone())),
        other => serde_json::to_value(other).unwrap_or(serde_json::Value::Null),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// Rewrites `?` placeholders to `$1, $2, ..`, leaving string literals,
/// quoted identifiers and comments untouched.
pub fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    let mut n = 0;
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    out.push(c);
                    for c in chars.by_ref() {
                        out.push(c);
                        if c == '\n' {
                            break;
                        }
                    }
                }
                '/' if chars.peek() == Some(&'*') => {
                    out.push(c);
                    let mut prev = '\0';
                    for c in chars.by_ref() {
                        out.push(c);
                        if prev == '*' && c == '/' {
                            break;
                        }
                        prev = c;
                    }
                }
                '?' => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                _ => out.push(c),
            },
        }
    }
    out
}

#[async_trait]
impl RemoteConnection for PostgresLink {
    type Statement = PreparedSql;

    async fn identifier_case(&mut self) -> RemoteResult<IdentifierCase> {
        Ok(IdentifierCase {
            stores_lower_case: true,
            ..IdentifierCase::default()
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
        let rows: Vec<(Option<String>, Option<String>, String, String, i64, i32)> =
            sqlx::query_as(COLUMNS_QUERY)
                .bind(table)
                .bind(schema)
                .fetch_all(self.conn()?)
                .await?;

        Ok(rows
            .into_iter()
            .map(
                |(catalog, schema, name, data_type, column_size, decimal_digits)| CatalogColumn {
                    catalog,
                    schema,
                    name,
                    sql_type: sql_type_from_name(&data_type),
                    column_size,
                    decimal_digits,
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
        let rows: Vec<(String, i32, String)> = sqlx::query_as(PRIMARY_KEYS_QUERY)
            .bind(table)
            .bind(schema)
            .fetch_all(self.conn()?)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(column_name, key_seq, pk_name)| PrimaryKeyRow {
                column_name,
                key_seq,
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
        let rows: Vec<(String, bool, Option<String>)> = sqlx::query_as(INDEX_INFO_QUERY)
            .bind(table)
            .bind(schema)
            .fetch_all(self.conn()?)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(index_name, non_unique, column_name)| IndexInfoRow {
                kind: IndexInfoKind::Index,
                index_name: Some(index_name),
                non_unique,
                column_name,
            })
            .collect())
    }

    async fn prepare(&mut self, sql: &str) -> RemoteResult<PreparedSql> {
        let sql = numbered_placeholders(sql);
        let (columns, param_types) = {
            let statement = self.conn()?.prepare(&sql).await?;
            let columns = statement
                .columns()
                .iter()
                .map(|col| result_column(col.name(), col.type_info().name()))
                .collect();
            let param_types = match statement.parameters() {
                Some(Either::Left(types)) => {
                    types.iter().map(|ty| ty.name().to_string()).collect()
                }
                _ => Vec::new(),
            };
            (columns, param_types)
        };
        Ok(PreparedSql {
            sql,
            columns,
            param_types,
        })
    }

    async fn execute(
        &mut self,
        statement: &mut PreparedSql,
        params: &[Value],
    ) -> RemoteResult<StatementResult> {
        let query = Self::bound_query(statement, params)?;

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
        let query = match Self::bound_query(statement, params) {
            Ok(query) => query,
            Err(err) => return stream::iter([Err(err)]).boxed(),
        };
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
