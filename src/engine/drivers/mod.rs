// SPDX-License-Identifier: Apache-2.0

//! Remote drivers over SQLx
//!
//! Each driver opens one dedicated connection per linked table (no pool)
//! and answers catalog questions with vendor catalog queries. Statements are
//! described at prepare time; SQLx keeps the server-side prepared statement
//! cached on the connection.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use crate::engine::types::{ResultColumn, SqlType};

/// A statement checked by the remote, with its result column layout.
#[derive(Debug, Clone)]
pub struct PreparedSql {
    pub sql: String,
    pub columns: Vec<ResultColumn>,
    /// Vendor type names of the parameters, empty when the remote does not
    /// describe them.
    pub param_types: Vec<String>,
}

/// Splits `schema.table` when no schema was configured.
pub(crate) fn split_qualified<'a>(
    schema: Option<&'a str>,
    table: &'a str,
) -> (Option<&'a str>, &'a str) {
    match (schema, table.split_once('.')) {
        (None, Some((schema, table))) => (Some(schema), table),
        _ => (schema, table),
    }
}

/// Removes a leading `jdbc:` so JDBC-style URLs are accepted.
pub(crate) fn strip_jdbc(url: &str) -> &str {
    url.strip_prefix("jdbc:").unwrap_or(url)
}

/// Maps a vendor type name (as found in catalogs and result metadata) to a
/// SQL type code.
pub fn sql_type_from_name(name: &str) -> SqlType {
    let upper = name.trim().to_ascii_uppercase();
    if upper.ends_with("[]") || upper.starts_with('_') || upper == "ARRAY" {
        return SqlType::Array;
    }
    let base = upper
        .split_once('(')
        .map(|(base, _)| base)
        .unwrap_or(&upper)
        .trim()
        .trim_end_matches(" UNSIGNED");
    match base {
        "NULL" => SqlType::Null,
        "BIT" => SqlType::Bit,
        "BOOL" | "BOOLEAN" => SqlType::Boolean,
        "TINYINT" => SqlType::TinyInt,
        "SMALLINT" | "INT2" | "SMALLSERIAL" => SqlType::SmallInt,
        "INT" | "INTEGER" | "INT4" | "MEDIUMINT" | "SERIAL" => SqlType::Integer,
        "BIGINT" | "INT8" | "BIGSERIAL" => SqlType::BigInt,
        "REAL" | "FLOAT4" => SqlType::Real,
        "FLOAT" => SqlType::Float,
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" => SqlType::Double,
        "NUMERIC" => SqlType::Numeric,
        "DECIMAL" | "DEC" => SqlType::Decimal,
        "CHAR" | "CHARACTER" | "BPCHAR" => SqlType::Char,
        "NCHAR" => SqlType::NChar,
        "VARCHAR" | "CHARACTER VARYING" | "TEXT" | "NAME" | "TINYTEXT" => SqlType::VarChar,
        "NVARCHAR" => SqlType::NVarChar,
        "MEDIUMTEXT" => SqlType::LongVarChar,
        "CLOB" | "LONGTEXT" => SqlType::Clob,
        "BINARY" => SqlType::Binary,
        "VARBINARY" | "BYTEA" => SqlType::VarBinary,
        "MEDIUMBLOB" => SqlType::LongVarBinary,
        "BLOB" | "LONGBLOB" | "TINYBLOB" => SqlType::Blob,
        "DATE" => SqlType::Date,
        "TIME" | "TIME WITHOUT TIME ZONE" => SqlType::Time,
        "TIMETZ" | "TIME WITH TIME ZONE" => SqlType::TimeWithTimezone,
        "TIMESTAMP" | "DATETIME" | "TIMESTAMP WITHOUT TIME ZONE" => SqlType::Timestamp,
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => SqlType::TimestampWithTimezone,
        "UUID" => SqlType::Uuid,
        "JSON" | "JSONB" => SqlType::Json,
        _ => SqlType::Other,
    }
}

/// Precision and scale declared in a type name such as `DECIMAL(10,2)`.
pub fn declared_precision(name: &str) -> Option<(i64, i32)> {
    let (_, args) = name.split_once('(')?;
    let args = args.split(')').next()?;
    let mut parts = args.split(',').map(str::trim);
    let precision = parts.next()?.parse().ok()?;
    let scale = match parts.next() {
        Some(scale) => scale.parse().ok()?,
        None => 0,
    };
    Some((precision, scale))
}

/// Precision assumed when the remote does not report one.
pub fn default_precision(sql_type: SqlType) -> i64 {
    match sql_type {
        SqlType::Bit | SqlType::Boolean => 1,
        SqlType::TinyInt => 3,
        SqlType::SmallInt => 5,
        SqlType::Integer => 10,
        SqlType::BigInt => 19,
        SqlType::Real => 7,
        SqlType::Float | SqlType::Double => 17,
        SqlType::Uuid => 36,
        SqlType::Char | SqlType::NChar => 1,
        SqlType::VarChar
        | SqlType::NVarChar
        | SqlType::LongVarChar
        | SqlType::Clob
        | SqlType::VarBinary
        | SqlType::LongVarBinary
        | SqlType::Blob
        | SqlType::Json => i32::MAX as i64,
        _ => 0,
    }
}

/// Result column metadata built from a column name and its vendor type name.
pub fn result_column(name: &str, type_name: &str) -> ResultColumn {
    let sql_type = sql_type_from_name(type_name);
    let (precision, scale) =
        declared_precision(type_name).unwrap_or((default_precision(sql_type), 0));
    ResultColumn {
        name: name.to_string(),
        sql_type,
        precision,
        scale,
        display_size: crate::link::normalize::display_size(precision),
    }
}
