// SPDX-License-Identifier: Apache-2.0

//! Data types shared between the host engine, the linked table and the
//! remote drivers.
//!
//! Host side: [`Value`], [`Row`], [`ValueKind`] and [`Column`].
//! Remote side: [`SqlType`] codes and the catalog rows a driver reports.

use serde::{Deserialize, Serialize};

/// Universal value representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Renders the value as a SQL literal for trace output.
    pub fn sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => format!("X'{}'", hex(b)),
            Value::Json(j) => format!("'{}'", j.to_string().replace('\'', "''")),
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(Value::sql_literal).collect();
                format!("ARRAY[{}]", inner.join(", "))
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A single row of data (indexed by column position)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }
}

/// Value kinds understood by the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Decimal,
    Real,
    Double,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    String,
    StringFixed,
    Clob,
    Bytes,
    Blob,
    Uuid,
    Json,
    Array,
    Other,
}

/// Type codes reported by remote catalogs, after each driver has mapped
/// its vendor type names onto them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Null,
    Bit,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Float,
    Double,
    Numeric,
    Decimal,
    Char,
    NChar,
    VarChar,
    NVarChar,
    LongVarChar,
    Clob,
    Binary,
    VarBinary,
    LongVarBinary,
    Blob,
    Date,
    Time,
    TimeWithTimezone,
    Timestamp,
    TimestampWithTimezone,
    Uuid,
    Json,
    Array,
    Other,
}

/// Column as exposed to the host engine.
///
/// The name is already folded to the host's canonical case; equality with
/// host identifiers is case-sensitive on that folded name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ValueKind,
    pub precision: i64,
    pub scale: i32,
    pub display_size: i32,
    /// Zero-based position in the table's column list.
    pub position: usize,
}

/// Identifier storage flags reported by a remote catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierCase {
    pub stores_lower_case: bool,
    pub stores_mixed_case: bool,
    pub stores_mixed_case_quoted: bool,
    pub supports_mixed_case: bool,
}

/// Row of the remote "tables" catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTable {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

/// Row of the remote "columns" catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
    pub sql_type: SqlType,
    pub column_size: i64,
    pub decimal_digits: i32,
}

/// Column metadata of an executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumn {
    pub name: String,
    pub sql_type: SqlType,
    pub precision: i64,
    pub scale: i32,
    pub display_size: i32,
}

/// Row of the remote "primary keys" catalog. Rows are not ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyRow {
    pub column_name: String,
    pub key_seq: i32,
    pub pk_name: Option<String>,
}

/// Whether an index-info row describes an index column or table statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexInfoKind {
    Statistic,
    Index,
}

/// Row of the remote "index info" catalog, sorted by index name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfoRow {
    pub kind: IndexInfoKind,
    pub index_name: Option<String>,
    pub non_unique: bool,
    pub column_name: Option<String>,
}

/// Outcome of one executed remote statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Row>,
    pub affected_rows: Option<u64>,
}

impl StatementResult {
    pub fn rows(columns: Vec<ResultColumn>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            affected_rows: None,
        }
    }

    pub fn affected(affected: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: Some(affected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_serialize_as_base64() {
        let json = serde_json::to_string(&Value::Bytes(vec![1, 2, 3])).expect("serialize");
        assert_eq!(json, "\"AQID\"");
    }

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(Value::Text("o'neil".into()).sql_literal(), "'o''neil'");
        assert_eq!(Value::Bytes(vec![0xab, 0x01]).sql_literal(), "X'ab01'");
        assert_eq!(Value::Null.sql_literal(), "NULL");
    }

    #[test]
    fn count_values_convert_to_i64() {
        assert_eq!(Value::Int(42).as_i64(), Some(42));
        assert_eq!(Value::Text(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(Value::Bool(true).as_i64(), None);
    }
}
