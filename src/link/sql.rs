// SPDX-License-Identifier: Apache-2.0

//! SQL text sent to the remote side of a linked table.
//!
//! Statements are built from the column list fixed at connect time, with
//! positional `?` parameters so identical row shapes reuse one cached
//! prepared statement.

use std::sync::Arc;

use crate::engine::types::{Column, Row, Value};

/// Quoting and null-matching rules of one remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkDialect {
    quote: char,
    oracle: bool,
}

impl LinkDialect {
    pub fn new(quote: char, oracle: bool) -> Self {
        Self { quote, oracle }
    }

    /// Quotes an identifier unless it is a plain upper-case name, which every
    /// remote resolves to the same object whether quoted or not.
    pub fn column_name(&self, name: &str) -> String {
        if is_plain_identifier(name) {
            name.to_string()
        } else {
            quote_identifier(name, self.quote)
        }
    }

    /// Whether the value must be matched with `IS NULL` instead of `=?`.
    /// Oracle stores empty strings as NULL.
    pub fn matches_null(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Text(s) => self.oracle && s.is_empty(),
            _ => false,
        }
    }

    pub fn insert(&self, table: &str, columns: &[Arc<Column>], row: &Row) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let slots: Vec<&str> = columns
            .iter()
            .map(|col| {
                let value = value_at(row, col.position);
                if self.matches_null(value) {
                    "NULL"
                } else {
                    params.push(value.clone());
                    "?"
                }
            })
            .collect();
        let sql = format!("INSERT INTO {} VALUES({})", table, slots.join(", "));
        (sql, params)
    }

    pub fn delete(&self, table: &str, columns: &[Arc<Column>], row: &Row) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let condition = self.row_condition(columns, row, &mut params);
        (format!("DELETE FROM {table} WHERE {condition}"), params)
    }

    pub fn update(
        &self,
        table: &str,
        columns: &[Arc<Column>],
        old_row: &Row,
        new_row: &Row,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let assignments: Vec<String> = columns
            .iter()
            .map(|col| {
                let value = value_at(new_row, col.position);
                let name = self.column_name(&col.name);
                if self.matches_null(value) {
                    format!("{name}=NULL")
                } else {
                    params.push(value.clone());
                    format!("{name}=?")
                }
            })
            .collect();
        let condition = self.row_condition(columns, old_row, &mut params);
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            assignments.join(", "),
            condition
        );
        (sql, params)
    }

    fn row_condition(&self, columns: &[Arc<Column>], row: &Row, params: &mut Vec<Value>) -> String {
        columns
            .iter()
            .map(|col| {
                let value = value_at(row, col.position);
                let name = self.column_name(&col.name);
                if self.matches_null(value) {
                    format!("{name} IS NULL")
                } else {
                    params.push(value.clone());
                    format!("{name}=?")
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

fn value_at(row: &Row, idx: usize) -> &Value {
    row.get(idx).unwrap_or(&Value::Null)
}

/// `[A-Z_][A-Z0-9_]*`
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

pub fn quote_identifier(name: &str, quote: char) -> String {
    let doubled: String = [quote, quote].iter().collect();
    format!("{quote}{}{quote}", name.replace(quote, &doubled))
}

/// Single-quoted SQL string literal.
pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub fn probe_sql(table: &str) -> String {
    format!("SELECT * FROM {table} WHERE 1=0")
}

pub fn scan_sql(table: &str) -> String {
    format!("SELECT * FROM {table} T")
}

pub fn count_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {table}")
}
