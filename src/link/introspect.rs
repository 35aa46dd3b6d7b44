// SPDX-License-Identifier: Apache-2.0

//! Schema introspection of the remote table
//!
//! Runs on every successful connect:
//!
//! 1. the table name must resolve to at most one catalog entry
//! 2. columns come from the column catalog; rows spanning several
//!    catalog/schema pairs are discarded in favor of step 3
//! 3. a zero-row probe query proves the table is accessible and supplies the
//!    columns when the catalog had none
//! 4. primary key columns are ordered by key sequence
//! 5. index-info rows are grouped into secondary indexes
//!
//! Primary key and index catalogs are optional: drivers that cannot answer
//! them leave the table without those indexes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::engine::error::{EngineError, EngineResult, RemoteError};
use crate::engine::traits::RemoteConnection;
use crate::engine::types::{
    CatalogColumn, Column, IndexInfoKind, IndexInfoRow, PrimaryKeyRow, ResultColumn,
    StatementResult,
};
use crate::link::config::LinkConfig;
use crate::link::index::{IndexDef, IndexKind};
use crate::link::normalize::{display_size, normalize_type, CasePolicy};
use crate::link::sql;

/// Everything learned about the remote table on one connect.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub columns: Vec<Arc<Column>>,
    /// Name used in generated SQL, `schema.table` when the schema is known.
    pub qualified_name: String,
    pub primary_key: Option<IndexDef>,
    pub secondary_indexes: Vec<IndexDef>,
    pub case_policy: CasePolicy,
}

pub async fn read_metadata<C: RemoteConnection>(
    conn: &mut C,
    config: &LinkConfig,
) -> EngineResult<TableMetadata> {
    let schema = config.schema.as_deref();
    let table = config.table.as_str();
    let unreadable = |e: RemoteError| {
        EngineError::connection_failed(format!("Failed to read metadata of {table}: {e}"))
    };

    let case = conn.identifier_case().await.map_err(unreadable)?;
    let case_policy = CasePolicy::from_case(&case);

    let tables = conn.tables(schema, table).await.map_err(unreadable)?;
    if tables.len() > 1 {
        return Err(EngineError::ambiguous_table(table));
    }

    let catalog_columns = conn.columns(schema, table).await.map_err(unreadable)?;
    let (mut columns, remote_schema) = columns_from_catalog(&catalog_columns, case_policy);
    let qualified_name = qualify(table, remote_schema.as_deref());

    let probe = run_probe(conn, &qualified_name)
        .await
        .map_err(|e| EngineError::table_not_found(table, e.to_string()))?;
    if columns.is_empty() {
        debug!(table, "column catalog empty or ambiguous, using probe metadata");
        columns = columns_from_result(&probe.columns, case_policy);
    }

    let by_name: HashMap<&str, &Arc<Column>> =
        columns.iter().map(|c| (c.name.as_str(), c)).collect();
    let resolve = |name: &str| by_name.get(case_policy.fold(name).as_str()).map(|c| Arc::clone(c));

    let pk_rows = match conn.primary_keys(schema, table).await {
        Ok(rows) => rows,
        Err(e) => {
            debug!(table, error = %e, "primary key catalog not supported");
            Vec::new()
        }
    };
    let pk_name = pk_rows.iter().find_map(|r| r.pk_name.clone());
    let primary_key = primary_key_index(&pk_rows, &resolve);

    let index_rows = match conn.index_info(schema, table).await {
        Ok(rows) => rows,
        Err(e) => {
            debug!(table, error = %e, "index catalog not supported");
            Vec::new()
        }
    };
    let secondary_indexes = group_indexes(&index_rows, pk_name.as_deref(), &resolve);

    debug!(
        table,
        qualified = %qualified_name,
        columns = columns.len(),
        primary_key = primary_key.is_some(),
        indexes = secondary_indexes.len(),
        "read linked table metadata"
    );

    Ok(TableMetadata {
        columns,
        qualified_name,
        primary_key,
        secondary_indexes,
        case_policy,
    })
}

async fn run_probe<C: RemoteConnection>(
    conn: &mut C,
    qualified_name: &str,
) -> Result<StatementResult, RemoteError> {
    let sql = sql::probe_sql(qualified_name);
    let mut statement = conn.prepare(&sql).await?;
    conn.execute(&mut statement, &[]).await
}

/// Builds columns from catalog rows and returns them with the schema of the
/// first row. Rows from more than one catalog/schema pair yield no columns.
pub fn columns_from_catalog(
    rows: &[CatalogColumn],
    policy: CasePolicy,
) -> (Vec<Arc<Column>>, Option<String>) {
    let Some(first) = rows.first() else {
        return (Vec::new(), None);
    };
    let schema = first.schema.clone();
    if rows
        .iter()
        .any(|r| r.catalog != first.catalog || r.schema != first.schema)
    {
        return (Vec::new(), schema);
    }

    let columns = rows
        .iter()
        .enumerate()
        .map(|(position, row)| {
            let t = normalize_type(row.sql_type, row.column_size, row.decimal_digits);
            Arc::new(Column {
                name: policy.fold(&row.name),
                kind: t.kind,
                precision: t.precision,
                scale: t.scale,
                display_size: display_size(t.precision),
                position,
            })
        })
        .collect();
    (columns, schema)
}

pub fn columns_from_result(result: &[ResultColumn], policy: CasePolicy) -> Vec<Arc<Column>> {
    result
        .iter()
        .enumerate()
        .map(|(position, col)| {
            let t = normalize_type(col.sql_type, col.precision, col.scale);
            Arc::new(Column {
                name: policy.fold(&col.name),
                kind: t.kind,
                precision: t.precision,
                scale: t.scale,
                display_size: col.display_size,
                position,
            })
        })
        .collect()
}

/// `schema.table` unless the table is already qualified or the schema unknown.
pub fn qualify(table: &str, schema: Option<&str>) -> String {
    match schema {
        Some(schema) if !schema.is_empty() && !table.contains('.') => {
            format!("{schema}.{table}")
        }
        _ => table.to_string(),
    }
}

/// Places items by 1-based key sequence.
///
/// Some drivers report sequence 0 for every key column. An item with
/// sequence 0 takes the first slot left free by the positive sequences, in
/// arrival order. Unfilled positions stay `None`.
pub fn order_by_key_seq<T>(entries: Vec<(i32, T)>) -> Vec<Option<T>> {
    let mut slots: Vec<Option<T>> = Vec::new();
    let mut unplaced = Vec::new();
    for (seq, item) in entries {
        if seq <= 0 {
            unplaced.push(item);
            continue;
        }
        let pos = (seq - 1) as usize;
        if slots.len() <= pos {
            slots.resize_with(pos + 1, || None);
        }
        slots[pos] = Some(item);
    }
    for item in unplaced {
        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(item),
            None => slots.push(Some(item)),
        }
    }
    slots
}

pub fn primary_key_index<F>(rows: &[PrimaryKeyRow], resolve: &F) -> Option<IndexDef>
where
    F: Fn(&str) -> Option<Arc<Column>>,
{
    if rows.is_empty() {
        return None;
    }
    let entries = rows
        .iter()
        .map(|r| (r.key_seq, r.column_name.as_str()))
        .collect();
    let columns = order_by_key_seq(entries)
        .into_iter()
        .map(|name| name.and_then(resolve))
        .collect();
    Some(IndexDef {
        name: rows.iter().find_map(|r| r.pk_name.clone()),
        kind: IndexKind::PrimaryKey,
        columns,
    })
}

/// Groups consecutive index-info rows by index name. Statistics rows, rows
/// without an index name and the primary key index are skipped.
pub fn group_indexes<F>(rows: &[IndexInfoRow], pk_name: Option<&str>, resolve: &F) -> Vec<IndexDef>
where
    F: Fn(&str) -> Option<Arc<Column>>,
{
    let mut indexes = Vec::new();
    let mut current: Option<IndexDef> = None;

    for row in rows {
        if row.kind == IndexInfoKind::Statistic {
            continue;
        }
        let Some(name) = row.index_name.as_deref() else {
            continue;
        };
        if pk_name == Some(name) {
            continue;
        }
        let same_group = current
            .as_ref()
            .is_some_and(|idx| idx.name.as_deref() == Some(name));
        if !same_group {
            indexes.extend(current.take());
            current = Some(IndexDef {
                name: Some(name.to_string()),
                kind: IndexKind::NonUnique,
                columns: Vec::new(),
            });
        }
        if let Some(idx) = current.as_mut() {
            idx.kind = if row.non_unique {
                IndexKind::NonUnique
            } else {
                IndexKind::Unique
            };
            idx.columns
                .push(row.column_name.as_deref().and_then(resolve));
        }
    }
    indexes.extend(current);
    indexes
}
