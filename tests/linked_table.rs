// SPDX-License-Identifier: Apache-2.0

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    catalog_column, index_row, orders_config, result_column, table, Call, MockDriver,
    RecordingCatalog, Script,
};
use qore_link::engine::error::EngineError;
use qore_link::engine::traits::DetachedSession;
use qore_link::engine::types::{PrimaryKeyRow, Row, SqlType, Value, ValueKind};
use qore_link::link::{IndexKind, LinkedTable, UpdateOutcome, MAX_RETRY, ROW_COUNT_APPROXIMATION};
use tokio_util::sync::CancellationToken;

async fn orders_table(driver: &MockDriver) -> LinkedTable<MockDriver> {
    LinkedTable::create(7, "ORDERS_LINK", driver.clone(), orders_config())
        .await
        .expect("create linked table")
}

fn column_names(table: &LinkedTable<MockDriver>) -> Vec<String> {
    table.columns().iter().map(|c| c.name.clone()).collect()
}

#[tokio::test]
async fn exposes_remote_columns_and_counts_rows() {
    let driver = MockDriver::new(Script::orders());
    let table = orders_table(&driver).await;

    assert_eq!(column_names(&table), vec!["ID", "NAME"]);
    assert_eq!(table.qualified_table(), "PUBLIC.ORDERS");

    let scan = &table.indexes()[0];
    assert_eq!(scan.kind, IndexKind::Scan);
    assert_eq!(scan.columns.len(), 2);
    assert!(!scan.kind.is_unique());

    assert_eq!(table.row_count(&DetachedSession).await.unwrap(), 42);
    assert_eq!(table.row_count_approximation(), ROW_COUNT_APPROXIMATION);
    assert_eq!(table.disk_space_used(), 0);
}

#[tokio::test]
async fn falls_back_to_probe_metadata() {
    let script = Script {
        columns: Vec::new(),
        probe_columns: vec![
            result_column("A", SqlType::Integer),
            result_column("B", SqlType::Date),
        ],
        ..Script::orders()
    };
    let driver = MockDriver::new(script);
    let table = orders_table(&driver).await;

    let columns = table.columns();
    assert_eq!(column_names(&table), vec!["A", "B"]);
    assert_eq!(columns[0].kind, ValueKind::Int);
    assert_eq!(columns[1].kind, ValueKind::Date);
    assert_eq!(columns[1].precision, 8);
    assert_eq!(table.qualified_table(), "ORDERS");
}

#[tokio::test]
async fn columns_spread_over_schemas_use_the_probe() {
    let script = Script {
        columns: vec![
            catalog_column("PUBLIC", "ID", SqlType::Integer, 10),
            catalog_column("ARCHIVE", "ID", SqlType::Integer, 10),
        ],
        ..Script::orders()
    };
    let driver = MockDriver::new(script);
    let table = orders_table(&driver).await;
    assert_eq!(column_names(&table), vec!["ID", "NAME"]);
}

#[tokio::test]
async fn read_only_insert_sends_nothing() {
    let driver = MockDriver::new(Script::orders());
    let config = orders_config().with_read_only(true);
    let table = LinkedTable::create(1, "RO", driver.clone(), config)
        .await
        .unwrap();
    driver.clear_calls();

    let row = Row::new(vec![Value::Int(3), Value::Text("x".into())]);
    let err = table.add_row(&row).await.unwrap_err();
    assert_eq!(err, EngineError::read_only("RO"));
    assert!(table.remove_row(&row).await.is_err());
    assert!(table
        .update_rows(&DetachedSession, &[(row.clone(), row)])
        .await
        .is_err());
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn oracle_flag_follows_url() {
    let driver = MockDriver::new(Script::orders());
    let mut config = orders_config();
    config.url = "jdbc:oracle:thin:@//db:1521/XE".into();
    let oracle = LinkedTable::create(1, "O", driver.clone(), config).await.unwrap();
    assert!(oracle.is_oracle());

    let other = orders_table(&driver).await;
    assert!(!other.is_oracle());
}

#[tokio::test]
async fn transient_failure_is_retried_transparently() {
    let driver = MockDriver::new(Script::orders());
    let table = orders_table(&driver).await;
    driver.clear_calls();
    driver.state.lock().failing_executes = MAX_RETRY as usize;

    assert_eq!(table.row_count(&DetachedSession).await.unwrap(), 42);
    assert_eq!(driver.executes_of("SELECT COUNT(*)"), MAX_RETRY as usize + 1);
    assert_eq!(driver.opens(), MAX_RETRY as usize);
}

#[tokio::test]
async fn persistent_failure_surfaces_one_wrapped_error() {
    let driver = MockDriver::new(Script::orders());
    let table = orders_table(&driver).await;
    driver.clear_calls();
    driver.state.lock().failing_executes = MAX_RETRY as usize + 1;

    let err = table.row_count(&DetachedSession).await.unwrap_err();
    match err {
        EngineError::LinkedTableAccess { sql, message } => {
            assert_eq!(sql, "SELECT COUNT(*) FROM PUBLIC.ORDERS");
            assert!(message.contains("connection reset"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(driver.executes_of("SELECT COUNT(*)"), MAX_RETRY as usize + 1);

    // The connection recovered during the last reconnect
    assert_eq!(table.row_count(&DetachedSession).await.unwrap(), 42);
}

#[tokio::test]
async fn connect_failure_aborts_creation_without_force() {
    let driver = MockDriver::new(Script::orders());
    driver.state.lock().opens_always_fail = true;

    let err = LinkedTable::create(1, "T", driver.clone(), orders_config())
        .await
        .err()
        .expect("creation must fail");
    assert!(matches!(err, EngineError::ConnectionFailed { .. }));
    assert_eq!(driver.opens(), MAX_RETRY as usize + 1);
}

#[tokio::test]
async fn forced_table_replays_sticky_connect_error() {
    let driver = MockDriver::new(Script::orders());
    driver.state.lock().opens_always_fail = true;
    let config = orders_config().with_force(true);
    let table = LinkedTable::create(1, "T", driver.clone(), config).await.unwrap();

    assert!(table.columns().is_empty());
    assert_eq!(table.indexes().len(), 1);
    let opens = driver.opens();

    let err = table.row_count(&DetachedSession).await.unwrap_err();
    assert!(matches!(err, EngineError::ConnectionFailed { .. }));
    let err = table
        .scan_index()
        .scan(&DetachedSession)
        .await
        .err()
        .expect("scan must fail");
    assert!(matches!(err, EngineError::ConnectionFailed { .. }));
    assert_eq!(driver.opens(), opens, "sticky error must not reconnect");

    driver.state.lock().opens_always_fail = false;
    table.reconnect().await.unwrap();
    assert_eq!(column_names(&table), vec!["ID", "NAME"]);
    assert_eq!(table.row_count(&DetachedSession).await.unwrap(), 42);
}

#[tokio::test]
async fn ambiguous_table_is_not_retried() {
    let script = Script {
        tables: vec![table("PUBLIC", "ORDERS"), table("ARCHIVE", "ORDERS")],
        ..Script::orders()
    };
    let driver = MockDriver::new(script);
    let err = LinkedTable::create(1, "T", driver.clone(), orders_config())
        .await
        .err()
        .expect("creation must fail");
    assert_eq!(err, EngineError::ambiguous_table("ORDERS"));
    assert_eq!(driver.opens(), 1);
}

#[tokio::test]
async fn missing_table_is_reported_as_not_found() {
    let driver = MockDriver::new(Script::orders());
    driver.state.lock().probe_fails = true;
    let err = LinkedTable::create(1, "T", driver.clone(), orders_config())
        .await
        .err()
        .expect("creation must fail");
    assert!(matches!(err, EngineError::TableNotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_operations_never_interleave() {
    let driver = MockDriver::new(Script::orders());
    let table = Arc::new(orders_table(&driver).await);
    driver.state.lock().latency = Some(Duration::from_millis(2));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let table = Arc::clone(&table);
        tasks.push(tokio::spawn(async move {
            let session = DetachedSession;
            assert_eq!(table.row_count(&session).await.unwrap(), 42);
            let row = Row::new(vec![Value::Int(i), Value::Text(format!("row {i}"))]);
            table.add_row(&row).await.unwrap();
            let rows = table
                .scan_index()
                .scan(&session)
                .await
                .unwrap()
                .collect(&session)
                .await
                .unwrap();
            assert_eq!(rows.len(), 2);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(driver.violations(), 0);
    assert_eq!(driver.executes_of("INSERT INTO"), 8);
}

#[tokio::test]
async fn statements_are_prepared_once_per_sql() {
    let driver = MockDriver::new(Script::orders());
    let table = orders_table(&driver).await;
    driver.clear_calls();

    for i in 0..3 {
        table
            .add_row(&Row::new(vec![Value::Int(i), Value::Text("x".into())]))
            .await
            .unwrap();
        table.row_count(&DetachedSession).await.unwrap();
    }
    let session = DetachedSession;
    for _ in 0..2 {
        let rows = table
            .scan_index()
            .scan(&session)
            .await
            .unwrap()
            .collect(&session)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    assert_eq!(driver.prepares_of("INSERT INTO"), 1);
    assert_eq!(driver.executes_of("INSERT INTO"), 3);
    assert_eq!(driver.prepares_of("SELECT COUNT(*)"), 1);
    assert_eq!(driver.prepares_of("SELECT * FROM PUBLIC.ORDERS T"), 1);
}

#[tokio::test]
async fn abandoned_scan_releases_the_connection() {
    let mut script = Script::orders();
    script.rows = (0..400)
        .map(|i| Row::new(vec![Value::Int(i), Value::Null]))
        .collect();
    let driver = MockDriver::new(script);
    let table = orders_table(&driver).await;
    driver.clear_calls();
    let session = DetachedSession;

    let mut cursor = table.scan_index().scan(&session).await.unwrap();
    assert_eq!(
        cursor.next_row(&session).await.unwrap(),
        Some(Row::new(vec![Value::Int(0), Value::Null]))
    );
    drop(cursor);

    let count = tokio::time::timeout(Duration::from_secs(5), table.row_count(&session))
        .await
        .expect("connection released");
    assert_eq!(count.unwrap(), 42);

    let rows = table
        .scan_index()
        .scan(&session)
        .await
        .unwrap()
        .collect(&session)
        .await
        .unwrap();
    assert_eq!(rows.len(), 400);
    assert_eq!(rows[399], Row::new(vec![Value::Int(399), Value::Null]));
    // The abandoned scan did not return its statement to the cache.
    assert_eq!(driver.prepares_of("SELECT * FROM PUBLIC.ORDERS T"), 2);
    assert_eq!(driver.violations(), 0);
}

#[tokio::test]
async fn reconnect_discards_cached_statements() {
    let driver = MockDriver::new(Script::orders());
    let table = orders_table(&driver).await;
    table.row_count(&DetachedSession).await.unwrap();
    driver.clear_calls();

    driver.state.lock().failing_executes = 1;
    table.row_count(&DetachedSession).await.unwrap();

    // Cached statement failed, the retry prepares on the new connection
    assert_eq!(driver.prepares_of("SELECT COUNT(*)"), 1);
    assert_eq!(driver.closes(), 1);
}

#[tokio::test]
async fn mutations_generate_row_matching_sql() {
    let driver = MockDriver::new(Script::orders());
    let config = orders_config().with_emit_updates(true);
    let table = LinkedTable::create(1, "T", driver.clone(), config).await.unwrap();
    driver.clear_calls();

    let old = Row::new(vec![Value::Int(1), Value::Null]);
    let new = Row::new(vec![Value::Int(1), Value::Text("b".into())]);
    table.add_row(&old).await.unwrap();
    table.remove_row(&old).await.unwrap();
    let outcome = table
        .update_rows(&DetachedSession, &[(old.clone(), new.clone())])
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Applied(1));

    let executed: Vec<(String, Vec<Value>)> = driver
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Execute(sql, params) => Some((sql, params)),
            _ => None,
        })
        .collect();
    assert_eq!(
        executed,
        vec![
            (
                "INSERT INTO PUBLIC.ORDERS VALUES(?, NULL)".to_string(),
                vec![Value::Int(1)]
            ),
            (
                "DELETE FROM PUBLIC.ORDERS WHERE ID=? AND NAME IS NULL".to_string(),
                vec![Value::Int(1)]
            ),
            (
                "UPDATE PUBLIC.ORDERS SET ID=?, NAME=? WHERE ID=? AND NAME IS NULL".to_string(),
                vec![Value::Int(1), Value::Text("b".into()), Value::Int(1)]
            ),
        ]
    );
}

#[tokio::test]
async fn updates_fall_back_to_delete_insert_without_emit_updates() {
    let driver = MockDriver::new(Script::orders());
    let table = orders_table(&driver).await;
    driver.clear_calls();

    let row = Row::new(vec![Value::Int(1), Value::Null]);
    let outcome = table
        .update_rows(&DetachedSession, &[(row.clone(), row)])
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::DeleteInsertRequired);
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn cancelled_session_stops_updates_and_scans() {
    let driver = MockDriver::new(Script::orders());
    let config = orders_config().with_emit_updates(true);
    let table = LinkedTable::create(1, "T", driver.clone(), config).await.unwrap();

    let token = CancellationToken::new();
    let mut cursor = table.scan_index().scan(&token).await.unwrap();
    assert!(cursor.next_row(&token).await.unwrap().is_some());
    token.cancel();
    assert_eq!(cursor.next_row(&token).await, Err(EngineError::Cancelled));

    driver.clear_calls();
    let row = Row::new(vec![Value::Int(1), Value::Null]);
    let err = table
        .update_rows(&token, &[(row.clone(), row)])
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Cancelled);
    assert_eq!(driver.executes_of("UPDATE"), 0);
}

#[tokio::test]
async fn structural_ddl_is_rejected_locally() {
    let driver = MockDriver::new(Script::orders());
    let table = orders_table(&driver).await;
    driver.clear_calls();

    let columns = table.columns();
    assert_eq!(
        table.add_index("IDX", &columns).unwrap_err(),
        EngineError::not_supported("LINK")
    );
    assert!(table.check_support_alter().is_err());
    assert!(table.truncate().is_err());
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn primary_key_and_secondary_indexes_are_registered() {
    let script = Script {
        primary_keys: vec![PrimaryKeyRow {
            column_name: "ID".into(),
            key_seq: 1,
            pk_name: Some("PK_ORDERS".into()),
        }],
        index_info: vec![
            index_row("IDX_NAME", true, "name"),
            index_row("PK_ORDERS", false, "ID"),
            index_row("UQ_ID_NAME", false, "ID"),
            index_row("UQ_ID_NAME", false, "name"),
        ],
        ..Script::orders()
    };
    let driver = MockDriver::new(script);
    let table = orders_table(&driver).await;

    let kinds: Vec<IndexKind> = table.indexes().iter().map(|i| i.kind).collect();
    assert_eq!(
        kinds,
        vec![
            IndexKind::Scan,
            IndexKind::PrimaryKey,
            IndexKind::NonUnique,
            IndexKind::Unique
        ]
    );
    let unique = table.unique_index().expect("unique index");
    assert_eq!(unique.kind, IndexKind::PrimaryKey);
    assert_eq!(unique.name.as_deref(), Some("PK_ORDERS"));

    let composite = &table.indexes()[3];
    let names: Vec<String> = composite
        .columns
        .iter()
        .map(|c| c.as_ref().unwrap().name.clone())
        .collect();
    assert_eq!(names, vec!["ID", "NAME"]);
}

#[tokio::test]
async fn resolved_shape_is_registered_with_the_host_catalog() {
    let driver = MockDriver::new(Script::orders());
    driver.state.lock().opens_always_fail = true;
    let config = orders_config().with_force(true);
    let table = LinkedTable::create(3, "T", driver.clone(), config).await.unwrap();
    let catalog = RecordingCatalog::default();

    assert!(!table.register_with(&catalog).unwrap());
    assert!(catalog.registered.lock().is_empty());

    driver.state.lock().opens_always_fail = false;
    table.reconnect().await.unwrap();
    assert!(table.register_with(&catalog).unwrap());
    assert_eq!(
        *catalog.registered.lock(),
        vec![(3, vec!["ID".to_string(), "NAME".to_string()], vec![IndexKind::Scan])]
    );

    table.remove_children_and_resources(&catalog).await;
    assert_eq!(
        table.register_with(&catalog).unwrap_err(),
        EngineError::invalidated("T")
    );
}

#[tokio::test]
async fn drop_invalidates_table() {
    let driver = MockDriver::new(Script::orders());
    let table = orders_table(&driver).await;
    let catalog = RecordingCatalog::default();

    table.remove_children_and_resources(&catalog).await;
    assert_eq!(*catalog.removed.lock(), vec![7]);
    assert!(!table.is_valid());
    assert_eq!(driver.closes(), 1);

    assert_eq!(
        table.row_count(&DetachedSession).await.unwrap_err(),
        EngineError::invalidated("ORDERS_LINK")
    );
    assert!(table.reconnect().await.is_err());

    // Closing again is a no-op
    table.close().await;
    assert_eq!(driver.closes(), 1);
}

#[tokio::test]
async fn create_sql_recreates_configuration() {
    let driver = MockDriver::new(Script::orders());
    let config = orders_config()
        .with_schema("PUBLIC")
        .with_emit_updates(true)
        .with_read_only(true)
        .with_temporary(true, true);
    let table = LinkedTable::create(1, "Orders Link", driver, config)
        .await
        .unwrap()
        .with_comment("it's remote");

    assert_eq!(
        table.create_sql(),
        "CREATE FORCE GLOBAL TEMPORARY LINKED TABLE \"Orders Link\" COMMENT 'it''s remote'\
         ('org.h2.Driver', 'jdbc:h2:mem:remote', 'sa', 'secret', 'PUBLIC', 'ORDERS') \
         EMIT UPDATES READONLY /*--hide--*/"
    );
    assert_eq!(table.drop_sql(), "DROP TABLE IF EXISTS \"Orders Link\"");
    assert_eq!(table.table_type(), "TABLE LINK");
    assert!(!table.is_deterministic());
    assert_eq!(table.max_data_modification_id(), u64::MAX);
    assert!(!table.lock(true));
}

#[tokio::test]
async fn local_temporary_prefix() {
    let driver = MockDriver::new(Script::orders());
    let config = orders_config().with_temporary(true, false);
    let table = LinkedTable::create(1, "T", driver, config).await.unwrap();
    assert!(table
        .create_sql()
        .starts_with("CREATE FORCE LOCAL TEMPORARY LINKED TABLE T("));
}
