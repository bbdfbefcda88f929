mod common;

use std::sync::Arc;

use sea_orm::sea_query::{Alias, ColumnDef, Index};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use tempfile::tempdir;

use chronicle_store::ddl::{Ddl, DdlOutcome};
use chronicle_store::{NullNotifier, Recorder, SCHEMA_VERSION};

#[tokio::test]
async fn add_columns_tolerates_existing_columns() {
    let dir = tempdir().expect("tempdir");
    let conn = common::open_sqlite(dir.path()).await;
    conn.execute_raw(Statement::from_string(
        DatabaseBackend::Sqlite,
        "CREATE TABLE hello (id int)",
    ))
    .await
    .expect("create table");

    let ddl = Ddl::new(&conn);
    let column = || {
        ColumnDef::new(Alias::new("context_id"))
            .char_len(36)
            .to_owned()
    };
    let outcome = ddl
        .add_columns(Alias::new("hello"), vec![column()])
        .await
        .expect("first add");
    assert_eq!(outcome, DdlOutcome::Applied);

    let outcome = ddl
        .add_columns(Alias::new("hello"), vec![column()])
        .await
        .expect("second add");
    assert_eq!(outcome, DdlOutcome::AlreadySatisfied);
}

#[tokio::test]
async fn create_index_tolerates_existing_index() {
    let dir = tempdir().expect("tempdir");
    let conn = common::open_sqlite(dir.path()).await;
    conn.execute_raw(Statement::from_string(
        DatabaseBackend::Sqlite,
        "CREATE TABLE hello (id int, context_id char(36))",
    ))
    .await
    .expect("create table");

    let ddl = Ddl::new(&conn);
    let index = || {
        Index::create()
            .name("ix_hello_context_id")
            .table(Alias::new("hello"))
            .col(Alias::new("context_id"))
            .to_owned()
    };
    let outcome = ddl.create_index(index()).await.expect("first create");
    assert_eq!(outcome, DdlOutcome::Applied);

    let outcome = ddl.create_index(index()).await.expect("second create");
    assert_eq!(outcome, DdlOutcome::AlreadySatisfied);
}

#[tokio::test]
async fn create_index_raises_unrecognized_errors() {
    let dir = tempdir().expect("tempdir");
    let conn = common::open_sqlite(dir.path()).await;

    let ddl = Ddl::new(&conn);
    // No such table: neither a duplicate nor a transient error.
    let result = ddl
        .create_index(
            Index::create()
                .name("ix_missing_table")
                .table(Alias::new("missing_table"))
                .col(Alias::new("id"))
                .to_owned(),
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn drop_index_tolerates_missing_index() {
    let dir = tempdir().expect("tempdir");
    let conn = common::open_sqlite(dir.path()).await;

    let ddl = Ddl::new(&conn);
    let outcome = ddl
        .drop_index(Index::drop().name("ix_never_created").to_owned())
        .await
        .expect("drop");
    assert_eq!(outcome, DdlOutcome::AlreadySatisfied);
}

#[tokio::test]
async fn modify_columns_is_a_noop_on_sqlite() {
    let dir = tempdir().expect("tempdir");
    let conn = common::open_sqlite(dir.path()).await;

    let ddl = Ddl::new(&conn);
    let outcome = ddl
        .modify_columns("hello", &["context_id VARCHAR(64)"])
        .await
        .expect("modify");
    assert_eq!(outcome, DdlOutcome::AlreadySatisfied);
}

#[tokio::test]
async fn transient_index_failure_is_retried_during_migration() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let conn = common::open_sqlite(base).await;
    common::create_database_at_version(&conn, 1).await;

    let mut config = common::test_config(base);
    config.failpoints = Some(vec!["create_index.retryable_once".to_string()]);
    let recorder = Recorder::start(&config, base, Arc::new(NullNotifier)).expect("start recorder");
    assert!(
        recorder.wait_ready().await,
        "a transient failure must not fail the migration"
    );
    assert_eq!(
        common::latest_schema_version(&conn).await,
        Some(SCHEMA_VERSION)
    );

    // The retried index exists exactly once.
    let rows = conn
        .query_all_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            "SELECT name FROM sqlite_master \
             WHERE type = 'index' AND name = 'ix_chronicle_events_time_fired_ts'",
        ))
        .await
        .expect("query indexes");
    assert_eq!(rows.len(), 1);
    recorder.shutdown().await;
}
