#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;

use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement};

use chronicle_store::ddl::Ddl;
use chronicle_store::{ChronicleConfig, migration};

/// Frozen copy of the pre-versioning schema, as created by builds that
/// predate the schema-change log.
const LEGACY_BASELINE_TABLES: &[&str] = &[
    "CREATE TABLE chronicle_events ( \
         event_id integer NOT NULL PRIMARY KEY AUTOINCREMENT, \
         event_type varchar(32), \
         time_fired_ts double, \
         payload_json text \
     )",
    "CREATE TABLE chronicle_states ( \
         state_id integer NOT NULL PRIMARY KEY AUTOINCREMENT, \
         entity_id varchar(255), \
         state varchar(255), \
         attributes_json text, \
         last_updated_ts double \
     )",
];

pub fn test_config(base: &Path) -> ChronicleConfig {
    ChronicleConfig::default_sqlite(base.join("chronicle.sqlite").to_string_lossy())
}

pub async fn open_sqlite(base: &Path) -> DatabaseConnection {
    let path = base.join("chronicle.sqlite");
    Database::connect(format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .expect("connect sqlite")
}

/// Build a database frozen at a historical schema version: the legacy
/// baseline plus every step up to and including `version`.
pub async fn create_database_at_version(conn: &DatabaseConnection, version: i32) {
    for sql in LEGACY_BASELINE_TABLES {
        conn.execute_raw(Statement::from_string(DatabaseBackend::Sqlite, *sql))
            .await
            .expect("create legacy table");
    }
    let ddl = Ddl::new(conn);
    for step in 1..=version {
        for sub_version in 0..migration::sub_step_count(step) {
            migration::apply_update(&ddl, step, sub_version)
                .await
                .expect("apply step");
        }
        migration::log_schema_change(conn, step)
            .await
            .expect("log step");
    }
}

pub async fn latest_schema_version(conn: &DatabaseConnection) -> Option<i32> {
    let row = conn
        .query_one_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            "SELECT schema_version FROM chronicle_schema_changes \
             ORDER BY change_id DESC LIMIT 1",
        ))
        .await
        .expect("query schema version")?;
    Some(row.try_get("", "schema_version").expect("schema_version"))
}

/// Names of all user tables and indexes, for shape comparison between
/// a migrated database and a freshly created one.
pub async fn list_schema_objects(conn: &DatabaseConnection) -> HashSet<String> {
    let rows = conn
        .query_all_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            "SELECT name FROM sqlite_master \
             WHERE type IN ('table', 'index') AND name NOT LIKE 'sqlite_%'",
        ))
        .await
        .expect("query sqlite_master");
    rows.into_iter()
        .map(|row| row.try_get("", "name").expect("name"))
        .collect()
}

pub async fn list_columns(conn: &DatabaseConnection, table: &str) -> HashSet<String> {
    let rows = conn
        .query_all_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            format!("SELECT name FROM pragma_table_info('{table}')"),
        ))
        .await
        .expect("query table info");
    rows.into_iter()
        .map(|row| row.try_get("", "name").expect("name"))
        .collect()
}

pub async fn count_rows(conn: &DatabaseConnection, table: &str) -> i64 {
    let row = conn
        .query_one_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            format!("SELECT COUNT(*) AS n FROM {table}"),
        ))
        .await
        .expect("count rows")
        .expect("count row");
    row.try_get("", "n").expect("n")
}
