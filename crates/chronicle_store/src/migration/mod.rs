//! Schema-version state machine.
//!
//! The newest row of `chronicle_schema_changes` is the single source
//! of truth for the database's structural version. Startup inspects
//! it, and the persistence worker walks the ordered steps from there
//! to [`SCHEMA_VERSION`], committing one log row per version so the
//! last committed row is always the resume point.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use sea_orm::sea_query::{Order, Query};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};

use crate::db::{ChronicleSchemaChanges, col_name, query_one};
use chronicle_core::ChronicleResult;

mod steps;

pub use steps::{apply_update, create_current_schema, sub_step_count};

/// Current structural version of the store.
pub const SCHEMA_VERSION: i32 = 9;

/// Databases stored below this version pass through the incompatible
/// table rewrite in version 4 and must migrate cold (producer paused);
/// everything at or above it migrates live behind the write queue.
pub const LIVE_MIGRATION_MIN_SCHEMA_VERSION: i32 = 4;

/// Version that introduced the binary context columns.
pub(crate) const CONTEXT_BIN_SCHEMA_VERSION: i32 = 7;

/// Version that introduced the event-type dictionary.
pub(crate) const EVENT_TYPE_DICTIONARY_SCHEMA_VERSION: i32 = 8;

pub fn migration_is_live(from_version: i32) -> bool {
    from_version >= LIVE_MIGRATION_MIN_SCHEMA_VERSION
}

/// Read-only view of the coordinator's state, safe to hand to other
/// components. All mutation flows through the persistence worker.
#[derive(Clone, Copy, Debug)]
pub struct MigrationSnapshot {
    pub in_progress: bool,
    pub is_live: bool,
    pub current_version: i32,
    pub target_version: i32,
}

pub(crate) struct MigrationStatus {
    in_progress: AtomicBool,
    is_live: AtomicBool,
    current_version: AtomicI32,
    target_version: AtomicI32,
}

impl MigrationStatus {
    pub fn new(target_version: i32) -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            is_live: AtomicBool::new(false),
            current_version: AtomicI32::new(0),
            target_version: AtomicI32::new(target_version),
        }
    }

    pub fn snapshot(&self) -> MigrationSnapshot {
        MigrationSnapshot {
            in_progress: self.in_progress.load(Ordering::SeqCst),
            is_live: self.is_live.load(Ordering::SeqCst),
            current_version: self.current_version.load(Ordering::SeqCst),
            target_version: self.target_version.load(Ordering::SeqCst),
        }
    }

    pub fn set_in_progress(&self, value: bool) {
        self.in_progress.store(value, Ordering::SeqCst);
    }

    pub fn set_live(&self, value: bool) {
        self.is_live.store(value, Ordering::SeqCst);
    }

    pub fn set_current_version(&self, version: i32) {
        self.current_version.store(version, Ordering::SeqCst);
    }
}

/// Determine the stored schema version.
///
/// `None` means a brand-new database. `Some(0)` is the pre-versioning
/// shape: fact tables exist but the schema-change log does not.
pub async fn inspect_schema_version<C: ConnectionTrait>(conn: &C) -> ChronicleResult<Option<i32>> {
    if table_exists(conn, "chronicle_schema_changes").await? {
        let version = get_schema_version(conn).await?;
        return Ok(Some(version.unwrap_or(0)));
    }
    if table_exists(conn, "chronicle_events").await? {
        return Ok(Some(0));
    }
    Ok(None)
}

async fn get_schema_version<C: ConnectionTrait>(conn: &C) -> ChronicleResult<Option<i32>> {
    let select = Query::select()
        .from(ChronicleSchemaChanges::Table)
        .column(ChronicleSchemaChanges::SchemaVersion)
        .order_by(ChronicleSchemaChanges::ChangeId, Order::Desc)
        .limit(1)
        .to_owned();
    let row = query_one(conn, &select).await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let version: i32 = row.try_get("", &col_name(ChronicleSchemaChanges::SchemaVersion))?;
    Ok(Some(version))
}

/// Append a row to the schema-change log for a completed version.
pub async fn log_schema_change<C: ConnectionTrait>(conn: &C, version: i32) -> ChronicleResult<()> {
    let applied_at = time::OffsetDateTime::now_utc().unix_timestamp();
    let insert = Query::insert()
        .into_table(ChronicleSchemaChanges::Table)
        .columns([
            ChronicleSchemaChanges::SchemaVersion,
            ChronicleSchemaChanges::AppliedAt,
        ])
        .values_panic([version.into(), applied_at.into()])
        .to_owned();
    crate::db::exec(conn, &insert).await
}

pub(crate) async fn table_exists<C: ConnectionTrait>(
    conn: &C,
    table: &str,
) -> ChronicleResult<bool> {
    let backend = conn.get_database_backend();
    let sql = match backend {
        DatabaseBackend::Sqlite => {
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?"
        }
        DatabaseBackend::MySql => {
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?"
        }
        DatabaseBackend::Postgres => {
            "SELECT tablename FROM pg_catalog.pg_tables \
             WHERE schemaname = current_schema() AND tablename = $1"
        }
        _ => "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
    };
    let row = conn
        .query_one_raw(Statement::from_sql_and_values(
            backend,
            sql,
            [table.into()],
        ))
        .await?;
    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::{LIVE_MIGRATION_MIN_SCHEMA_VERSION, SCHEMA_VERSION, migration_is_live};

    #[test]
    fn live_classification_follows_threshold() {
        for version in 0..LIVE_MIGRATION_MIN_SCHEMA_VERSION {
            assert!(!migration_is_live(version), "version {version} must be cold");
        }
        for version in LIVE_MIGRATION_MIN_SCHEMA_VERSION..SCHEMA_VERSION {
            assert!(migration_is_live(version), "version {version} must be live");
        }
    }

    #[test]
    fn status_snapshot_reflects_updates() {
        let status = super::MigrationStatus::new(SCHEMA_VERSION);
        status.set_in_progress(true);
        status.set_live(true);
        status.set_current_version(3);
        let snapshot = status.snapshot();
        assert!(snapshot.in_progress);
        assert!(snapshot.is_live);
        assert_eq!(snapshot.current_version, 3);
        assert_eq!(snapshot.target_version, SCHEMA_VERSION);
    }
}
