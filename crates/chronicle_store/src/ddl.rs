//! Forgiving DDL primitives.
//!
//! Schema steps must converge when re-run over a partially migrated
//! database, so every primitive classifies "already exists" driver
//! errors as success instead of failing the run. Driver libraries do
//! not expose structured error codes uniformly; classification is a
//! text heuristic over the wrapped error message.

use std::time::Duration;

use log::{debug, info, warn};
use sea_orm::sea_query::{ColumnDef, IndexCreateStatement, IndexDropStatement, IntoTableRef, Table};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use tokio::time::sleep;

use crate::db::build_schema_stmt;
use crate::fault::Faults;
use chronicle_core::{ChronicleError, ChronicleResult};

pub const MAX_DDL_ATTEMPTS: usize = 5;
pub const DDL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What a DDL call did. Fatal errors propagate as `Err` instead of a
/// third variant so `?` composes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DdlOutcome {
    Applied,
    AlreadySatisfied,
}

/// Transient contention the driver reports with these fragments (MySQL
/// codes 1205/1206/1213, SQLite busy) is retried in place.
const RETRYABLE_PATTERNS: &[&str] = &[
    "lock wait timeout",
    "deadlock",
    "lock table full",
    "database is locked",
    "1205",
    "1206",
    "1213",
];

const DUPLICATE_COLUMN_PATTERNS: &[&str] = &["duplicate column", "already exists"];

const DUPLICATE_INDEX_PATTERNS: &[&str] = &["already exists", "duplicate"];

const MISSING_INDEX_PATTERNS: &[&str] = &[
    "no such index",
    "does not exist",
    "check that column/key exists",
    "unknown index",
];

const CORRUPTION_PATTERNS: &[&str] = &[
    "database disk image is malformed",
    "file is not a database",
    "malformed database schema",
];

fn matches_any(err: &ChronicleError, patterns: &[&str]) -> bool {
    let text = err.to_string().to_lowercase();
    patterns.iter().any(|pattern| text.contains(pattern))
}

pub(crate) fn is_retryable(err: &ChronicleError) -> bool {
    matches_any(err, RETRYABLE_PATTERNS)
}

pub(crate) fn is_corruption(err: &ChronicleError) -> bool {
    matches!(err, ChronicleError::Corruption { .. }) || matches_any(err, CORRUPTION_PATTERNS)
}

/// Re-type storage errors carrying a known corruption signature so
/// callers can match on the variant.
pub(crate) fn escalate(err: ChronicleError) -> ChronicleError {
    if !matches!(err, ChronicleError::Corruption { .. }) && matches_any(&err, CORRUPTION_PATTERNS) {
        return ChronicleError::corruption(err.to_string());
    }
    err
}

/// DDL runner bound to one connection. Carries the shared fault set so
/// tests can inject transient failures at named sites.
pub struct Ddl<'c, C: ConnectionTrait> {
    conn: &'c C,
    faults: Faults,
}

impl<'c, C: ConnectionTrait> Ddl<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self {
            conn,
            faults: Faults::default(),
        }
    }

    pub(crate) fn with_faults(conn: &'c C, faults: Faults) -> Self {
        Self { conn, faults }
    }

    pub(crate) fn connection(&self) -> &'c C {
        self.conn
    }

    pub(crate) fn maybe_failpoint(&self, site: &str) -> ChronicleResult<()> {
        if self.faults.contains(site) {
            return Err(ChronicleError::storage(format!("failpoint {site}")));
        }
        Ok(())
    }

    /// Add columns one ALTER at a time; a per-dialect "duplicate
    /// column" error means a previous run already got there.
    pub async fn add_columns<T>(
        &self,
        table: T,
        columns: Vec<ColumnDef>,
    ) -> ChronicleResult<DdlOutcome>
    where
        T: IntoTableRef + Clone,
    {
        let mut outcome = DdlOutcome::AlreadySatisfied;
        for column in columns {
            let stmt = Table::alter()
                .table(table.clone())
                .add_column(column)
                .to_owned();
            let sql = build_schema_stmt(self.conn.get_database_backend(), &stmt);
            match self.run_with_retry("add_columns", &sql).await {
                Ok(()) => outcome = DdlOutcome::Applied,
                Err(err) if matches_any(&err, DUPLICATE_COLUMN_PATTERNS) => {
                    info!("column already exists, continuing: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(outcome)
    }

    /// Build an index; "already exists" is success. Anything
    /// unrecognized re-raises, since it may be real corruption.
    pub async fn create_index(&self, stmt: IndexCreateStatement) -> ChronicleResult<DdlOutcome> {
        let sql = build_schema_stmt(self.conn.get_database_backend(), &stmt);
        match self.run_with_retry("create_index", &sql).await {
            Ok(()) => Ok(DdlOutcome::Applied),
            Err(err) if matches_any(&err, DUPLICATE_INDEX_PATTERNS) => {
                info!("index already exists, continuing: {err}");
                Ok(DdlOutcome::AlreadySatisfied)
            }
            Err(err) => Err(err),
        }
    }

    /// Drop an index. A missing index means a previous run already
    /// dropped it; other failures are logged and swallowed, an index
    /// drop never aborts a migration.
    pub async fn drop_index(&self, stmt: IndexDropStatement) -> ChronicleResult<DdlOutcome> {
        let sql = build_schema_stmt(self.conn.get_database_backend(), &stmt);
        match self.run_with_retry("drop_index", &sql).await {
            Ok(()) => Ok(DdlOutcome::Applied),
            Err(err) if matches_any(&err, MISSING_INDEX_PATTERNS) => {
                debug!("index already dropped: {err}");
                Ok(DdlOutcome::AlreadySatisfied)
            }
            Err(err) => {
                warn!("failed to drop index, continuing: {err}");
                Ok(DdlOutcome::AlreadySatisfied)
            }
        }
    }

    /// Change column types with dialect-specific ALTER syntax. SQLite
    /// has no native narrowing syntax and stores the data losslessly
    /// anyway, so it is a no-op there.
    pub async fn modify_columns(
        &self,
        table: &str,
        column_defs: &[&str],
    ) -> ChronicleResult<DdlOutcome> {
        let backend = self.conn.get_database_backend();
        let Some(statements) = modify_columns_sql(backend, table, column_defs) else {
            return Ok(DdlOutcome::AlreadySatisfied);
        };
        for sql in statements {
            self.run_with_retry("modify_columns", &sql).await?;
        }
        Ok(DdlOutcome::Applied)
    }

    async fn run_with_retry(&self, site: &str, sql: &str) -> ChronicleResult<()> {
        let backend = self.conn.get_database_backend();
        let mut attempt = 1;
        loop {
            let result = if self.faults.take(&format!("{site}.retryable_once")) {
                Err(ChronicleError::storage(
                    "injected transient error: lock wait timeout",
                ))
            } else {
                self.conn
                    .execute_raw(Statement::from_string(backend, sql.to_owned()))
                    .await
                    .map(|_| ())
                    .map_err(ChronicleError::from)
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err) if is_retryable(&err) && attempt < MAX_DDL_ATTEMPTS => {
                    warn!(
                        "retryable database error during {site} \
                         (attempt {attempt}/{MAX_DDL_ATTEMPTS}): {err}"
                    );
                    sleep(DDL_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(err) => return Err(escalate(err)),
            }
        }
    }
}

fn modify_columns_sql(
    backend: DatabaseBackend,
    table: &str,
    column_defs: &[&str],
) -> Option<Vec<String>> {
    match backend {
        DatabaseBackend::Postgres => {
            let alters = column_defs
                .iter()
                .map(|def| {
                    let (column, kind) = split_column_def(def);
                    format!("ALTER {column} TYPE {kind}")
                })
                .collect::<Vec<_>>()
                .join(", ");
            Some(vec![format!("ALTER TABLE {table} {alters}")])
        }
        DatabaseBackend::MySql => {
            let modifies = column_defs
                .iter()
                .map(|def| format!("MODIFY {def}"))
                .collect::<Vec<_>>()
                .join(", ");
            Some(vec![format!("ALTER TABLE {table} {modifies}")])
        }
        _ => None,
    }
}

fn split_column_def(def: &str) -> (&str, &str) {
    match def.split_once(' ') {
        Some((column, kind)) => (column, kind),
        None => (def, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DatabaseBackend, escalate, is_retryable, matches_any, modify_columns_sql,
        DUPLICATE_INDEX_PATTERNS,
    };
    use chronicle_core::ChronicleError;

    #[test]
    fn modify_column_generates_dialect_syntax() {
        let postgres =
            modify_columns_sql(DatabaseBackend::Postgres, "events", &["event_type VARCHAR(64)"])
                .expect("postgres statements");
        assert!(postgres[0].contains("ALTER event_type TYPE VARCHAR(64)"));

        let mysql =
            modify_columns_sql(DatabaseBackend::MySql, "events", &["event_type VARCHAR(64)"])
                .expect("mysql statements");
        assert!(mysql[0].contains("MODIFY event_type VARCHAR(64)"));

        assert!(
            modify_columns_sql(DatabaseBackend::Sqlite, "events", &["event_type VARCHAR(64)"])
                .is_none()
        );
    }

    #[test]
    fn classifies_retryable_errors() {
        let err = ChronicleError::storage("1205 (HY000): Lock wait timeout exceeded");
        assert!(is_retryable(&err));
        let err = ChronicleError::storage("syntax error near ALTER");
        assert!(!is_retryable(&err));
    }

    #[test]
    fn classifies_duplicate_index_messages() {
        let err = ChronicleError::storage("relation \"ix_states_old_state_id\" already exists");
        assert!(matches_any(&err, DUPLICATE_INDEX_PATTERNS));
        let err = ChronicleError::storage("Duplicate key name 'ix_states_context_id'");
        assert!(matches_any(&err, DUPLICATE_INDEX_PATTERNS));
        let err = ChronicleError::storage("permission denied");
        assert!(!matches_any(&err, DUPLICATE_INDEX_PATTERNS));
    }

    #[test]
    fn escalates_corruption_signatures() {
        let err = escalate(ChronicleError::storage("database disk image is malformed"));
        assert!(matches!(err, ChronicleError::Corruption { .. }));
        let err = escalate(ChronicleError::storage("lock wait timeout"));
        assert!(matches!(err, ChronicleError::Storage { .. }));
    }
}
