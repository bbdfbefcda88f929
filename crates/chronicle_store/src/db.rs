use sea_orm::sea_query;
use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SchemaStatementBuilder,
    SqliteQueryBuilder,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement};
use sea_orm_migration::prelude::Iden;

use chronicle_core::ChronicleResult;

#[derive(Iden, Clone, Copy)]
pub enum ChronicleSchemaChanges {
    Table,
    ChangeId,
    SchemaVersion,
    AppliedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum ChronicleEvents {
    Table,
    EventId,
    EventType,
    EventTypeId,
    TimeFiredTs,
    PayloadJson,
    ContextId,
    ContextUserId,
    ContextParentId,
    ContextIdBin,
    ContextUserIdBin,
    ContextParentIdBin,
}

#[derive(Iden, Clone, Copy)]
pub enum ChronicleStates {
    Table,
    StateId,
    EntityId,
    State,
    AttributesJson,
    LastUpdatedTs,
    OldStateId,
    ContextId,
    ContextUserId,
    ContextParentId,
    ContextIdBin,
    ContextUserIdBin,
    ContextParentIdBin,
}

#[derive(Iden, Clone, Copy)]
pub enum ChronicleEventTypes {
    Table,
    EventTypeId,
    EventType,
}

pub const EVENTS_TIME_FIRED_INDEX: &str = "ix_chronicle_events_time_fired_ts";
pub const EVENTS_CONTEXT_ID_INDEX: &str = "ix_chronicle_events_context_id";
pub const EVENTS_CONTEXT_ID_BIN_INDEX: &str = "ix_chronicle_events_context_id_bin";
pub const EVENTS_EVENT_TYPE_ID_INDEX: &str = "ix_chronicle_events_event_type_id";
pub const STATES_LAST_UPDATED_INDEX: &str = "ix_chronicle_states_last_updated_ts";
pub const STATES_ENTITY_ID_INDEX: &str = "ix_chronicle_states_entity_id";
pub const STATES_ENTITY_LAST_UPDATED_INDEX: &str = "ix_chronicle_states_entity_id_last_updated_ts";
pub const STATES_OLD_STATE_ID_INDEX: &str = "ix_chronicle_states_old_state_id";
pub const STATES_CONTEXT_ID_INDEX: &str = "ix_chronicle_states_context_id";
pub const STATES_CONTEXT_ID_BIN_INDEX: &str = "ix_chronicle_states_context_id_bin";
pub const EVENT_TYPES_EVENT_TYPE_INDEX: &str = "ix_chronicle_event_types_event_type";

pub(crate) fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub(crate) fn build_schema_stmt<S: SchemaStatementBuilder>(
    backend: DatabaseBackend,
    stmt: &S,
) -> String {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub(crate) async fn exec_schema<C, S>(conn: &C, stmt: &S) -> ChronicleResult<()>
where
    C: ConnectionTrait,
    S: SchemaStatementBuilder,
{
    let backend = conn.get_database_backend();
    let sql = build_schema_stmt(backend, stmt);
    conn.execute_raw(Statement::from_string(backend, sql)).await?;
    Ok(())
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> ChronicleResult<()>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    conn.execute_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> ChronicleResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> ChronicleResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

pub(crate) fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}
