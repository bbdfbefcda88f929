use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{ColumnDef, Index, IndexCreateStatement, Table, TableCreateStatement};

use crate::db::*;
use crate::ddl::Ddl;
use chronicle_core::{ChronicleError, ChronicleResult};

/// Number of sub-version steps carried by a schema version. Most
/// versions are a single unit of work; version 2 builds its two time
/// indexes incrementally.
pub fn sub_step_count(version: i32) -> i32 {
    match version {
        2 => 2,
        _ => 1,
    }
}

/// Apply one migration step, taking the schema from `new_version - 1`
/// to `new_version`. Steps are re-runnable over a partially migrated
/// database: every DDL call tolerates "already exists".
pub async fn apply_update<C: ConnectionTrait>(
    ddl: &Ddl<'_, C>,
    new_version: i32,
    sub_version: i32,
) -> ChronicleResult<()> {
    if new_version < 0 {
        return Err(ChronicleError::invalid(
            "schema version must be non-negative",
        ));
    }
    ddl.maybe_failpoint("apply_update.fail")?;
    match new_version {
        1 => upgrade_to_1(ddl).await,
        2 => upgrade_to_2(ddl, sub_version).await,
        3 => upgrade_to_3(ddl).await,
        4 => upgrade_to_4(ddl).await,
        5 => upgrade_to_5(ddl).await,
        6 => upgrade_to_6(ddl).await,
        7 => upgrade_to_7(ddl).await,
        8 => upgrade_to_8(ddl).await,
        9 => upgrade_to_9(ddl).await,
        _ => Err(ChronicleError::invalid(format!(
            "no schema migration defined for version {new_version}"
        ))),
    }
}

async fn upgrade_to_1<C: ConnectionTrait>(ddl: &Ddl<'_, C>) -> ChronicleResult<()> {
    let conn = ddl.connection();
    exec_schema(conn, &schema_changes_table()).await?;
    // Pre-versioning databases already have the fact tables.
    exec_schema(conn, &baseline_events_table()).await?;
    exec_schema(conn, &baseline_states_table()).await?;
    Ok(())
}

async fn upgrade_to_2<C: ConnectionTrait>(ddl: &Ddl<'_, C>, sub_version: i32) -> ChronicleResult<()> {
    match sub_version {
        0 => {
            ddl.create_index(index_on(
                EVENTS_TIME_FIRED_INDEX,
                ChronicleEvents::Table,
                &[col_name(ChronicleEvents::TimeFiredTs)],
            ))
            .await?;
        }
        _ => {
            ddl.create_index(index_on(
                STATES_LAST_UPDATED_INDEX,
                ChronicleStates::Table,
                &[col_name(ChronicleStates::LastUpdatedTs)],
            ))
            .await?;
        }
    }
    Ok(())
}

async fn upgrade_to_3<C: ConnectionTrait>(ddl: &Ddl<'_, C>) -> ChronicleResult<()> {
    ddl.add_columns(
        ChronicleEvents::Table,
        vec![
            context_text_column(ChronicleEvents::ContextId),
            context_text_column(ChronicleEvents::ContextUserId),
            context_text_column(ChronicleEvents::ContextParentId),
        ],
    )
    .await?;
    ddl.add_columns(
        ChronicleStates::Table,
        vec![
            context_text_column(ChronicleStates::ContextId),
            context_text_column(ChronicleStates::ContextUserId),
            context_text_column(ChronicleStates::ContextParentId),
        ],
    )
    .await?;
    ddl.create_index(index_on(
        EVENTS_CONTEXT_ID_INDEX,
        ChronicleEvents::Table,
        &[col_name(ChronicleEvents::ContextId)],
    ))
    .await?;
    ddl.create_index(index_on(
        STATES_CONTEXT_ID_INDEX,
        ChronicleStates::Table,
        &[col_name(ChronicleStates::ContextId)],
    ))
    .await?;
    ddl.create_index(index_on(
        STATES_ENTITY_ID_INDEX,
        ChronicleStates::Table,
        &[col_name(ChronicleStates::EntityId)],
    ))
    .await?;
    Ok(())
}

async fn upgrade_to_4<C: ConnectionTrait>(ddl: &Ddl<'_, C>) -> ChronicleResult<()> {
    ddl.modify_columns("chronicle_events", &["event_type VARCHAR(64)"])
        .await?;
    Ok(())
}

async fn upgrade_to_5<C: ConnectionTrait>(ddl: &Ddl<'_, C>) -> ChronicleResult<()> {
    ddl.add_columns(
        ChronicleStates::Table,
        vec![
            ColumnDef::new(ChronicleStates::OldStateId)
                .big_integer()
                .to_owned(),
        ],
    )
    .await?;
    ddl.create_index(index_on(
        STATES_OLD_STATE_ID_INDEX,
        ChronicleStates::Table,
        &[col_name(ChronicleStates::OldStateId)],
    ))
    .await?;
    Ok(())
}

async fn upgrade_to_6<C: ConnectionTrait>(ddl: &Ddl<'_, C>) -> ChronicleResult<()> {
    ddl.create_index(index_on(
        STATES_ENTITY_LAST_UPDATED_INDEX,
        ChronicleStates::Table,
        &[
            col_name(ChronicleStates::EntityId),
            col_name(ChronicleStates::LastUpdatedTs),
        ],
    ))
    .await?;
    ddl.drop_index(
        Index::drop()
            .name(STATES_ENTITY_ID_INDEX)
            .table(ChronicleStates::Table)
            .to_owned(),
    )
    .await?;
    Ok(())
}

async fn upgrade_to_7<C: ConnectionTrait>(ddl: &Ddl<'_, C>) -> ChronicleResult<()> {
    ddl.add_columns(
        ChronicleEvents::Table,
        vec![
            context_bin_column(ChronicleEvents::ContextIdBin),
            context_bin_column(ChronicleEvents::ContextUserIdBin),
            context_bin_column(ChronicleEvents::ContextParentIdBin),
        ],
    )
    .await?;
    ddl.add_columns(
        ChronicleStates::Table,
        vec![
            context_bin_column(ChronicleStates::ContextIdBin),
            context_bin_column(ChronicleStates::ContextUserIdBin),
            context_bin_column(ChronicleStates::ContextParentIdBin),
        ],
    )
    .await?;
    ddl.create_index(index_on(
        EVENTS_CONTEXT_ID_BIN_INDEX,
        ChronicleEvents::Table,
        &[col_name(ChronicleEvents::ContextIdBin)],
    ))
    .await?;
    ddl.create_index(index_on(
        STATES_CONTEXT_ID_BIN_INDEX,
        ChronicleStates::Table,
        &[col_name(ChronicleStates::ContextIdBin)],
    ))
    .await?;
    Ok(())
}

async fn upgrade_to_8<C: ConnectionTrait>(ddl: &Ddl<'_, C>) -> ChronicleResult<()> {
    exec_schema(ddl.connection(), &event_types_table()).await?;
    ddl.create_index(index_on(
        EVENT_TYPES_EVENT_TYPE_INDEX,
        ChronicleEventTypes::Table,
        &[col_name(ChronicleEventTypes::EventType)],
    ))
    .await?;
    ddl.add_columns(
        ChronicleEvents::Table,
        vec![
            ColumnDef::new(ChronicleEvents::EventTypeId)
                .big_integer()
                .to_owned(),
        ],
    )
    .await?;
    ddl.create_index(index_on(
        EVENTS_EVENT_TYPE_ID_INDEX,
        ChronicleEvents::Table,
        &[col_name(ChronicleEvents::EventTypeId)],
    ))
    .await?;
    Ok(())
}

async fn upgrade_to_9<C: ConnectionTrait>(ddl: &Ddl<'_, C>) -> ChronicleResult<()> {
    ddl.drop_index(
        Index::drop()
            .name(EVENTS_CONTEXT_ID_INDEX)
            .table(ChronicleEvents::Table)
            .to_owned(),
    )
    .await?;
    ddl.drop_index(
        Index::drop()
            .name(STATES_CONTEXT_ID_INDEX)
            .table(ChronicleStates::Table)
            .to_owned(),
    )
    .await?;
    Ok(())
}

/// Create the full current schema in one pass, for brand-new
/// databases. Must stay shape-equivalent to walking every step.
pub async fn create_current_schema<C: ConnectionTrait>(conn: &C) -> ChronicleResult<()> {
    exec_schema(conn, &schema_changes_table()).await?;
    exec_schema(conn, &current_events_table()).await?;
    exec_schema(conn, &current_states_table()).await?;
    exec_schema(conn, &event_types_table()).await?;
    for index in current_indexes() {
        exec_schema(conn, &index).await?;
    }
    Ok(())
}

fn schema_changes_table() -> TableCreateStatement {
    Table::create()
        .table(ChronicleSchemaChanges::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(ChronicleSchemaChanges::ChangeId)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(ChronicleSchemaChanges::SchemaVersion)
                .integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(ChronicleSchemaChanges::AppliedAt)
                .big_integer()
                .not_null(),
        )
        .to_owned()
}

fn baseline_events_table() -> TableCreateStatement {
    Table::create()
        .table(ChronicleEvents::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(ChronicleEvents::EventId)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(ChronicleEvents::EventType).string_len(32))
        .col(ColumnDef::new(ChronicleEvents::TimeFiredTs).double())
        .col(ColumnDef::new(ChronicleEvents::PayloadJson).text())
        .to_owned()
}

fn baseline_states_table() -> TableCreateStatement {
    Table::create()
        .table(ChronicleStates::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(ChronicleStates::StateId)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(ChronicleStates::EntityId).string_len(255))
        .col(ColumnDef::new(ChronicleStates::State).string_len(255))
        .col(ColumnDef::new(ChronicleStates::AttributesJson).text())
        .col(ColumnDef::new(ChronicleStates::LastUpdatedTs).double())
        .to_owned()
}

fn event_types_table() -> TableCreateStatement {
    Table::create()
        .table(ChronicleEventTypes::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(ChronicleEventTypes::EventTypeId)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(ChronicleEventTypes::EventType).string_len(64))
        .to_owned()
}

fn current_events_table() -> TableCreateStatement {
    Table::create()
        .table(ChronicleEvents::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(ChronicleEvents::EventId)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(ChronicleEvents::EventType).string_len(64))
        .col(ColumnDef::new(ChronicleEvents::TimeFiredTs).double())
        .col(ColumnDef::new(ChronicleEvents::PayloadJson).text())
        .col(context_text_column(ChronicleEvents::ContextId))
        .col(context_text_column(ChronicleEvents::ContextUserId))
        .col(context_text_column(ChronicleEvents::ContextParentId))
        .col(context_bin_column(ChronicleEvents::ContextIdBin))
        .col(context_bin_column(ChronicleEvents::ContextUserIdBin))
        .col(context_bin_column(ChronicleEvents::ContextParentIdBin))
        .col(ColumnDef::new(ChronicleEvents::EventTypeId).big_integer())
        .to_owned()
}

fn current_states_table() -> TableCreateStatement {
    Table::create()
        .table(ChronicleStates::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(ChronicleStates::StateId)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(ChronicleStates::EntityId).string_len(255))
        .col(ColumnDef::new(ChronicleStates::State).string_len(255))
        .col(ColumnDef::new(ChronicleStates::AttributesJson).text())
        .col(ColumnDef::new(ChronicleStates::LastUpdatedTs).double())
        .col(ColumnDef::new(ChronicleStates::OldStateId).big_integer())
        .col(context_text_column(ChronicleStates::ContextId))
        .col(context_text_column(ChronicleStates::ContextUserId))
        .col(context_text_column(ChronicleStates::ContextParentId))
        .col(context_bin_column(ChronicleStates::ContextIdBin))
        .col(context_bin_column(ChronicleStates::ContextUserIdBin))
        .col(context_bin_column(ChronicleStates::ContextParentIdBin))
        .to_owned()
}

fn current_indexes() -> Vec<IndexCreateStatement> {
    vec![
        index_on(
            EVENTS_TIME_FIRED_INDEX,
            ChronicleEvents::Table,
            &[col_name(ChronicleEvents::TimeFiredTs)],
        ),
        index_on(
            EVENTS_CONTEXT_ID_BIN_INDEX,
            ChronicleEvents::Table,
            &[col_name(ChronicleEvents::ContextIdBin)],
        ),
        index_on(
            EVENTS_EVENT_TYPE_ID_INDEX,
            ChronicleEvents::Table,
            &[col_name(ChronicleEvents::EventTypeId)],
        ),
        index_on(
            STATES_LAST_UPDATED_INDEX,
            ChronicleStates::Table,
            &[col_name(ChronicleStates::LastUpdatedTs)],
        ),
        index_on(
            STATES_ENTITY_LAST_UPDATED_INDEX,
            ChronicleStates::Table,
            &[
                col_name(ChronicleStates::EntityId),
                col_name(ChronicleStates::LastUpdatedTs),
            ],
        ),
        index_on(
            STATES_OLD_STATE_ID_INDEX,
            ChronicleStates::Table,
            &[col_name(ChronicleStates::OldStateId)],
        ),
        index_on(
            STATES_CONTEXT_ID_BIN_INDEX,
            ChronicleStates::Table,
            &[col_name(ChronicleStates::ContextIdBin)],
        ),
        index_on(
            EVENT_TYPES_EVENT_TYPE_INDEX,
            ChronicleEventTypes::Table,
            &[col_name(ChronicleEventTypes::EventType)],
        ),
    ]
}

fn context_text_column(col: impl sea_orm::sea_query::IntoIden) -> ColumnDef {
    ColumnDef::new(col).char_len(36).to_owned()
}

fn context_bin_column(col: impl sea_orm::sea_query::IntoIden) -> ColumnDef {
    ColumnDef::new(col).binary_len(16).to_owned()
}

fn index_on<T>(name: &str, table: T, columns: &[String]) -> IndexCreateStatement
where
    T: sea_orm::sea_query::IntoTableRef,
{
    let mut stmt = Index::create().name(name).table(table).to_owned();
    for column in columns {
        stmt.col(sea_orm::sea_query::Alias::new(column));
    }
    stmt
}
