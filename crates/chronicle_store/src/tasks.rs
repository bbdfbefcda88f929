//! Units of work processed by the persistence worker, including the
//! background jobs that rewrite legacy textual identifiers in place.
//! Rewrites run on the same worker as ordinary persistence, so they
//! can never race with DDL or with each other.

use std::collections::BTreeMap;

use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{Alias, Cond, Expr, ExprTrait, Query, Value as SeaValue};
use tokio::sync::oneshot;

use crate::db::{
    ChronicleEventTypes, ChronicleEvents, col_name, exec, query_all, query_one,
};
use chronicle_core::{ChronicleResult, EventPayload, StateChangePayload, encode_context_id};

/// Rows converted per scheduling round. A full page re-enqueues the
/// task so long scans stay interleaved with ordinary persistence.
pub(crate) const REWRITE_BATCH_SIZE: u64 = 1000;

/// A unit of work for the persistence worker.
#[derive(Debug)]
pub enum RecorderTask {
    Event(EventPayload),
    StateChange(StateChangePayload),
    ContextIdRewrite,
    EventTypeIdRewrite,
    /// Resolves once every task queued before it has been processed.
    Synchronize(oneshot::Sender<()>),
    Stop,
}

struct ContextTableSpec {
    table: &'static str,
    id_column: &'static str,
}

const CONTEXT_TABLES: &[ContextTableSpec] = &[
    ContextTableSpec {
        table: "chronicle_events",
        id_column: "event_id",
    },
    ContextTableSpec {
        table: "chronicle_states",
        id_column: "state_id",
    },
];

/// Convert one batch of legacy textual context identifiers to the
/// binary columns. Returns true when no work remains.
pub(crate) async fn rewrite_context_ids<C: ConnectionTrait>(conn: &C) -> ChronicleResult<bool> {
    let mut done = true;
    for spec in CONTEXT_TABLES {
        done &= rewrite_table_context_ids(conn, spec).await?;
    }
    Ok(done)
}

async fn rewrite_table_context_ids<C: ConnectionTrait>(
    conn: &C,
    spec: &ContextTableSpec,
) -> ChronicleResult<bool> {
    let table = Alias::new(spec.table);
    let id_col = Alias::new(spec.id_column);
    let context_id = Alias::new("context_id");
    let context_user_id = Alias::new("context_user_id");
    let context_parent_id = Alias::new("context_parent_id");
    let context_id_bin = Alias::new("context_id_bin");
    let context_user_id_bin = Alias::new("context_user_id_bin");
    let context_parent_id_bin = Alias::new("context_parent_id_bin");

    let select = Query::select()
        .from(table.clone())
        .columns([
            id_col.clone(),
            context_id.clone(),
            context_user_id.clone(),
            context_parent_id.clone(),
        ])
        .cond_where(
            Cond::any()
                .add(Expr::col(context_id.clone()).is_not_null())
                .add(Expr::col(context_user_id.clone()).is_not_null())
                .add(Expr::col(context_parent_id.clone()).is_not_null()),
        )
        .limit(REWRITE_BATCH_SIZE)
        .to_owned();
    let rows = query_all(conn, &select).await?;

    for row in &rows {
        let row_id: i64 = row.try_get("", spec.id_column)?;
        let legacy_id: Option<String> = row.try_get("", "context_id")?;
        let legacy_user_id: Option<String> = row.try_get("", "context_user_id")?;
        let legacy_parent_id: Option<String> = row.try_get("", "context_parent_id")?;

        let update = Query::update()
            .table(table.clone())
            .value(context_id_bin.clone(), bin_value(legacy_id.as_deref()))
            .value(
                context_user_id_bin.clone(),
                bin_value(legacy_user_id.as_deref()),
            )
            .value(
                context_parent_id_bin.clone(),
                bin_value(legacy_parent_id.as_deref()),
            )
            .value(context_id.clone(), SeaValue::String(None))
            .value(context_user_id.clone(), SeaValue::String(None))
            .value(context_parent_id.clone(), SeaValue::String(None))
            .and_where(Expr::col(id_col.clone()).eq(row_id))
            .to_owned();
        exec(conn, &update).await?;
    }

    Ok((rows.len() as u64) < REWRITE_BATCH_SIZE)
}

fn bin_value(legacy: Option<&str>) -> SeaValue {
    SeaValue::Bytes(encode_context_id(legacy).map(|bytes| bytes.to_vec()))
}

/// Move one batch of events off the textual `event_type` column onto
/// the dictionary key. Returns true when no work remains.
pub(crate) async fn rewrite_event_type_ids<C: ConnectionTrait>(conn: &C) -> ChronicleResult<bool> {
    let select = Query::select()
        .from(ChronicleEvents::Table)
        .columns([ChronicleEvents::EventId, ChronicleEvents::EventType])
        .and_where(Expr::col(ChronicleEvents::EventTypeId).is_null())
        .and_where(Expr::col(ChronicleEvents::EventType).is_not_null())
        .limit(REWRITE_BATCH_SIZE)
        .to_owned();
    let rows = query_all(conn, &select).await?;

    let mut ids_by_type: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for row in &rows {
        let event_id: i64 = row.try_get("", &col_name(ChronicleEvents::EventId))?;
        let event_type: Option<String> = row.try_get("", &col_name(ChronicleEvents::EventType))?;
        if let Some(event_type) = event_type {
            ids_by_type.entry(event_type).or_default().push(event_id);
        }
    }

    for (event_type, event_ids) in ids_by_type {
        let event_type_id = lookup_or_insert_event_type(conn, &event_type).await?;
        let update = Query::update()
            .table(ChronicleEvents::Table)
            .value(ChronicleEvents::EventTypeId, event_type_id)
            .value(ChronicleEvents::EventType, SeaValue::String(None))
            .and_where(Expr::col(ChronicleEvents::EventId).is_in(event_ids))
            .to_owned();
        exec(conn, &update).await?;
    }

    Ok((rows.len() as u64) < REWRITE_BATCH_SIZE)
}

/// Dictionary lookup-or-insert. The persistence worker is the only
/// writer to the dictionary table, so select-then-insert is race-free.
pub(crate) async fn lookup_or_insert_event_type<C: ConnectionTrait>(
    conn: &C,
    event_type: &str,
) -> ChronicleResult<i64> {
    if let Some(id) = select_event_type_id(conn, event_type).await? {
        return Ok(id);
    }
    let insert = Query::insert()
        .into_table(ChronicleEventTypes::Table)
        .columns([ChronicleEventTypes::EventType])
        .values_panic([event_type.into()])
        .to_owned();
    exec(conn, &insert).await?;
    match select_event_type_id(conn, event_type).await? {
        Some(id) => Ok(id),
        None => Err(chronicle_core::ChronicleError::storage(format!(
            "event type '{event_type}' missing after insert"
        ))),
    }
}

async fn select_event_type_id<C: ConnectionTrait>(
    conn: &C,
    event_type: &str,
) -> ChronicleResult<Option<i64>> {
    let select = Query::select()
        .from(ChronicleEventTypes::Table)
        .column(ChronicleEventTypes::EventTypeId)
        .and_where(Expr::col(ChronicleEventTypes::EventType).eq(event_type))
        .limit(1)
        .to_owned();
    let row = query_one(conn, &select).await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let id: i64 = row.try_get("", &col_name(ChronicleEventTypes::EventTypeId))?;
    Ok(Some(id))
}
