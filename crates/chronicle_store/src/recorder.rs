//! Recorder engine: producer-facing ingress plus the single
//! persistence worker that owns every database interaction.
//!
//! The producer never blocks on migration. Records submitted before
//! first readiness or during a live migration wait in the task
//! channel; the worker drains them in arrival order once the schema
//! is current.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{error, info, warn};
use sea_orm::sea_query::Query;
use sea_orm::{ConnectOptions, Database, DatabaseBackend, DatabaseConnection};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::sleep;

use crate::config::ChronicleConfig;
use crate::db::{ChronicleEvents, ChronicleStates, exec};
use crate::ddl::{Ddl, escalate, is_corruption};
use crate::fault::Faults;
use crate::migration::{
    self, CONTEXT_BIN_SCHEMA_VERSION, EVENT_TYPE_DICTIONARY_SCHEMA_VERSION, MigrationSnapshot,
    MigrationStatus, SCHEMA_VERSION,
};
use crate::notify::{FAILURE_NOTIFICATION_ID, MIGRATION_NOTIFICATION_ID, MigrationNotifier};
use crate::tasks::{self, RecorderTask};
use chronicle_core::{
    ChronicleError, ChronicleResult, EventPayload, StateChangePayload, encode_context_id,
};

pub struct Recorder {
    shared: Arc<Shared>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

struct Shared {
    tx: mpsc::UnboundedSender<RecorderTask>,
    backlog: AtomicUsize,
    max_backlog: usize,
    status: MigrationStatus,
    ready_rx: watch::Receiver<bool>,
    migration_rx: watch::Receiver<bool>,
    conn: OnceLock<DatabaseConnection>,
    faults: Faults,
}

struct WorkerContext {
    shared: Arc<Shared>,
    config: ChronicleConfig,
    base_dir: PathBuf,
    notifier: Arc<dyn MigrationNotifier>,
    rx: mpsc::UnboundedReceiver<RecorderTask>,
    ready_tx: watch::Sender<bool>,
    migration_tx: watch::Sender<bool>,
}

impl Recorder {
    /// Spawn the persistence worker and return immediately. Schema
    /// inspection, migration and queue draining all happen on the
    /// worker; await [`Recorder::wait_ready`] to observe completion.
    pub fn start(
        config: &ChronicleConfig,
        base_dir: &Path,
        notifier: Arc<dyn MigrationNotifier>,
    ) -> ChronicleResult<Recorder> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);
        let (migration_tx, migration_rx) = watch::channel(false);
        let faults = Faults::new(config.failpoints.clone().unwrap_or_default());
        let shared = Arc::new(Shared {
            tx,
            backlog: AtomicUsize::new(0),
            max_backlog: config.max_backlog(),
            status: MigrationStatus::new(SCHEMA_VERSION),
            ready_rx,
            migration_rx,
            conn: OnceLock::new(),
            faults,
        });
        let context = WorkerContext {
            shared: shared.clone(),
            config: config.clone(),
            base_dir: base_dir.to_path_buf(),
            notifier,
            rx,
            ready_tx,
            migration_tx,
        };
        let worker = tokio::spawn(worker_run(context));
        Ok(Recorder {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Accept an event record. Never blocks: the record is queued (or
    /// persisted directly once the worker is idle); past the backlog
    /// ceiling the newest record is dropped.
    pub fn record_event(&self, payload: EventPayload) {
        self.enqueue_record(RecorderTask::Event(payload));
    }

    /// Accept a state-change record; same policy as [`record_event`].
    ///
    /// [`record_event`]: Recorder::record_event
    pub fn record_state_change(&self, payload: StateChangePayload) {
        self.enqueue_record(RecorderTask::StateChange(payload));
    }

    fn enqueue_record(&self, task: RecorderTask) {
        if self.shared.backlog.load(Ordering::SeqCst) >= self.shared.max_backlog {
            warn!(
                "write backlog reached the ceiling of {} queued records, dropping newest record",
                self.shared.max_backlog
            );
            return;
        }
        self.shared.backlog.fetch_add(1, Ordering::SeqCst);
        if self.shared.tx.send(task).is_err() {
            gauge_dec(&self.shared.backlog);
            warn!("persistence worker is gone, dropping record");
        }
    }

    /// Enqueue an internal task (rewrites, synchronization). Bypasses
    /// the backlog ceiling; records should use the `record_*` calls.
    pub fn queue_task(&self, task: RecorderTask) {
        let _ = self.shared.tx.send(task);
    }

    /// Resolves once every task queued before this call has been
    /// processed.
    pub async fn synchronize(&self) {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let _ = self.shared.tx.send(RecorderTask::Synchronize(done_tx));
        let _ = done_rx.await;
    }

    pub fn ready(&self) -> watch::Receiver<bool> {
        self.shared.ready_rx.clone()
    }

    /// Wait until the recorder accepts direct writes. Returns false if
    /// the worker gave up first (failed migration or setup).
    pub async fn wait_ready(&self) -> bool {
        let mut rx = self.shared.ready_rx.clone();
        rx.wait_for(|ready| *ready).await.is_ok()
    }

    pub fn migration(&self) -> watch::Receiver<bool> {
        self.shared.migration_rx.clone()
    }

    pub fn migration_in_progress(&self) -> bool {
        self.shared.status.snapshot().in_progress
    }

    pub fn migration_is_live(&self) -> bool {
        self.shared.status.snapshot().is_live
    }

    pub fn migration_status(&self) -> MigrationSnapshot {
        self.shared.status.snapshot()
    }

    /// Handle to the connection pool, available once the worker has
    /// connected.
    pub fn connection(&self) -> Option<DatabaseConnection> {
        self.shared.conn.get().cloned()
    }

    /// Release a named failpoint so a held worker can proceed.
    pub fn clear_failpoint(&self, key: &str) {
        self.shared.faults.clear(key);
    }

    /// Ask the worker to stop and wait for its current unit of work.
    /// There is no mid-step cancellation.
    pub async fn shutdown(&self) {
        let _ = self.shared.tx.send(RecorderTask::Stop);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn gauge_dec(gauge: &AtomicUsize) {
    let _ = gauge.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
        Some(value.saturating_sub(1))
    });
}

async fn worker_run(mut ctx: WorkerContext) {
    match worker_setup(&mut ctx).await {
        Ok(conn) => worker_loop(ctx, conn).await,
        Err(err) => error!("recorder setup failed: {err}"),
    }
}

async fn worker_setup(ctx: &mut WorkerContext) -> ChronicleResult<DatabaseConnection> {
    // A malformed SQLite file can already fail the connection handshake.
    let mut conn = match connect(&ctx.config, &ctx.base_dir).await {
        Ok(conn) => conn,
        Err(err) => {
            let err = escalate(err);
            if is_corruption(&err) && ctx.config.backend_name() == "sqlite" {
                warn!("unrecoverable database corruption: {err}");
                let path = ctx.config.sqlite_path(&ctx.base_dir)?;
                move_away_broken_database(&path)?;
                connect(&ctx.config, &ctx.base_dir).await?
            } else {
                return Err(err);
            }
        }
    };
    let backend = conn.get_database_backend();

    // The current-version check itself may trip over on-disk
    // corruption; only SQLite has a recovery procedure (move the file
    // aside and start over).
    let stored = match migration::inspect_schema_version(&conn).await.map_err(escalate) {
        Ok(stored) => stored,
        Err(err) if is_corruption(&err) && backend == DatabaseBackend::Sqlite => {
            warn!("unrecoverable database corruption: {err}");
            reopen_clean_database(ctx, &mut conn).await?;
            None
        }
        Err(err) => return Err(err),
    };

    match stored {
        None => {
            info!("creating recorder database at schema version {SCHEMA_VERSION}");
            migration::create_current_schema(&conn).await?;
            migration::log_schema_change(&conn, SCHEMA_VERSION).await?;
            ctx.shared.status.set_current_version(SCHEMA_VERSION);
        }
        Some(version) if version < SCHEMA_VERSION => {
            migrate(ctx, &mut conn, version).await?;
        }
        Some(version) if version > SCHEMA_VERSION => {
            return Err(ChronicleError::migration(format!(
                "database schema version {version} is newer than supported {SCHEMA_VERSION}; \
                 downgrades are not supported"
            )));
        }
        Some(version) => {
            ctx.shared.status.set_current_version(version);
        }
    }

    let _ = ctx.shared.conn.set(conn.clone());
    let _ = ctx.ready_tx.send(true);
    Ok(conn)
}

async fn migrate(
    ctx: &mut WorkerContext,
    conn: &mut DatabaseConnection,
    from_version: i32,
) -> ChronicleResult<()> {
    let live = migration::migration_is_live(from_version);
    ctx.shared.status.set_current_version(from_version);
    ctx.shared.status.set_live(live);
    ctx.shared.status.set_in_progress(true);
    let _ = ctx.migration_tx.send(true);
    info!(
        "database requires upgrade from schema version {from_version} to {SCHEMA_VERSION}, \
         running {} migration",
        if live { "live" } else { "cold" }
    );
    ctx.notifier.create(
        MIGRATION_NOTIFICATION_ID,
        "Database upgrade in progress. The recorder will catch up once it finishes.",
    );

    wait_failpoint_release(&ctx.shared.faults, "migration.hold").await;

    let result = run_steps(ctx, conn, from_version).await;
    ctx.shared.status.set_in_progress(false);
    let _ = ctx.migration_tx.send(false);

    match result {
        Ok(()) => {
            ctx.notifier.dismiss(MIGRATION_NOTIFICATION_ID);
            info!("database upgrade to schema version {SCHEMA_VERSION} done");
            Ok(())
        }
        Err(err)
            if is_corruption(&err) && conn.get_database_backend() == DatabaseBackend::Sqlite =>
        {
            warn!("database corruption during migration: {err}");
            reopen_clean_database(ctx, conn).await?;
            migration::create_current_schema(&*conn).await?;
            migration::log_schema_change(&*conn, SCHEMA_VERSION).await?;
            ctx.shared.status.set_current_version(SCHEMA_VERSION);
            ctx.notifier.dismiss(MIGRATION_NOTIFICATION_ID);
            Ok(())
        }
        Err(err) => {
            error!("database migration failed: {err}");
            ctx.notifier.create(
                FAILURE_NOTIFICATION_ID,
                "The database upgrade failed; check the logs for details.",
            );
            ctx.notifier.dismiss(MIGRATION_NOTIFICATION_ID);
            Err(err)
        }
    }
}

async fn run_steps(
    ctx: &WorkerContext,
    conn: &DatabaseConnection,
    from_version: i32,
) -> ChronicleResult<()> {
    let ddl = Ddl::with_faults(conn, ctx.shared.faults.clone());
    for version in (from_version + 1)..=SCHEMA_VERSION {
        info!("upgrading recorder database to schema version {version}");
        for sub_version in 0..migration::sub_step_count(version) {
            migration::apply_update(&ddl, version, sub_version)
                .await
                .map_err(escalate)?;
        }
        migration::log_schema_change(conn, version).await?;
        ctx.shared.status.set_current_version(version);
    }

    // Databases arriving from before the binary columns or the
    // dictionary still carry legacy rows; convert them opportunistically
    // once the queue drains.
    if from_version < CONTEXT_BIN_SCHEMA_VERSION {
        let _ = ctx.shared.tx.send(RecorderTask::ContextIdRewrite);
    }
    if from_version < EVENT_TYPE_DICTIONARY_SCHEMA_VERSION {
        let _ = ctx.shared.tx.send(RecorderTask::EventTypeIdRewrite);
    }
    Ok(())
}

async fn worker_loop(mut ctx: WorkerContext, conn: DatabaseConnection) {
    let mut event_type_cache: HashMap<String, i64> = HashMap::new();
    while let Some(task) = ctx.rx.recv().await {
        match task {
            RecorderTask::Event(payload) => {
                if let Err(err) = persist_event(&conn, &mut event_type_cache, &payload).await {
                    warn!("failed to persist event record: {err}");
                }
                gauge_dec(&ctx.shared.backlog);
            }
            RecorderTask::StateChange(payload) => {
                if let Err(err) = persist_state_change(&conn, &payload).await {
                    warn!("failed to persist state-change record: {err}");
                }
                gauge_dec(&ctx.shared.backlog);
            }
            RecorderTask::ContextIdRewrite => match tasks::rewrite_context_ids(&conn).await {
                Ok(true) => info!("context id rewrite completed"),
                Ok(false) => {
                    let _ = ctx.shared.tx.send(RecorderTask::ContextIdRewrite);
                }
                Err(err) => warn!("context id rewrite failed: {err}"),
            },
            RecorderTask::EventTypeIdRewrite => match tasks::rewrite_event_type_ids(&conn).await {
                Ok(true) => info!("event type id rewrite completed"),
                Ok(false) => {
                    let _ = ctx.shared.tx.send(RecorderTask::EventTypeIdRewrite);
                }
                Err(err) => warn!("event type id rewrite failed: {err}"),
            },
            RecorderTask::Synchronize(done) => {
                let _ = done.send(());
            }
            RecorderTask::Stop => break,
        }
    }
}

async fn persist_event(
    conn: &DatabaseConnection,
    event_type_cache: &mut HashMap<String, i64>,
    payload: &EventPayload,
) -> ChronicleResult<()> {
    let event_type_id = match event_type_cache.get(&payload.event_type) {
        Some(id) => *id,
        None => {
            let id = tasks::lookup_or_insert_event_type(conn, &payload.event_type).await?;
            event_type_cache.insert(payload.event_type.clone(), id);
            id
        }
    };
    let payload_json = serde_json::to_string(&payload.data)
        .map_err(|err| ChronicleError::storage(format!("serialize event payload: {err}")))?;
    let insert = Query::insert()
        .into_table(ChronicleEvents::Table)
        .columns([
            ChronicleEvents::EventTypeId,
            ChronicleEvents::TimeFiredTs,
            ChronicleEvents::PayloadJson,
            ChronicleEvents::ContextIdBin,
            ChronicleEvents::ContextUserIdBin,
            ChronicleEvents::ContextParentIdBin,
        ])
        .values_panic([
            event_type_id.into(),
            payload.time_fired_ts.into(),
            payload_json.into(),
            bin_context(payload.context.context_id.as_deref()).into(),
            bin_context(payload.context.user_id.as_deref()).into(),
            bin_context(payload.context.parent_id.as_deref()).into(),
        ])
        .to_owned();
    exec(conn, &insert).await
}

async fn persist_state_change(
    conn: &DatabaseConnection,
    payload: &StateChangePayload,
) -> ChronicleResult<()> {
    let attributes_json = serde_json::to_string(&payload.attributes)
        .map_err(|err| ChronicleError::storage(format!("serialize state attributes: {err}")))?;
    let insert = Query::insert()
        .into_table(ChronicleStates::Table)
        .columns([
            ChronicleStates::EntityId,
            ChronicleStates::State,
            ChronicleStates::AttributesJson,
            ChronicleStates::LastUpdatedTs,
            ChronicleStates::ContextIdBin,
            ChronicleStates::ContextUserIdBin,
            ChronicleStates::ContextParentIdBin,
        ])
        .values_panic([
            payload.entity_id.clone().into(),
            payload.state.clone().into(),
            attributes_json.into(),
            payload.last_updated_ts.into(),
            bin_context(payload.context.context_id.as_deref()).into(),
            bin_context(payload.context.user_id.as_deref()).into(),
            bin_context(payload.context.parent_id.as_deref()).into(),
        ])
        .to_owned();
    exec(conn, &insert).await
}

fn bin_context(value: Option<&str>) -> sea_orm::sea_query::Value {
    sea_orm::sea_query::Value::Bytes(encode_context_id(value).map(|bytes| bytes.to_vec()))
}

async fn connect(config: &ChronicleConfig, base_dir: &Path) -> ChronicleResult<DatabaseConnection> {
    let url = build_connection_url(config, base_dir)?;
    let mut options = ConnectOptions::new(url);
    if let Some(pool) = &config.pool {
        if let Some(max) = pool.max_connections {
            options.max_connections(max);
        }
        if let Some(min) = pool.min_connections {
            options.min_connections(min);
        }
        if let Some(timeout_ms) = pool.connect_timeout_ms {
            options.connect_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(timeout_ms) = pool.acquire_timeout_ms {
            options.acquire_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(timeout_ms) = pool.idle_timeout_ms {
            options.idle_timeout(Duration::from_millis(timeout_ms));
        }
    }
    Database::connect(options).await.map_err(ChronicleError::from)
}

fn build_connection_url(config: &ChronicleConfig, base_dir: &Path) -> ChronicleResult<String> {
    match config.connection_url() {
        Some(url) => Ok(url.to_string()),
        None => {
            let path = config.sqlite_path(base_dir)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| ChronicleError::storage(format!("create data dir: {err}")))?;
            }
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
    }
}

/// Rename the broken SQLite database (and its WAL/SHM siblings) aside
/// so a fresh store can be initialized in its place.
pub(crate) fn move_away_broken_database(path: &Path) -> ChronicleResult<()> {
    let moved_at = time::OffsetDateTime::now_utc().unix_timestamp();
    for suffix in ["", "-wal", "-shm"] {
        let source = PathBuf::from(format!("{}{suffix}", path.display()));
        if !source.exists() {
            continue;
        }
        let target = PathBuf::from(format!("{}.corrupt.{moved_at}", source.display()));
        fs::rename(&source, &target).map_err(|err| {
            ChronicleError::storage(format!(
                "move away broken database {}: {err}",
                source.display()
            ))
        })?;
        warn!(
            "moved corrupt database {} to {}",
            source.display(),
            target.display()
        );
    }
    Ok(())
}

async fn reopen_clean_database(
    ctx: &WorkerContext,
    conn: &mut DatabaseConnection,
) -> ChronicleResult<()> {
    let path = ctx.config.sqlite_path(&ctx.base_dir)?;
    move_away_broken_database(&path)?;
    // Dropping the old pool closes its handles to the renamed file.
    *conn = connect(&ctx.config, &ctx.base_dir).await?;
    Ok(())
}

async fn wait_failpoint_release(faults: &Faults, key: &str) {
    while faults.contains(key) {
        sleep(Duration::from_millis(10)).await;
    }
}
