mod common;

use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use chronicle_store::ddl::Ddl;
use chronicle_store::{
    ChronicleError, MigrationNotifier, NullNotifier, Recorder, SCHEMA_VERSION, migration,
    migration_is_live,
};

#[derive(Default)]
struct CountingNotifier {
    creates: Mutex<Vec<String>>,
    dismisses: Mutex<Vec<String>>,
}

impl MigrationNotifier for CountingNotifier {
    fn create(&self, notification_id: &str, _message: &str) {
        self.creates
            .lock()
            .expect("lock")
            .push(notification_id.to_string());
    }

    fn dismiss(&self, notification_id: &str) {
        self.dismisses
            .lock()
            .expect("lock")
            .push(notification_id.to_string());
    }
}

#[tokio::test]
async fn migrates_from_every_historical_version() {
    for start_version in [0, 1, 3, 4, 7] {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let conn = common::open_sqlite(base).await;
        common::create_database_at_version(&conn, start_version).await;

        let config = common::test_config(base);
        let recorder =
            Recorder::start(&config, base, Arc::new(NullNotifier)).expect("start recorder");
        assert!(
            recorder.wait_ready().await,
            "migration from version {start_version} must succeed"
        );
        assert!(!recorder.migration_in_progress());
        assert_eq!(
            common::latest_schema_version(&conn).await,
            Some(SCHEMA_VERSION),
            "version log must end at current after migrating from {start_version}"
        );
        recorder.shutdown().await;
    }
}

#[tokio::test]
async fn migrated_shape_matches_fresh_database() {
    let migrated_dir = tempdir().expect("tempdir");
    let conn = common::open_sqlite(migrated_dir.path()).await;
    common::create_database_at_version(&conn, 0).await;
    let config = common::test_config(migrated_dir.path());
    let recorder = Recorder::start(&config, migrated_dir.path(), Arc::new(NullNotifier))
        .expect("start recorder");
    assert!(recorder.wait_ready().await);
    recorder.shutdown().await;

    let fresh_dir = tempdir().expect("tempdir");
    let fresh_config = common::test_config(fresh_dir.path());
    let fresh = Recorder::start(&fresh_config, fresh_dir.path(), Arc::new(NullNotifier))
        .expect("start recorder");
    assert!(fresh.wait_ready().await);
    let fresh_conn = fresh.connection().expect("connection");

    assert_eq!(
        common::list_schema_objects(&conn).await,
        common::list_schema_objects(&fresh_conn).await
    );
    for table in ["chronicle_events", "chronicle_states", "chronicle_event_types"] {
        assert_eq!(
            common::list_columns(&conn, table).await,
            common::list_columns(&fresh_conn, table).await,
            "column set of {table} must match a fresh database"
        );
    }
    fresh.shutdown().await;
}

#[tokio::test]
async fn rejects_invalid_target_versions() {
    let dir = tempdir().expect("tempdir");
    let conn = common::open_sqlite(dir.path()).await;
    let ddl = Ddl::new(&conn);

    let err = migration::apply_update(&ddl, -1, 0)
        .await
        .expect_err("negative version");
    assert!(matches!(err, ChronicleError::Validation { .. }));

    let err = migration::apply_update(&ddl, SCHEMA_VERSION + 1, 0)
        .await
        .expect_err("unknown version");
    assert!(matches!(err, ChronicleError::Validation { .. }));
}

#[tokio::test]
async fn live_mode_follows_version_threshold() {
    assert!(!migration_is_live(0));
    assert!(!migration_is_live(3));
    assert!(migration_is_live(4));
    assert!(migration_is_live(SCHEMA_VERSION - 1));

    // Observe the flags mid-migration by holding the worker before the
    // first step.
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let conn = common::open_sqlite(base).await;
    common::create_database_at_version(&conn, 4).await;

    let mut config = common::test_config(base);
    config.failpoints = Some(vec!["migration.hold".to_string()]);
    let recorder = Recorder::start(&config, base, Arc::new(NullNotifier)).expect("start recorder");

    let mut migrating = recorder.migration();
    migrating
        .wait_for(|in_progress| *in_progress)
        .await
        .expect("migration starts");
    let status = recorder.migration_status();
    assert!(status.in_progress);
    assert!(status.is_live);
    assert_eq!(status.current_version, 4);
    assert_eq!(status.target_version, SCHEMA_VERSION);

    recorder.clear_failpoint("migration.hold");
    assert!(recorder.wait_ready().await);
    assert!(!recorder.migration_in_progress());
    recorder.shutdown().await;
}

#[tokio::test]
async fn failed_migration_notifies_and_keeps_resume_point() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let conn = common::open_sqlite(base).await;
    common::create_database_at_version(&conn, 1).await;

    let mut config = common::test_config(base);
    config.failpoints = Some(vec!["apply_update.fail".to_string()]);
    let notifier = Arc::new(CountingNotifier::default());
    let recorder =
        Recorder::start(&config, base, notifier.clone() as Arc<dyn MigrationNotifier>)
            .expect("start recorder");

    assert!(!recorder.wait_ready().await, "migration must fail");
    assert_eq!(notifier.creates.lock().expect("lock").len(), 2);
    assert_eq!(notifier.dismisses.lock().expect("lock").len(), 1);
    // The last committed version row is the resume point.
    assert_eq!(common::latest_schema_version(&conn).await, Some(1));
    recorder.shutdown().await;
}

#[tokio::test]
async fn refuses_databases_from_a_newer_build() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let conn = common::open_sqlite(base).await;
    common::create_database_at_version(&conn, 1).await;
    migration::log_schema_change(&conn, SCHEMA_VERSION + 1)
        .await
        .expect("stamp newer version");

    let config = common::test_config(base);
    let recorder = Recorder::start(&config, base, Arc::new(NullNotifier)).expect("start recorder");
    assert!(!recorder.wait_ready().await);
    recorder.shutdown().await;
}

#[tokio::test]
async fn startup_is_idempotent_on_a_current_database() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = common::test_config(base);

    let first = Recorder::start(&config, base, Arc::new(NullNotifier)).expect("start recorder");
    assert!(first.wait_ready().await);
    first.shutdown().await;

    let second = Recorder::start(&config, base, Arc::new(NullNotifier)).expect("start recorder");
    assert!(second.wait_ready().await);
    let conn = second.connection().expect("connection");
    assert_eq!(
        common::latest_schema_version(&conn).await,
        Some(SCHEMA_VERSION)
    );
    second.shutdown().await;
}
