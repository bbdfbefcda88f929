mod common;

use std::fs;
use std::sync::Arc;

use tempfile::tempdir;

use chronicle_store::{NullNotifier, Recorder, SCHEMA_VERSION};

#[tokio::test]
async fn broken_sqlite_file_is_moved_aside_and_reinitialized() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let db_path = base.join("chronicle.sqlite");
    fs::write(&db_path, b"this is not a sqlite database file".repeat(64)).expect("write garbage");

    let config = common::test_config(base);
    let recorder = Recorder::start(&config, base, Arc::new(NullNotifier)).expect("start recorder");
    assert!(
        recorder.wait_ready().await,
        "a corrupt file must be moved aside, not loop forever"
    );

    let moved_aside = fs::read_dir(base)
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .any(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .contains("chronicle.sqlite.corrupt.")
        });
    assert!(moved_aside, "broken file must be renamed aside");

    // The replacement store is a fresh, working database.
    let conn = recorder.connection().expect("connection");
    assert_eq!(
        common::latest_schema_version(&conn).await,
        Some(SCHEMA_VERSION)
    );
    assert_eq!(common::count_rows(&conn, "chronicle_events").await, 0);
    recorder.shutdown().await;
}
