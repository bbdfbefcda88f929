pub mod config;
pub mod datastore;
mod db;
pub mod ddl;
mod fault;
pub mod migration;
pub mod notify;
pub mod recorder;
mod tasks;

pub use chronicle_core::*;
pub use config::{ChronicleConfig, DatabaseConfig, DEFAULT_MAX_BACKLOG, PoolConfig, QueueConfig};
pub use datastore::{default_sqlite_path, load_or_init_config, start_recorder};
pub use ddl::{Ddl, DdlOutcome};
pub use migration::{
    LIVE_MIGRATION_MIN_SCHEMA_VERSION, MigrationSnapshot, SCHEMA_VERSION, migration_is_live,
};
pub use notify::{MigrationNotifier, NullNotifier};
pub use recorder::Recorder;
pub use tasks::RecorderTask;
