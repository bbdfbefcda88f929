use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::notify::NullNotifier;
use crate::{ChronicleConfig, ChronicleResult, Recorder};

const DEFAULT_DB_NAME: &str = "chronicle.sqlite";

pub fn load_or_init_config(base: &Path) -> ChronicleResult<ChronicleConfig> {
    let default_sqlite = base.join(DEFAULT_DB_NAME);
    ChronicleConfig::load_or_init(base, &default_sqlite)
}

/// Open the recorder for a data directory with the stored (or default)
/// configuration and no notification collaborator.
pub fn start_recorder(base: &Path) -> ChronicleResult<Recorder> {
    let config = load_or_init_config(base)?;
    Recorder::start(&config, base, Arc::new(NullNotifier))
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}

#[cfg(test)]
mod tests {
    use super::{default_sqlite_path, load_or_init_config, start_recorder};
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_recorder_with_default_config() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let config = load_or_init_config(base).expect("config");
        assert_eq!(config.backend_name(), "sqlite");
        let recorder = start_recorder(base).expect("start recorder");
        assert!(recorder.wait_ready().await);
        let path = default_sqlite_path(base);
        assert!(path.exists());
        recorder.shutdown().await;
    }
}
